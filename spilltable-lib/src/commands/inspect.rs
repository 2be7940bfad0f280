use super::Host;
use crate::Result;
use crate::container::{ContainerTable, read_from_file};
use crate::data::{Cell, TableSpec, TypeRegistry};
use camino::Utf8PathBuf;
use clap::Parser;
use core::fmt::Write as _;
use ohno::IntoAppError;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Container file to describe
    #[arg(value_name = "PATH")]
    pub file: Utf8PathBuf,

    /// Print the description as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct TableSummary {
    name: Option<String>,
    rows: u64,
    file_size: u64,
    columns: Vec<ColumnSummary>,
}

#[derive(Debug, Serialize)]
struct ColumnSummary {
    name: String,
    data_type: String,
    possible_values: Option<Vec<String>>,
    lower: Option<String>,
    upper: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

fn render(cell: &Cell) -> String {
    cell.to_string()
}

impl TableSummary {
    fn new(spec: &TableSpec, rows: u64, file_size: u64) -> Self {
        Self {
            name: spec.name.clone(),
            rows,
            file_size,
            columns: spec
                .columns
                .iter()
                .map(|column| ColumnSummary {
                    name: column.name.clone(),
                    data_type: column.data_type.to_string(),
                    possible_values: column.domain.values.as_ref().map(|values| values.iter().map(render).collect()),
                    lower: column.domain.lower.as_ref().map(render),
                    upper: column.domain.upper.as_ref().map(render),
                    properties: column.properties.clone(),
                })
                .collect(),
        }
    }

    fn write_text(&self, use_colors: bool, out: &mut String) -> core::fmt::Result {
        let title = self.name.as_deref().unwrap_or("(unnamed table)");
        if use_colors {
            writeln!(out, "{}", title.bold())?;
        } else {
            writeln!(out, "{title}")?;
        }
        writeln!(out, "  rows: {}", self.rows)?;
        writeln!(out, "  file size: {} bytes", self.file_size)?;
        writeln!(out, "  columns: {}", self.columns.len())?;

        for column in &self.columns {
            if use_colors {
                writeln!(out, "  {} {}", column.name.cyan().bold(), column.data_type.dimmed())?;
            } else {
                writeln!(out, "  {} ({})", column.name, column.data_type)?;
            }

            if let Some(values) = &column.possible_values {
                writeln!(out, "    values: {}", values.join(", "))?;
            }

            if column.lower.is_some() || column.upper.is_some() {
                writeln!(
                    out,
                    "    range: {} .. {}",
                    column.lower.as_deref().unwrap_or("?"),
                    column.upper.as_deref().unwrap_or("?")
                )?;
            }

            for (key, value) in &column.properties {
                writeln!(out, "    {key} = {value}")?;
            }
        }

        Ok(())
    }
}

fn summarize(table: &ContainerTable) -> Result<TableSummary> {
    let file_size = match table.file_path() {
        Some(path) => std::fs::metadata(path)
            .into_app_err_with(|| format!("unable to get metadata of '{}'", path.display()))?
            .len(),
        None => 0,
    };

    Ok(TableSummary::new(table.spec(), table.row_count(), file_size))
}

/// Describes a container file without reading any of its rows.
pub fn inspect_container<H: Host>(host: &mut H, args: &InspectArgs, use_colors: bool) -> Result<()> {
    let table = read_from_file(&args.file, Arc::new(TypeRegistry::with_builtins()))?;
    let summary = summarize(&table)?;

    let text = if args.json {
        let mut json = serde_json::to_string_pretty(&summary).into_app_err("serializing table summary")?;
        json.push('\n');
        json
    } else {
        let mut text = String::new();
        summary.write_text(use_colors, &mut text).into_app_err("formatting table summary")?;
        text
    };

    let _ = write!(host.output(), "{text}");
    Ok(())
}
