use super::Host;
use crate::Result;
use crate::container::read_from_file;
use crate::data::{Cell, TypeRegistry};
use camino::Utf8PathBuf;
use clap::Parser;
use ohno::IntoAppError;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Container file to export
    #[arg(value_name = "PATH")]
    pub file: Utf8PathBuf,

    /// CSV file to write (default is standard output)
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<Utf8PathBuf>,

    /// Leave out the row key column
    #[arg(long)]
    pub no_key: bool,
}

fn field(cell: &Cell) -> String {
    match cell {
        Cell::Missing => String::new(),
        Cell::Value(value) => value.to_string(),
    }
}

/// Writes every row of `args.file` as CSV, returning the number of rows and of degraded cells.
fn export_rows(args: &ExportArgs, out: impl Write) -> Result<(u64, u64)> {
    let table = read_from_file(&args.file, Arc::new(TypeRegistry::with_builtins()))?;
    let mut writer = csv::Writer::from_writer(out);

    let mut header: Vec<&str> = Vec::with_capacity(table.spec().column_count() + 1);
    if !args.no_key {
        header.push("key");
    }
    header.extend(table.spec().columns.iter().map(|c| c.name.as_str()));
    writer.write_record(&header).into_app_err("writing CSV header")?;

    let mut cursor = table.iter();
    let mut rows = 0u64;
    for row in &mut cursor {
        let row = row?;
        let mut record: Vec<String> = Vec::with_capacity(row.width() + 1);
        if !args.no_key {
            record.push(field(&row.key.id));
        }
        record.extend(row.cells.iter().map(field));
        writer.write_record(&record).into_app_err("writing CSV record")?;
        rows += 1;
    }

    writer.flush().into_app_err("flushing CSV output")?;
    Ok((rows, cursor.degraded_cells()))
}

pub fn export_container<H: Host>(host: &mut H, args: &ExportArgs) -> Result<()> {
    let (rows, degraded) = match &args.output {
        Some(path) => {
            let file = File::create(path).into_app_err_with(|| format!("creating CSV file '{path}'"))?;
            let counts = export_rows(args, file)?;
            let _ = writeln!(host.output(), "Exported {} rows to {path}", counts.0);
            counts
        }
        None => export_rows(args, host.output())?,
    };

    if degraded > 0 {
        let _ = writeln!(
            host.error(),
            "warning: {degraded} cells in {rows} rows could not be decoded and were exported as empty fields"
        );
    }

    Ok(())
}
