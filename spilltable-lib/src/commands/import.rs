use super::Host;
use crate::Result;
use crate::container::{Progress, RowSource, read_from_file, write_to_file};
use crate::data::{
    BooleanCell, Cell, CellTypeId, ColumnSpec, DataRow, DateTimeCell, DoubleCell, IntCell, LongCell, RowKey, StringCell, TableSpec,
    TypeRegistry,
};
use crate::settings::ContainerSettings;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use clap::Parser;
use core::str::FromStr;
use ohno::{EnrichableExt, IntoAppError, app_err, bail};
use std::io::Write;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// CSV file with a header row
    #[arg(value_name = "CSV")]
    pub input: Utf8PathBuf,

    /// Container file to create
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Utf8PathBuf,

    /// Column types as `name:type` pairs (string, int, long, double, boolean, datetime); other columns are strings
    #[arg(long, value_name = "NAME:TYPE", value_delimiter = ',')]
    pub types: Vec<String>,

    /// Table name stored in the container
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Path to settings file (default is `spilltable.toml`)
    #[arg(long, short = 's', value_name = "PATH")]
    pub settings: Option<Utf8PathBuf>,
}

/// How the text of one CSV field becomes a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldParser {
    String,
    Int,
    Long,
    Double,
    Boolean,
    DateTime,
}

impl FieldParser {
    fn for_type(name: &str) -> Option<(Self, CellTypeId)> {
        match name {
            "string" => Some((Self::String, CellTypeId::STRING)),
            "int" => Some((Self::Int, CellTypeId::INT)),
            "long" => Some((Self::Long, CellTypeId::LONG)),
            "double" => Some((Self::Double, CellTypeId::DOUBLE)),
            "boolean" => Some((Self::Boolean, CellTypeId::BOOLEAN)),
            "datetime" => Some((Self::DateTime, CellTypeId::DATETIME)),
            _ => None,
        }
    }

    fn parse(self, text: &str) -> Result<Cell> {
        if text.is_empty() {
            return Ok(Cell::Missing);
        }

        Ok(match self {
            Self::String => Cell::from(StringCell::from(text)),
            Self::Int => Cell::from(IntCell(parse_number(text)?)),
            Self::Long => Cell::from(LongCell(parse_number(text)?)),
            Self::Double => Cell::from(DoubleCell(parse_number(text)?)),
            Self::Boolean => Cell::from(BooleanCell(parse_number(text)?)),
            Self::DateTime => {
                let value = DateTime::parse_from_rfc3339(text).into_app_err_with(|| format!("'{text}' is not an RFC 3339 timestamp"))?;
                Cell::from(DateTimeCell(value.with_timezone(&Utc)))
            }
        })
    }
}

fn parse_number<T>(text: &str) -> Result<T>
where
    T: FromStr,
    T::Err: core::error::Error + Send + Sync + 'static,
{
    text.trim().parse::<T>().into_app_err_with(|| format!("'{text}' is not a valid value"))
}

/// A CSV file with a header row, read as a row source.
///
/// Every call to [`rows`](RowSource::rows) re-reads the file. Row keys are `Row0`, `Row1`, ...
#[derive(Debug)]
pub struct CsvSource {
    path: Utf8PathBuf,
    spec: TableSpec,
    parsers: Vec<FieldParser>,
}

impl CsvSource {
    /// Reads the header of `path` and types its columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, or if `types` names an unknown column or type
    pub fn open(path: &Utf8Path, types: &[String], name: Option<String>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).into_app_err_with(|| format!("opening CSV file '{path}'"))?;
        let headers = reader.headers().into_app_err_with(|| format!("reading the header of '{path}'"))?.clone();

        let mut parsers = vec![FieldParser::String; headers.len()];
        let mut columns: Vec<ColumnSpec> = headers.iter().map(|h| ColumnSpec::new(h, CellTypeId::STRING)).collect();

        for assignment in types {
            let Some((column, type_name)) = assignment.split_once(':') else {
                bail!("column type '{assignment}' must have the form NAME:TYPE");
            };

            let Some(index) = headers.iter().position(|h| h == column) else {
                bail!("column '{column}' does not exist in '{path}'");
            };

            let (parser, data_type) =
                FieldParser::for_type(type_name).ok_or_else(|| app_err!("unsupported column type '{type_name}' for column '{column}'"))?;
            parsers[index] = parser;
            columns[index].data_type = data_type;
        }

        let mut spec = TableSpec::new(columns);
        if let Some(name) = name {
            spec = spec.with_name(name);
        }

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            parsers,
        })
    }

    fn parse_record(&self, index: usize, record: &csv::StringRecord) -> Result<DataRow> {
        let cells = self
            .parsers
            .iter()
            .zip(record.iter())
            .zip(&self.spec.columns)
            .map(|((parser, text), column)| {
                parser
                    .parse(text)
                    .map_err(|e| e.enrich_with(|| format!("line {}, column '{}' of '{}'", index + 2, column.name, self.path)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DataRow::new(RowKey::named(&format!("Row{index}")), cells))
    }
}

impl RowSource for CsvSource {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn rows(&self) -> Result<Box<dyn Iterator<Item = Result<DataRow>> + '_>> {
        let reader = csv::Reader::from_path(&self.path).into_app_err_with(|| format!("opening CSV file '{}'", self.path))?;

        Ok(Box::new(reader.into_records().enumerate().map(move |(index, record)| {
            let record = record.into_app_err_with(|| format!("reading line {} of '{}'", index + 2, self.path))?;
            self.parse_record(index, &record)
        })))
    }
}

pub fn import_csv<H: Host>(host: &mut H, args: &ImportArgs, progress: &dyn Progress) -> Result<()> {
    let settings = ContainerSettings::load(args.settings.as_deref())?;
    let registry = Arc::new(TypeRegistry::with_builtins());

    let source = CsvSource::open(&args.input, &args.types, args.name.clone())?;
    write_to_file(&source, &args.output, Arc::clone(&registry), &settings, progress)?;

    let table = read_from_file(&args.output, registry)?;
    let _ = writeln!(
        host.output(),
        "Imported {} rows with {} columns into {}",
        table.row_count(),
        table.spec().column_count(),
        args.output
    );

    Ok(())
}
