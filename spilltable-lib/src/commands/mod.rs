//! Command-line interface for spilltable
//!
//! This module implements the CLI commands on top of the storage engine in
//! [`container`](crate::container). Every command runs against a [`Host`] so that
//! it can be driven in-process by tests.
//!
//! ## Commands
//!
//! - **import**: Read a CSV file as a row source and write it to a container file,
//!   computing column domains along the way
//! - **inspect**: Print the schema, row count and domains of a container file without
//!   reading its rows
//! - **export**: Stream the rows of a container file out as CSV
//! - **init**: Generate a default settings file
//!
//! Settings are loaded from a TOML file (see [`ContainerSettings`](crate::settings::ContainerSettings)).

mod common;
mod export;
mod host;
mod import;
mod init;
mod inspect;
mod progress_reporter;
mod run;

pub use common::{ColorMode, LogLevel};
pub use export::{ExportArgs, export_container};
pub use host::Host;
pub use import::{CsvSource, ImportArgs, import_csv};
pub use init::{InitArgs, init_settings};
pub use inspect::{InspectArgs, inspect_container};
pub use progress_reporter::ProgressReporter;
pub use run::run;
