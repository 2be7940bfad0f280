//! Command dispatch logic for spilltable

use super::common::{ColorMode, LogLevel, init_logging};
use super::{ExportArgs, ImportArgs, InitArgs, InspectArgs, ProgressReporter, export_container, import_csv, init_settings, inspect_container};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};
use std::io::Write;

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "spilltable", author, version, long_about = None)]
#[command(about = "Buffer, spill and inspect heterogeneous row tables")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    log_level: LogLevel,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto", global = true)]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a container file from a CSV file
    Import(ImportArgs),
    /// Describe the schema and domains of a container file
    Inspect(InspectArgs),
    /// Write the rows of a container file as CSV
    Export(ExportArgs),
    /// Generate a default settings file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. It's designed to be called from main.rs with the program arguments.
///
/// # Arguments
///
/// * `args` - An iterator of command-line arguments (typically from `std::env::args()`)
///
/// # Errors
///
/// Returns an error if the executed command fails. The error is also reported on the host's
/// error output and the host is asked to exit with status 1.
pub fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.log_level);

    let result = match &cli.command {
        Command::Import(import_args) => {
            let progress = ProgressReporter::new(cli.log_level.progress_delay(), cli.color.use_colors(&std::io::stderr()));
            import_csv(host, import_args, &progress)
        }
        Command::Inspect(inspect_args) => inspect_container(host, inspect_args, cli.color.use_colors(&std::io::stdout())),
        Command::Export(export_args) => export_container(host, export_args),
        Command::Init(init_args) => init_settings(host, init_args),
    };

    if let Err(e) = &result {
        let _ = writeln!(host.error(), "error: {e}");
        host.exit(1);
    }

    result
}
