use super::Host;
use crate::Result;
use crate::settings::{ContainerSettings, SETTINGS_FILE_NAME};
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output settings file path (default is `spilltable.toml` in the current directory)
    #[arg(value_name = "PATH")]
    pub output: Option<Utf8PathBuf>,
}

pub fn init_settings<H: Host>(host: &mut H, args: &InitArgs) -> Result<()> {
    let output = args.output.clone().unwrap_or_else(|| Utf8PathBuf::from(SETTINGS_FILE_NAME));

    ContainerSettings::save_default(&output)?;
    let _ = writeln!(host.output(), "Generated default settings file: {output}");
    Ok(())
}
