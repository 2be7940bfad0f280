use crate::Result;
use crate::container::WriterOptions;
use camino::{Utf8Path, Utf8PathBuf};
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default settings TOML content, embedded from `default_settings.toml`
pub const DEFAULT_SETTINGS_TOML: &str = include_str!("../default_settings.toml");

/// Name of the settings file looked up in the working directory.
pub const SETTINGS_FILE_NAME: &str = "spilltable.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSettings {
    /// Cells kept in memory before a container starts spilling
    #[serde(default = "default_max_cells_in_memory")]
    pub max_cells_in_memory: usize,

    /// Distinct values recorded per categorical column before its possible-values domain is dropped
    #[serde(default = "default_max_possible_values")]
    pub max_possible_values: usize,

    /// Rows per compressed frame of the data section
    #[serde(default = "default_rows_per_frame")]
    pub rows_per_frame: usize,

    /// zstd compression level (1..=22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Directory for temporary container files
    #[serde(default)]
    pub temp_dir: Option<Utf8PathBuf>,
}

const fn default_max_cells_in_memory() -> usize {
    100_000
}

const fn default_max_possible_values() -> usize {
    60
}

const fn default_rows_per_frame() -> usize {
    1000
}

const fn default_compression_level() -> i32 {
    3
}

impl ContainerSettings {
    /// Load settings from a file or use defaults
    ///
    /// Without an explicit path, `spilltable.toml` in the current directory is used when present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds invalid values
    pub fn load(settings_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = settings_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading settings file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = Utf8PathBuf::from(SETTINGS_FILE_NAME);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
                Err(e) => return Err(e).into_app_err_with(|| format!("reading settings file '{path}'")),
            }
        };

        let settings: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing settings file '{final_path}'"))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save the default settings to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_SETTINGS_TOML).into_app_err_with(|| format!("writing default settings to {output_path}"))?;
        Ok(())
    }

    /// Validate settings values
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.rows_per_frame == 0 {
            return Err(app_err!("rows_per_frame must be at least 1"));
        }

        if !(1..=22).contains(&self.compression_level) {
            return Err(app_err!("compression_level must be between 1 and 22, got {}", self.compression_level));
        }

        Ok(())
    }

    /// Rows a container with `column_count` columns keeps in memory.
    #[must_use]
    pub fn capacity_rows(&self, column_count: usize) -> usize {
        self.max_cells_in_memory / column_count.max(1)
    }

    #[must_use]
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            rows_per_frame: self.rows_per_frame,
            compression_level: self.compression_level,
            temp_dir: self.temp_dir.clone().map(Utf8PathBuf::into_std_path_buf),
        }
    }
}

impl Default for ContainerSettings {
    fn default() -> Self {
        toml::from_str(DEFAULT_SETTINGS_TOML).expect("default_settings.toml should be valid TOML that deserializes to ContainerSettings")
    }
}
