//! Convenience entry points that wrap a [`DataContainer`] in a row loop.

use super::{ContainerTable, DataContainer};
use crate::Result;
use crate::data::{DataRow, TableSpec, TypeRegistry};
use crate::settings::ContainerSettings;
use ohno::IntoAppError;
use std::path::Path;
use std::sync::Arc;

const LOG_TARGET: &str = "        io";

/// Receives progress of the row loops in this module and can ask them to stop.
pub trait Progress: Send + Sync {
    /// Set the phase label for the current operation (e.g., "Caching", "Writing").
    fn set_phase(&self, phase: &str);

    /// Report that `current` rows out of `total` (when known) have been processed.
    fn set_progress(&self, current: u64, total: Option<u64>, message: &str);

    /// Return an error, usually [`ContainerError::Canceled`](super::ContainerError::Canceled), to abort the loop.
    ///
    /// Called once per row before the row is appended.
    fn check_canceled(&self) -> Result<()> {
        Ok(())
    }

    /// Finish and clear the progress indicator.
    fn done(&self);
}

/// A [`Progress`] that ignores everything and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_phase(&self, _phase: &str) {}

    fn set_progress(&self, _current: u64, _total: Option<u64>, _message: &str) {}

    fn done(&self) {}
}

/// Anything that produces rows of a known spec.
pub trait RowSource {
    fn spec(&self) -> &TableSpec;

    /// Number of rows, when known up front.
    fn row_count_hint(&self) -> Option<u64> {
        None
    }

    /// Starts a fresh pass over the rows.
    fn rows(&self) -> Result<Box<dyn Iterator<Item = Result<DataRow>> + '_>>;

    /// A finished container file holding exactly these rows, if there is one.
    fn backing_file(&self) -> Option<&Path> {
        None
    }
}

/// Rows held in a plain vector.
#[derive(Debug, Clone)]
pub struct InMemoryRows {
    spec: TableSpec,
    rows: Vec<DataRow>,
}

impl InMemoryRows {
    #[must_use]
    pub const fn new(spec: TableSpec, rows: Vec<DataRow>) -> Self {
        Self { spec, rows }
    }
}

impl RowSource for InMemoryRows {
    fn spec(&self) -> &TableSpec {
        &self.spec
    }

    fn row_count_hint(&self) -> Option<u64> {
        u64::try_from(self.rows.len()).ok()
    }

    fn rows(&self) -> Result<Box<dyn Iterator<Item = Result<DataRow>> + '_>> {
        Ok(Box::new(self.rows.iter().cloned().map(Ok)))
    }
}

impl RowSource for ContainerTable {
    fn spec(&self) -> &TableSpec {
        Self::spec(self)
    }

    fn row_count_hint(&self) -> Option<u64> {
        Some(self.row_count())
    }

    fn rows(&self) -> Result<Box<dyn Iterator<Item = Result<DataRow>> + '_>> {
        Ok(Box::new(self.iter()))
    }

    fn backing_file(&self) -> Option<&Path> {
        self.file_path()
    }
}

fn copy_rows(container: &mut DataContainer, source: &dyn RowSource, progress: &dyn Progress) -> Result<()> {
    container.open_with_domain(source.spec().clone(), true)?;

    let total = source.row_count_hint();
    let mut done = 0u64;
    for row in source.rows()? {
        progress.check_canceled()?;
        container.append(row?)?;
        done += 1;
        progress.set_progress(done, total, &format!("{done} rows"));
    }

    container.close()
}

/// Copies `source` into a new container, keeping the domain information of its spec.
///
/// Progress is reported and cancellation checked once per row. A canceled or failed copy leaves
/// no file behind.
pub fn cache(
    source: &dyn RowSource,
    registry: Arc<TypeRegistry>,
    settings: &ContainerSettings,
    progress: &dyn Progress,
) -> Result<ContainerTable> {
    progress.set_phase("Caching");
    let mut container = DataContainer::new(registry, settings.clone());
    let result = copy_rows(&mut container, source, progress);
    progress.done();
    result?;
    container.table()
}

/// Writes `source` to a container file at `path`.
///
/// A source that is already backed by a finished container file is copied byte for byte.
pub fn write_to_file(
    source: &dyn RowSource,
    path: impl AsRef<Path>,
    registry: Arc<TypeRegistry>,
    settings: &ContainerSettings,
    progress: &dyn Progress,
) -> Result<()> {
    let path = path.as_ref();

    if let Some(existing) = source.backing_file() {
        if is_same_file(existing, path) {
            log::debug!(target: LOG_TARGET, "'{}' already holds the container", path.display());
            return Ok(());
        }

        log::debug!(target: LOG_TARGET, "copying '{}' to '{}'", existing.display(), path.display());
        let _ = std::fs::copy(existing, path)
            .into_app_err_with(|| format!("unable to copy container file '{}' to '{}'", existing.display(), path.display()))?;
        return Ok(());
    }

    progress.set_phase("Writing");
    let mut container = DataContainer::new(registry, settings.clone()).writing_to(path);
    let result = copy_rows(&mut container, source, progress);
    progress.done();
    result
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Opens a container file written by [`write_to_file`] or by a container with an explicit destination.
///
/// The spec is read now; rows are read by each cursor as it is iterated.
pub fn read_from_file(path: impl AsRef<Path>, registry: Arc<TypeRegistry>) -> Result<ContainerTable> {
    ContainerTable::open(path, registry)
}
