use super::format::{self, Header};
use super::{FrozenDictionary, RowCursor, reclaim};
use crate::Result;
use crate::data::{DataRow, TableSpec, TypeRegistry};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::TempPath;

const LOG_TARGET: &str = "     table";

/// An engine-generated container file, deleted when dropped.
#[derive(Debug)]
pub(crate) struct TempContainerFile(Option<TempPath>);

impl TempContainerFile {
    pub(crate) fn new(path: TempPath) -> Self {
        reclaim::register_temp_file(&path);
        Self(Some(path))
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.0.as_deref()
    }
}

impl Drop for TempContainerFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let display = path.to_path_buf();
            reclaim::unregister_temp_file(&display);
            match delete(path) {
                Ok(true) => log::debug!(target: LOG_TARGET, "deleted temp container file '{}'", display.display()),
                Ok(false) => log::debug!(target: LOG_TARGET, "temp container file '{}' was already deleted", display.display()),
                Err(e) => log::warn!(target: LOG_TARGET, "unable to delete temp container file '{}': {e}", display.display()),
            }
        }
    }
}

/// Returns `false` when the file was already gone.
fn delete(path: TempPath) -> std::io::Result<bool> {
    match path.close() {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A finished container file shared by a table and all of its cursors.
#[derive(Debug)]
pub(crate) struct FileStore {
    path: PathBuf,
    temp: Mutex<Option<TempContainerFile>>,
    header: Header,
    dictionary: FrozenDictionary,
    open_streams: AtomicUsize,
}

impl FileStore {
    pub(crate) const fn new(path: PathBuf, temp: Option<TempContainerFile>, header: Header, dictionary: FrozenDictionary) -> Self {
        Self {
            path,
            temp: Mutex::new(temp),
            header,
            dictionary,
            open_streams: AtomicUsize::new(0),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) const fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) const fn dictionary(&self) -> &FrozenDictionary {
        &self.dictionary
    }

    pub(crate) fn stream_opened(&self) {
        let open = self.open_streams.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(target: LOG_TARGET, "opened stream on '{}' ({open} open)", self.path.display());
    }

    pub(crate) fn stream_closed(&self) {
        let open = self.open_streams.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        log::debug!(target: LOG_TARGET, "closed stream on '{}' ({open} open)", self.path.display());
    }

    fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Relaxed)
    }

    fn is_temporary(&self) -> bool {
        self.temp.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn dispose(&self) {
        drop(self.temp.lock().unwrap_or_else(PoisonError::into_inner).take());
    }
}

/// Immutable storage of a closed container.
#[derive(Debug, Clone)]
pub(crate) enum Backing {
    Memory(Arc<[DataRow]>),
    File(Arc<FileStore>),
}

#[derive(Debug)]
struct TableInner {
    spec: TableSpec,
    row_count: u64,
    registry: Arc<TypeRegistry>,
    backing: Backing,
}

/// Read-only view of a closed container.
///
/// Cloning is cheap; every clone shares the same backing store. Each call to
/// [`iter`](Self::iter) yields an independent cursor starting at the first row, so any number of
/// scans can run at once, on any thread.
#[derive(Debug, Clone)]
pub struct ContainerTable {
    inner: Arc<TableInner>,
}

impl ContainerTable {
    pub(crate) fn new(spec: TableSpec, row_count: u64, registry: Arc<TypeRegistry>, backing: Backing) -> Self {
        Self {
            inner: Arc::new(TableInner {
                spec,
                row_count,
                registry,
                backing,
            }),
        }
    }

    /// Opens a finished container file, reading its schema now and its rows per cursor.
    pub fn open(path: impl AsRef<Path>, registry: Arc<TypeRegistry>) -> Result<Self> {
        let path = path.as_ref();
        let info = format::read_container_info(path, &registry)?;
        let store = FileStore::new(path.to_path_buf(), None, info.header, info.dictionary);
        Ok(Self::new(info.spec, info.row_count, registry, Backing::File(Arc::new(store))))
    }

    #[must_use]
    pub fn spec(&self) -> &TableSpec {
        &self.inner.spec
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.inner.row_count
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    /// A fresh cursor positioned before the first row.
    #[must_use]
    pub fn iter(&self) -> RowCursor {
        match &self.inner.backing {
            Backing::Memory(rows) => RowCursor::memory(Arc::clone(rows)),
            Backing::File(store) => RowCursor::file(
                Arc::clone(store),
                Arc::clone(&self.inner.registry),
                self.inner.spec.column_count(),
                self.inner.row_count,
            ),
        }
    }

    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        matches!(self.inner.backing, Backing::File(_))
    }

    /// Path of the backing file, `None` for in-memory tables.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        match &self.inner.backing {
            Backing::Memory(_) => None,
            Backing::File(store) => Some(store.path()),
        }
    }

    /// Whether the backing file was generated by the engine and will be deleted with the table.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        match &self.inner.backing {
            Backing::Memory(_) => false,
            Backing::File(store) => store.is_temporary(),
        }
    }

    /// Number of cursor streams currently reading the backing file.
    #[must_use]
    pub fn open_streams(&self) -> usize {
        match &self.inner.backing {
            Backing::Memory(_) => 0,
            Backing::File(store) => store.open_streams(),
        }
    }

    /// Deletes an engine-generated backing file now rather than when the last handle is dropped.
    ///
    /// Cursors that already have their stream open keep reading where the platform allows it;
    /// new cursors fail with an I/O error. Caller-owned files are never deleted.
    pub fn dispose(&self) {
        if let Backing::File(store) = &self.inner.backing {
            store.dispose();
        }
    }
}

impl IntoIterator for &ContainerTable {
    type Item = Result<DataRow>;
    type IntoIter = RowCursor;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
