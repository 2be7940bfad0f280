//! Process-wide safety net for container resources.
//!
//! Cursors and tables release their files when dropped; that is the normal path. This module only
//! remembers what is still live so a final sweep at process exit can release whatever was leaked.
//! Hold a [`ShutdownGuard`] for the lifetime of `main` to get that sweep.

use super::cursor::CursorFiles;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

const LOG_TARGET: &str = "   reclaim";

/// The file handles of one cursor; `None` once they have been released.
pub(crate) type SharedStream = Arc<Mutex<Option<CursorFiles>>>;

static STREAMS: Mutex<Vec<Weak<Mutex<Option<CursorFiles>>>>> = Mutex::new(Vec::new());
static TEMP_FILES: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Remembers the open files of a cursor without keeping them alive.
pub(crate) fn register_stream(stream: &SharedStream) {
    let mut streams = STREAMS.lock().unwrap_or_else(PoisonError::into_inner);
    streams.retain(|weak| weak.strong_count() > 0);
    streams.push(Arc::downgrade(stream));
}

/// Remembers an engine-generated file that must not outlive the process.
pub(crate) fn register_temp_file(path: &Path) {
    TEMP_FILES.lock().unwrap_or_else(PoisonError::into_inner).push(path.to_path_buf());
}

pub(crate) fn unregister_temp_file(path: &Path) {
    TEMP_FILES.lock().unwrap_or_else(PoisonError::into_inner).retain(|p| p != path);
}

/// Number of cursors whose file handles are registered and still open.
#[must_use]
pub fn live_streams() -> usize {
    STREAMS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|stream| stream.lock().is_ok_and(|s| s.is_some()))
        .count()
}

/// Number of engine-generated files that have not been deleted yet.
#[must_use]
pub fn tracked_temp_files() -> usize {
    TEMP_FILES.lock().unwrap_or_else(PoisonError::into_inner).len()
}

/// What a [`shutdown_sweep`] released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub streams_closed: usize,
    pub files_deleted: usize,
}

/// Force-closes the file handles of every still-open cursor and deletes every still-tracked temp file.
///
/// Failures are logged and otherwise ignored.
pub fn shutdown_sweep() -> SweepSummary {
    let mut summary = SweepSummary::default();

    let streams = core::mem::take(&mut *STREAMS.lock().unwrap_or_else(PoisonError::into_inner));
    for stream in streams.iter().filter_map(Weak::upgrade) {
        match stream.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    summary.streams_closed += 1;
                }
            }
            Err(e) => log::warn!(target: LOG_TARGET, "unable to close a cursor stream during shutdown: {e}"),
        }
    }

    let files = core::mem::take(&mut *TEMP_FILES.lock().unwrap_or_else(PoisonError::into_inner));
    for path in files {
        match std::fs::remove_file(&path) {
            Ok(()) => summary.files_deleted += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(target: LOG_TARGET, "unable to delete temp file '{}' during shutdown: {e}", path.display()),
        }
    }

    log::debug!(
        target: LOG_TARGET,
        "shutdown sweep closed {} streams and deleted {} files",
        summary.streams_closed,
        summary.files_deleted
    );

    summary
}

/// Runs [`shutdown_sweep`] when dropped.
#[derive(Debug, Default)]
#[must_use = "the sweep runs when the guard is dropped"]
pub struct ShutdownGuard {
    _private: (),
}

impl ShutdownGuard {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = shutdown_sweep();
    }
}
