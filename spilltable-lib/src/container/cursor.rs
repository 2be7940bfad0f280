use super::error::illegal_state;
use super::format::{DataStream, FileBlobSource};
use super::reclaim::{self, SharedStream};
use super::row_codec::RowDecoder;
use super::table::FileStore;
use crate::Result;
use crate::data::{DataRow, TypeRegistry};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
enum Source {
    Memory {
        rows: Arc<[DataRow]>,
        next: usize,
    },
    File {
        store: Arc<FileStore>,
        registry: Arc<TypeRegistry>,
        width: usize,
        remaining: u64,
        stream: Option<SharedStream>,
    },
}

/// The file handles a cursor reads through: the data section and, once a blob is needed, the blob section.
///
/// Both live behind one shared slot so that releasing the slot closes every handle the cursor holds.
#[derive(Debug)]
pub(crate) struct CursorFiles {
    data: DataStream,
    blobs: FileBlobSource,
}

impl CursorFiles {
    fn open(store: &FileStore) -> Result<Self> {
        Ok(Self {
            data: DataStream::open(store.path(), store.header())?,
            blobs: FileBlobSource::new(store.path().to_path_buf(), store.header()),
        })
    }
}

/// A position within the rows of a closed container.
///
/// Yields `Err` at most once: after a failure the cursor is exhausted. A file-backed cursor opens
/// its own file handles on the first call to `next` (the blob section only once a blob is read)
/// and releases them as soon as the last row has been read, when [`close`](Self::close) is called,
/// or when the cursor is dropped.
#[derive(Debug)]
pub struct RowCursor {
    source: Source,
    finished: bool,
    degraded: u64,
}

impl RowCursor {
    pub(crate) const fn memory(rows: Arc<[DataRow]>) -> Self {
        Self {
            source: Source::Memory { rows, next: 0 },
            finished: false,
            degraded: 0,
        }
    }

    pub(crate) const fn file(store: Arc<FileStore>, registry: Arc<TypeRegistry>, width: usize, row_count: u64) -> Self {
        Self {
            source: Source::File {
                store,
                registry,
                width,
                remaining: row_count,
                stream: None,
            },
            finished: false,
            degraded: 0,
        }
    }

    /// Number of cells this cursor has replaced by a missing value because they could not be decoded.
    #[must_use]
    pub const fn degraded_cells(&self) -> u64 {
        self.degraded
    }

    /// Whether this cursor currently holds open file handles.
    #[must_use]
    pub const fn has_open_stream(&self) -> bool {
        matches!(self.source, Source::File { stream: Some(_), .. })
    }

    /// Stops the scan and releases the file handles, if any.
    pub fn close(&mut self) {
        self.finished = true;
        self.release();
    }

    fn release(&mut self) {
        if let Source::File { store, stream, .. } = &mut self.source
            && let Some(stream) = stream.take()
        {
            drop(stream.lock().unwrap_or_else(PoisonError::into_inner).take());
            store.stream_closed();
        }
    }

    fn next_file_row(&mut self) -> Result<Option<DataRow>> {
        let Source::File {
            store,
            registry,
            width,
            remaining,
            stream,
        } = &mut self.source
        else {
            return Ok(None);
        };

        if *remaining == 0 {
            return Ok(None);
        }

        let shared = match stream {
            Some(shared) => Arc::clone(shared),
            None => {
                let opened: SharedStream = Arc::new(Mutex::new(Some(CursorFiles::open(store)?)));
                reclaim::register_stream(&opened);
                store.stream_opened();
                *stream = Some(Arc::clone(&opened));
                opened
            }
        };

        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        let CursorFiles { data, blobs } = guard
            .as_mut()
            .ok_or_else(|| illegal_state("the cursor stream was force-closed"))?;

        let body = data.next_body()?;
        let mut decoder = RowDecoder::new(registry, store.dictionary(), Some(blobs));
        let row = decoder.decode_row(body, *width)?;
        self.degraded += decoder.degraded();
        *remaining -= 1;

        Ok(Some(row))
    }
}

impl Iterator for RowCursor {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let item = match &mut self.source {
            Source::Memory { rows, next } => {
                let row = rows.get(*next).cloned();
                *next += 1;
                row.map(Ok)
            }
            Source::File { .. } => self.next_file_row().transpose(),
        };

        let exhausted = match &self.source {
            Source::Memory { rows, next } => *next >= rows.len(),
            Source::File { remaining, .. } => *remaining == 0,
        };

        if exhausted || !matches!(item, Some(Ok(_))) {
            self.finished = true;
            self.release();
        }

        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }

        let remaining = match &self.source {
            Source::Memory { rows, next } => rows.len().saturating_sub(*next),
            Source::File { remaining, .. } => usize::try_from(*remaining).unwrap_or(usize::MAX),
        };
        (0, Some(remaining))
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        self.release();
    }
}
