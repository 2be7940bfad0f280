use super::error::illegal_state;
use super::format::{ContainerWriter, WriterOptions};
use super::table::{Backing, FileStore, TempContainerFile};
use crate::Result;
use crate::data::{DataRow, TableSpec, TypeRegistry};
use chrono::Local;
use ohno::{EnrichableExt, IntoAppError};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TARGET: &str = "    buffer";

/// Keeps the most recent rows in memory and spills the oldest ones to a container file.
///
/// No file is touched until the first spill. Rows always reach their final destination in the
/// order they were appended.
#[derive(Debug)]
pub struct SpillBuffer {
    registry: Arc<TypeRegistry>,
    options: WriterOptions,
    capacity: usize,
    queue: VecDeque<DataRow>,
    destination: Option<PathBuf>,
    writer: Option<ContainerWriter>,
    temp: Option<TempContainerFile>,
    row_count: u64,
    failed: bool,
}

impl SpillBuffer {
    /// Buffer that keeps up to `capacity` rows in memory and spills to an engine-generated temp file.
    #[must_use]
    pub fn new(capacity: usize, registry: Arc<TypeRegistry>, options: WriterOptions) -> Self {
        Self {
            registry,
            options,
            capacity,
            queue: VecDeque::new(),
            destination: None,
            writer: None,
            temp: None,
            row_count: 0,
            failed: false,
        }
    }

    /// Buffer that writes every row straight into the caller-owned file at `path`.
    ///
    /// The file is created on the first row (or on close) and is never deleted by the engine.
    #[must_use]
    pub fn with_file(path: impl Into<PathBuf>, registry: Arc<TypeRegistry>, options: WriterOptions) -> Self {
        let mut buffer = Self::new(0, registry, options);
        buffer.destination = Some(path.into());
        buffer
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows appended so far.
    #[must_use]
    pub const fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Rows currently held in memory.
    #[must_use]
    pub fn in_memory_len(&self) -> usize {
        self.queue.len()
    }

    /// Rows written to the container file so far.
    #[must_use]
    pub fn spilled_rows(&self) -> u64 {
        self.writer.as_ref().map_or(0, ContainerWriter::row_count)
    }

    #[must_use]
    pub const fn is_spilling(&self) -> bool {
        self.writer.is_some()
    }

    /// Path of the container file once spilling has started.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.writer.as_ref().map(ContainerWriter::path)
    }

    pub fn append(&mut self, row: DataRow) -> Result<()> {
        if self.failed {
            return Err(illegal_state("the spill buffer failed earlier and cannot accept more rows"));
        }

        self.queue.push_back(row);
        self.row_count += 1;

        while self.queue.len() > self.capacity {
            if let Some(oldest) = self.queue.pop_front()
                && let Err(e) = self.spill(&oldest)
            {
                self.failed = true;
                return Err(e);
            }
        }

        Ok(())
    }

    fn spill(&mut self, row: &DataRow) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.create_writer()?);
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(illegal_state("no container writer to spill into"));
        };
        writer.write_row(row)
    }

    fn create_writer(&mut self) -> Result<ContainerWriter> {
        let (file, path) = if let Some(path) = &self.destination {
            let file = File::create(path).into_app_err_with(|| format!("unable to create container file '{}'", path.display()))?;
            (file, path.clone())
        } else {
            let prefix = format!("spilltable_container_{}_", Local::now().format("%Y%m%d"));
            let mut builder = tempfile::Builder::new();
            let _ = builder.prefix(&prefix).suffix(".tmp");
            let named = match &self.options.temp_dir {
                Some(dir) => builder.tempfile_in(dir),
                None => builder.tempfile(),
            }
            .into_app_err("unable to create temp file for spilled rows")?;

            let (file, temp_path) = named.into_parts();
            let path = temp_path.to_path_buf();
            self.temp = Some(TempContainerFile::new(temp_path));
            (file, path)
        };

        log::debug!(target: LOG_TARGET, "spilling rows to '{}'", path.display());
        ContainerWriter::new(file, path, Arc::clone(&self.registry), self.options.clone())
    }

    /// Finalizes the buffer into the immutable backing of a closed container.
    ///
    /// Without any spill the queued rows become an in-memory backing and no file is touched.
    /// Otherwise the queue is drained to the file and the spec section is written.
    pub(crate) fn close(mut self, spec: &TableSpec) -> Result<Backing> {
        if self.failed {
            return Err(illegal_state("the spill buffer failed earlier and cannot be closed"));
        }

        if self.writer.is_none() && self.destination.is_none() {
            let rows: Arc<[DataRow]> = core::mem::take(&mut self.queue).into_iter().collect();
            log::debug!(target: LOG_TARGET, "closed in memory with {} rows", rows.len());
            return Ok(Backing::Memory(rows));
        }

        for row in core::mem::take(&mut self.queue) {
            self.spill(&row)?;
        }

        if self.writer.is_none() {
            self.writer = Some(self.create_writer()?);
        }

        let Some(writer) = self.writer.take() else {
            return Err(illegal_state("no container writer to finish"));
        };

        let path = writer.path().to_path_buf();
        let finished = writer
            .finish(spec)
            .map_err(|e| e.enrich_with(|| format!("unable to finish container file '{}'", path.display())))?;
        if finished.row_count != self.row_count {
            return Err(illegal_state(format!(
                "container file '{}' holds {} rows but {} were appended",
                path.display(),
                finished.row_count,
                self.row_count
            )));
        }

        log::debug!(target: LOG_TARGET, "closed into '{}' with {} rows", path.display(), finished.row_count);
        let store = FileStore::new(path, self.temp.take(), finished.header, finished.dictionary);
        Ok(Backing::File(Arc::new(store)))
    }
}

impl Drop for SpillBuffer {
    fn drop(&mut self) {
        if let Some(temp) = &self.temp
            && let Some(path) = temp.path()
        {
            log::debug!(target: LOG_TARGET, "abandoning spill file '{}'", path.display());
        }
    }
}
