//! The row-buffering storage engine.
//!
//! A [`DataContainer`] is opened with a [`TableSpec`](crate::data::TableSpec), fed rows one at a
//! time, and closed into a [`ContainerTable`]. Rows are kept in memory until the configured
//! capacity is exceeded; from then on the oldest rows are streamed into a container file.
//!
//! # Container File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Header (40 bytes)                                    │
//! │   - FORMAT_MAGIC: u64                                │
//! │   - FORMAT_VERSION: u32                              │
//! │   - flags: u32 (reserved, zero)                      │
//! │   - data_len, blob_len, spec_len: u64                │
//! ├──────────────────────────────────────────────────────┤
//! │ Data section                                         │
//! │   - Concatenated zstd frames of framed rows          │
//! │   - A new frame starts every `rows_per_frame` rows   │
//! ├──────────────────────────────────────────────────────┤
//! │ Blob section                                         │
//! │   - Out-of-line payloads of blob value types         │
//! ├──────────────────────────────────────────────────────┤
//! │ Spec section                                         │
//! │   - Row count, type dictionary, column definitions   │
//! │     and domains                                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! All integers in the header are little-endian. The header is written as a placeholder when the
//! file is created and patched once every section has been written, so a file that was never
//! closed is rejected on open.

mod cursor;
mod data_container;
mod domain;
mod error;
mod format;
mod io;
pub mod reclaim;
mod row_codec;
mod row_reader;
mod row_writer;
mod spill_buffer;
mod table;
mod tag_dictionary;

pub use cursor::RowCursor;
pub use data_container::DataContainer;
pub use domain::DomainTracker;
pub use error::{ContainerError, ErrorKind, error_kind};
pub use format::{FORMAT_MAGIC, FORMAT_VERSION, HEADER_SIZE, WriterOptions};
pub use io::{InMemoryRows, NoProgress, Progress, RowSource, cache, read_from_file, write_to_file};
pub use row_codec::{BlobAddress, BlobSink, BlobSource, ROW_SEPARATOR, RowDecoder, RowEncoder};
pub use row_reader::{PaddedBytes, READ_PADDING, RowReader};
pub use row_writer::RowWriter;
pub use spill_buffer::SpillBuffer;
pub use table::ContainerTable;
pub use tag_dictionary::{FALLBACK_TAG, FIRST_TYPE_TAG, FrozenDictionary, LAST_TYPE_TAG, MISSING_TAG, TAG_BUDGET, TagDictionary};
