//! The value model: cells, pluggable value types, rows and table schemas.
//!
//! Value types are identified by a stable [`CellTypeId`] and described by a [`TypeEntry`] in an
//! explicit [`TypeRegistry`]. The registry is the only place that knows how a value is
//! serialized, which family it belongs to for domain tracking, and which types it may stand in
//! for in a column.

mod builtin;
mod cell;
mod data_type;
mod row;
mod spec;

pub use builtin::{BinaryCell, BooleanCell, DateTimeCell, DoubleCell, IntCell, LongCell, StringCell};
pub use cell::{Cell, DataValue};
pub use data_type::{BlobPolicy, CellSerializer, CellTypeId, CompactCodec, CompactValue, JsonCodec, TypeEntry, TypeRegistry, ValueFamily};
pub use row::{Color, DataRow, RowKey};
pub use spec::{ColumnDomain, ColumnSpec, TableSpec};
