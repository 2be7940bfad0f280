use super::{BlobPolicy, CellTypeId, CompactCodec, CompactValue, DataValue, JsonCodec, TypeEntry, TypeRegistry, ValueFamily};
use crate::Result;
use crate::container::{RowReader, RowWriter};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use core::any::Any;
use core::fmt::{Display, Formatter, Result as FmtResult};
use core::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "      data";

/// Implements [`DataValue`] for a type that already has `PartialEq + Hash`.
///
/// Extra trait methods (the string or numeric views) can be supplied in a trailing block.
macro_rules! data_value {
    ($ty:ty, $id:expr) => {
        data_value!($ty, $id, {});
    };

    ($ty:ty, $id:expr, { $($extra:tt)* }) => {
        impl DataValue for $ty {
            fn cell_type(&self) -> CellTypeId {
                $id
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn eq_value(&self, other: &dyn DataValue) -> bool {
                other.as_any().downcast_ref::<Self>().is_some_and(|other| other == self)
            }

            fn hash_value(&self, mut state: &mut dyn Hasher) {
                self.hash(&mut state);
            }

            $($extra)*
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StringCell(pub CompactString);

impl StringCell {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StringCell {
    fn from(value: &str) -> Self {
        Self(CompactString::from(value))
    }
}

impl From<String> for StringCell {
    fn from(value: String) -> Self {
        Self(CompactString::from(value))
    }
}

impl Display for StringCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

data_value!(StringCell, CellTypeId::STRING, {
    fn as_str(&self) -> Option<&str> {
        Some(&self.0)
    }
});

impl CompactValue for StringCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_str(&self.0)
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self::from(reader.read_str()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntCell(pub i32);

impl Display for IntCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

data_value!(IntCell, CellTypeId::INT, {
    fn as_f64(&self) -> Option<f64> {
        Some(f64::from(self.0))
    }
});

impl CompactValue for IntCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_i64(i64::from(self.0))
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        let value = reader.read_i64()?;
        Ok(Self(i32::try_from(value)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LongCell(pub i64);

impl Display for LongCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

data_value!(LongCell, CellTypeId::LONG, {
    #[expect(clippy::cast_precision_loss, reason = "the numeric view is only used for ordering")]
    fn as_f64(&self) -> Option<f64> {
        Some(self.0 as f64)
    }
});

impl CompactValue for LongCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_i64(self.0)
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self(reader.read_i64()?))
    }
}

/// A double value. Equality and hashing are bitwise so `NaN` can serve as a row key.
#[derive(Debug, Clone, Copy)]
pub struct DoubleCell(pub f64);

impl PartialEq for DoubleCell {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for DoubleCell {}

impl Hash for DoubleCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl Display for DoubleCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

data_value!(DoubleCell, CellTypeId::DOUBLE, {
    fn as_f64(&self) -> Option<f64> {
        Some(self.0)
    }
});

impl CompactValue for DoubleCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_f64(self.0);
        Ok(())
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self(reader.read_f64()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BooleanCell(pub bool);

impl Display for BooleanCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

data_value!(BooleanCell, CellTypeId::BOOLEAN);

impl CompactValue for BooleanCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_bool(self.0);
        Ok(())
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self(reader.read_bool()?))
    }
}

/// An opaque byte string. Spilled containers store these out of line in the blob section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinaryCell(pub Vec<u8>);

impl Display for BinaryCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "<{} bytes>", self.0.len())
    }
}

data_value!(BinaryCell, CellTypeId::BINARY);

impl CompactValue for BinaryCell {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_bytes(&self.0)
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        Ok(Self(reader.read_bytes()?.to_vec()))
    }
}

/// A UTC timestamp. It has no compact layout and is persisted through the JSON fallback codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateTimeCell(pub DateTime<Utc>);

impl Display for DateTimeCell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0.to_rfc3339())
    }
}

data_value!(DateTimeCell, CellTypeId::DATETIME);

pub(super) fn register_builtins(registry: &mut TypeRegistry) {
    let entries = [
        TypeEntry::new(CellTypeId::STRING)
            .family(ValueFamily::Categorical)
            .compact(CompactCodec::<StringCell>::new()),
        TypeEntry::new(CellTypeId::DOUBLE)
            .family(ValueFamily::Numeric)
            .compact(CompactCodec::<DoubleCell>::new()),
        TypeEntry::new(CellTypeId::LONG)
            .parent(CellTypeId::DOUBLE)
            .compact(CompactCodec::<LongCell>::new()),
        TypeEntry::new(CellTypeId::INT)
            .parent(CellTypeId::LONG)
            .compact(CompactCodec::<IntCell>::new()),
        TypeEntry::new(CellTypeId::BOOLEAN).compact(CompactCodec::<BooleanCell>::new()),
        TypeEntry::new(CellTypeId::BINARY)
            .compact(CompactCodec::<BinaryCell>::new())
            .blob(BlobPolicy { compress: true }),
        TypeEntry::new(CellTypeId::DATETIME).fallback(JsonCodec::<DateTimeCell>::new()),
    ];

    for entry in entries {
        let id = entry.id().clone();
        if let Err(e) = registry.register(entry) {
            log::error!(target: LOG_TARGET, "unable to register built-in value type '{id}': {e}");
        }
    }
}
