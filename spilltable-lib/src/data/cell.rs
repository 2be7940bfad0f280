use super::CellTypeId;
use core::any::Any;
use core::fmt::{Debug, Display, Formatter, Result as FmtResult};
use core::hash::{Hash, Hasher};
use std::sync::Arc;

/// A concrete, non-missing cell value.
///
/// Value types are pluggable: the engine never enumerates them. Everything it needs to know
/// about a value is reachable through this trait and the [`TypeRegistry`](super::TypeRegistry)
/// entry registered under [`DataValue::cell_type`].
pub trait DataValue: Any + Debug + Display + Send + Sync {
    /// The stable identifier of this value's concrete type.
    fn cell_type(&self) -> CellTypeId;

    fn as_any(&self) -> &dyn Any;

    /// Equality against another value of any type. Values of different concrete types are never equal.
    fn eq_value(&self, other: &dyn DataValue) -> bool;

    /// Feeds this value into a hasher. Must agree with [`DataValue::eq_value`].
    fn hash_value(&self, state: &mut dyn Hasher);

    /// String view for values of the categorical family.
    fn as_str(&self) -> Option<&str> {
        None
    }

    /// Floating point view for values of the numeric family.
    fn as_f64(&self) -> Option<f64> {
        None
    }
}

/// One column's value within one row.
#[derive(Clone, Default)]
pub enum Cell {
    #[default]
    Missing,
    Value(Arc<dyn DataValue>),
}

impl Cell {
    /// Wraps a concrete value.
    pub fn new(value: impl DataValue) -> Self {
        Self::Value(Arc::new(value))
    }

    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    #[must_use]
    pub fn value(&self) -> Option<&dyn DataValue> {
        match self {
            Self::Missing => None,
            Self::Value(v) => Some(v.as_ref()),
        }
    }

    /// The concrete type of the value, `None` for missing cells.
    #[must_use]
    pub fn cell_type(&self) -> Option<CellTypeId> {
        self.value().map(DataValue::cell_type)
    }

    /// Downcasts the value to a concrete type.
    #[must_use]
    pub fn downcast_ref<T: DataValue>(&self) -> Option<&T> {
        self.value().and_then(|v| v.as_any().downcast_ref::<T>())
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(DataValue::as_str)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.value().and_then(DataValue::as_f64)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Value(a), Self::Value(b)) => a.eq_value(b.as_ref()),
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Missing => state.write_u8(0),
            Self::Value(v) => {
                state.write_u8(1);
                v.hash_value(state);
            }
        }
    }
}

impl Debug for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Missing => f.write_str("?"),
            Self::Value(v) => Debug::fmt(v, f),
        }
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Missing => f.write_str("?"),
            Self::Value(v) => Display::fmt(v, f),
        }
    }
}

impl<T: DataValue> From<T> for Cell {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
