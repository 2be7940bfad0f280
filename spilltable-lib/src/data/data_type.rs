use super::{Cell, DataValue};
use crate::Result;
use crate::container::{RowReader, RowWriter};
use core::any::type_name;
use core::cmp::Ordering;
use core::fmt::{Debug, Display, Formatter, Result as FmtResult};
use core::marker::PhantomData;
use ohno::{app_err, bail};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;

/// Stable identifier of a concrete value type.
///
/// This is what the type-tag dictionary of a container stores and persists, so it must not
/// change between the process that writes a container file and the one that reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellTypeId(Cow<'static, str>);

impl CellTypeId {
    /// The root of the type hierarchy; a column declared with it accepts any value.
    pub const CELL: Self = Self::from_static("cell");
    pub const STRING: Self = Self::from_static("string");
    pub const DOUBLE: Self = Self::from_static("double");
    pub const LONG: Self = Self::from_static("long");
    pub const INT: Self = Self::from_static("int");
    pub const BOOLEAN: Self = Self::from_static("boolean");
    pub const BINARY: Self = Self::from_static("binary");
    pub const DATETIME: Self = Self::from_static("datetime");

    #[must_use]
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CellTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Families of value types the domain tracker knows how to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueFamily {
    /// No domain information is tracked.
    Generic,

    /// String-like values; the tracker keeps a bounded set of possible values.
    Categorical,

    /// Number-like values; the tracker keeps a running minimum and maximum.
    Numeric,
}

/// How a blob (large object) type is stored when a container spills to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPolicy {
    pub compress: bool,
}

/// Converts a concrete value to and from its binary payload.
pub trait CellSerializer: Debug + Send + Sync {
    fn serialize(&self, value: &dyn DataValue, writer: &mut RowWriter) -> Result<()>;
    fn deserialize(&self, reader: &mut RowReader<'_>) -> Result<Cell>;
}

/// A value type that knows its own compact binary layout.
pub trait CompactValue: DataValue + Sized {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()>;
    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self>;
}

/// [`CellSerializer`] for any [`CompactValue`].
#[derive(Debug)]
pub struct CompactCodec<T>(PhantomData<fn() -> T>);

impl<T> CompactCodec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for CompactCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CompactValue> CellSerializer for CompactCodec<T> {
    fn serialize(&self, value: &dyn DataValue, writer: &mut RowWriter) -> Result<()> {
        let value = value
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| app_err!("value of type '{}' handed to the codec for {}", value.cell_type(), type_name::<T>()))?;
        value.write_compact(writer)
    }

    fn deserialize(&self, reader: &mut RowReader<'_>) -> Result<Cell> {
        Ok(Cell::new(T::read_compact(reader)?))
    }
}

/// Generic fallback codec: stores the value as JSON through `serde`.
#[derive(Debug)]
pub struct JsonCodec<T>(PhantomData<fn() -> T>);

impl<T> JsonCodec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DataValue + Serialize + DeserializeOwned> CellSerializer for JsonCodec<T> {
    fn serialize(&self, value: &dyn DataValue, writer: &mut RowWriter) -> Result<()> {
        let value = value
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| app_err!("value of type '{}' handed to the JSON codec for {}", value.cell_type(), type_name::<T>()))?;
        let json = serde_json::to_vec(value)?;
        writer.write_bytes(&json)
    }

    fn deserialize(&self, reader: &mut RowReader<'_>) -> Result<Cell> {
        let value: T = serde_json::from_slice(reader.read_bytes()?)?;
        Ok(Cell::new(value))
    }
}

/// Everything the engine knows about one concrete value type.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    id: CellTypeId,
    parent: Option<CellTypeId>,
    family: Option<ValueFamily>,
    compact: Option<Arc<dyn CellSerializer>>,
    fallback: Option<Arc<dyn CellSerializer>>,
    blob: Option<BlobPolicy>,
}

impl TypeEntry {
    #[must_use]
    pub const fn new(id: CellTypeId) -> Self {
        Self {
            id,
            parent: None,
            family: None,
            compact: None,
            fallback: None,
            blob: None,
        }
    }

    /// Declares this type a subtype of `parent`. Types without a parent hang off [`CellTypeId::CELL`].
    #[must_use]
    pub fn parent(mut self, parent: CellTypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the family explicitly; otherwise it is inherited from the parent chain.
    #[must_use]
    pub const fn family(mut self, family: ValueFamily) -> Self {
        self.family = Some(family);
        self
    }

    #[must_use]
    pub fn compact(mut self, serializer: impl CellSerializer + 'static) -> Self {
        self.compact = Some(Arc::new(serializer));
        self
    }

    #[must_use]
    pub fn fallback(mut self, serializer: impl CellSerializer + 'static) -> Self {
        self.fallback = Some(Arc::new(serializer));
        self
    }

    #[must_use]
    pub const fn blob(mut self, policy: BlobPolicy) -> Self {
        self.blob = Some(policy);
        self
    }

    #[must_use]
    pub const fn id(&self) -> &CellTypeId {
        &self.id
    }

    #[must_use]
    pub fn compact_serializer(&self) -> Option<&dyn CellSerializer> {
        self.compact.as_deref()
    }

    #[must_use]
    pub fn fallback_serializer(&self) -> Option<&dyn CellSerializer> {
        self.fallback.as_deref()
    }

    #[must_use]
    pub const fn blob_policy(&self) -> Option<BlobPolicy> {
        self.blob
    }
}

/// Explicit registry of value types, keyed by their stable identifier.
///
/// The registry is built once at startup and then shared read-only (usually behind an `Arc`)
/// by every container and cursor.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: FxHashMap<CellTypeId, Arc<TypeEntry>>,
}

impl TypeRegistry {
    /// Creates a registry that only knows the root type.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = FxHashMap::default();
        let _ = entries.insert(CellTypeId::CELL, Arc::new(TypeEntry::new(CellTypeId::CELL).family(ValueFamily::Generic)));
        Self { entries }
    }

    /// Creates a registry with all built-in value types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Adds a value type. Parents must be registered before their children.
    pub fn register(&mut self, entry: TypeEntry) -> Result<()> {
        if self.entries.contains_key(&entry.id) {
            bail!("value type '{}' is already registered", entry.id);
        }

        let mut entry = entry;
        let parent = entry.parent.get_or_insert(CellTypeId::CELL);
        if !self.entries.contains_key(parent) {
            bail!("parent type '{parent}' of value type '{}' is not registered", entry.id);
        }

        let _ = self.entries.insert(entry.id.clone(), Arc::new(entry));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &CellTypeId) -> Option<&Arc<TypeEntry>> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &CellTypeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Walks from `id` up to the root, starting with `id` itself.
    fn ancestors<'a>(&'a self, id: &'a CellTypeId) -> impl Iterator<Item = &'a TypeEntry> + 'a {
        let mut next = self.entries.get(id).map(AsRef::as_ref);
        core::iter::from_fn(move || {
            let current = next?;
            next = current.parent.as_ref().and_then(|p| self.entries.get(p)).map(AsRef::as_ref);
            Some(current)
        })
    }

    /// Is a value of type `actual` allowed in a column declared as `declared`?
    #[must_use]
    pub fn is_compatible(&self, declared: &CellTypeId, actual: &CellTypeId) -> bool {
        if *declared == CellTypeId::CELL || declared == actual {
            return true;
        }

        self.ancestors(actual).any(|entry| entry.id == *declared)
    }

    /// The value family of `id`, inherited from the closest ancestor that declares one.
    #[must_use]
    pub fn family(&self, id: &CellTypeId) -> ValueFamily {
        self.ancestors(id).find_map(|entry| entry.family).unwrap_or(ValueFamily::Generic)
    }

    /// Orders two non-missing cells using the comparison rule of the declared column type.
    #[must_use]
    pub fn compare(&self, declared: &CellTypeId, a: &Cell, b: &Cell) -> Ordering {
        match self.family(declared) {
            ValueFamily::Numeric => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
            ValueFamily::Categorical => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
            ValueFamily::Generic => Ordering::Equal,
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::data::{DoubleCell, IntCell, StringCell};

    #[test]
    fn builtin_hierarchy_compatibility() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.is_compatible(&CellTypeId::DOUBLE, &CellTypeId::INT));
        assert!(registry.is_compatible(&CellTypeId::LONG, &CellTypeId::INT));
        assert!(registry.is_compatible(&CellTypeId::CELL, &CellTypeId::STRING));
        assert!(!registry.is_compatible(&CellTypeId::INT, &CellTypeId::DOUBLE));
        assert!(!registry.is_compatible(&CellTypeId::STRING, &CellTypeId::INT));
    }

    #[test]
    fn unknown_types_only_fit_the_root() {
        let registry = TypeRegistry::with_builtins();
        let unknown = CellTypeId::new("mystery");
        assert!(registry.is_compatible(&CellTypeId::CELL, &unknown));
        assert!(!registry.is_compatible(&CellTypeId::STRING, &unknown));
    }

    #[test]
    fn families_are_inherited() {
        let registry = TypeRegistry::with_builtins();
        assert_eq!(registry.family(&CellTypeId::INT), ValueFamily::Numeric);
        assert_eq!(registry.family(&CellTypeId::STRING), ValueFamily::Categorical);
        assert_eq!(registry.family(&CellTypeId::BOOLEAN), ValueFamily::Generic);
        assert_eq!(registry.family(&CellTypeId::new("mystery")), ValueFamily::Generic);
    }

    #[test]
    fn register_rejects_duplicates_and_orphans() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(TypeEntry::new(CellTypeId::STRING)).unwrap_err();
        registry
            .register(TypeEntry::new(CellTypeId::new("child")).parent(CellTypeId::new("nowhere")))
            .unwrap_err();
        registry
            .register(TypeEntry::new(CellTypeId::new("percent")).parent(CellTypeId::DOUBLE))
            .unwrap();
        assert_eq!(registry.family(&CellTypeId::new("percent")), ValueFamily::Numeric);
    }

    #[test]
    fn compare_uses_declared_family() {
        let registry = TypeRegistry::with_builtins();
        let two = Cell::from(IntCell(2));
        let half = Cell::from(DoubleCell(0.5));
        assert_eq!(registry.compare(&CellTypeId::DOUBLE, &two, &half), Ordering::Greater);

        let a = Cell::from(StringCell::from("a"));
        let b = Cell::from(StringCell::from("b"));
        assert_eq!(registry.compare(&CellTypeId::STRING, &a, &b), Ordering::Less);
    }
}
