use super::{Cell, CellTypeId};
use std::collections::BTreeMap;

/// Advisory summary of the values seen in a column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDomain {
    /// Distinct values in first-seen order, or `None` when not tracked or over the cap.
    pub values: Option<Vec<Cell>>,
    pub lower: Option<Cell>,
    pub upper: Option<Cell>,
}

impl ColumnDomain {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.values.is_none() && self.lower.is_none() && self.upper.is_none()
    }

    #[must_use]
    pub fn with_values(mut self, values: Vec<Cell>) -> Self {
        self.values = Some(values);
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, lower: Cell, upper: Cell) -> Self {
        self.lower = Some(lower);
        self.upper = Some(upper);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: CellTypeId,
    pub domain: ColumnDomain,

    /// Free-form annotations, persisted verbatim.
    pub properties: BTreeMap<String, String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: CellTypeId) -> Self {
        Self {
            name: name.into(),
            data_type,
            domain: ColumnDomain::default(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: ColumnDomain) -> Self {
        self.domain = domain;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.properties.insert(key.into(), value.into());
        self
    }
}

/// Ordered column definitions of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSpec {
    pub name: Option<String>,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    #[must_use]
    pub const fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { name: None, columns }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The same columns with every domain cleared.
    #[must_use]
    pub fn without_domains(&self) -> Self {
        let mut spec = self.clone();
        for column in &mut spec.columns {
            column.domain = ColumnDomain::default();
        }
        spec
    }
}
