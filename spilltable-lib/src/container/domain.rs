use crate::data::{Cell, CellTypeId, ColumnDomain, DataRow, TableSpec, TypeRegistry, ValueFamily};
use core::cmp::Ordering;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Distinct values of one column in first-seen order.
#[derive(Debug, Clone, Default)]
struct ValueSet {
    order: Vec<Cell>,
    seen: FxHashSet<Cell>,
}

impl ValueSet {
    fn seeded(values: &[Cell]) -> Self {
        let mut set = Self::default();
        for value in values {
            set.insert(value);
        }
        set
    }

    fn insert(&mut self, value: &Cell) {
        if self.seen.insert(value.clone()) {
            self.order.push(value.clone());
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Clone)]
struct ColumnTracker {
    data_type: CellTypeId,

    /// `None` when values are not tracked or the cap was exceeded.
    values: Option<ValueSet>,

    /// Seeded sets are kept whatever their size.
    capped: bool,

    track_bounds: bool,
    lower: Option<Cell>,
    upper: Option<Cell>,
}

/// Computes per-column domains while rows stream into a container.
///
/// Categorical columns collect their distinct values until a cap is exceeded, at which point the
/// set is dropped for good. Numeric columns keep a running minimum and maximum. Missing cells are
/// ignored.
#[derive(Debug, Clone)]
pub struct DomainTracker {
    registry: Arc<TypeRegistry>,
    columns: Vec<ColumnTracker>,
    max_possible_values: usize,
}

impl DomainTracker {
    /// Creates a tracker for `spec`.
    ///
    /// With `init_domain`, any possible values and bounds already present in `spec` seed the
    /// tracker: seeded value sets are never capped and seeded bounds are tracked regardless of the
    /// column's family.
    #[must_use]
    pub fn new(spec: &TableSpec, registry: Arc<TypeRegistry>, max_possible_values: usize, init_domain: bool) -> Self {
        let columns = spec
            .columns
            .iter()
            .map(|column| {
                let family = registry.family(&column.data_type);
                let domain = &column.domain;

                let seeded_values = domain.values.as_deref().filter(|_| init_domain);
                let (values, capped) = match seeded_values {
                    Some(values) => (Some(ValueSet::seeded(values)), false),
                    None if family == ValueFamily::Categorical => (Some(ValueSet::default()), true),
                    None => (None, false),
                };

                let (lower, upper) = if init_domain {
                    (domain.lower.clone(), domain.upper.clone())
                } else {
                    (None, None)
                };

                ColumnTracker {
                    data_type: column.data_type.clone(),
                    values,
                    capped,
                    track_bounds: family == ValueFamily::Numeric || lower.is_some() || upper.is_some(),
                    lower,
                    upper,
                }
            })
            .collect();

        Self {
            registry,
            columns,
            max_possible_values,
        }
    }

    #[must_use]
    pub const fn max_possible_values(&self) -> usize {
        self.max_possible_values
    }

    /// Changes the cap, immediately dropping capped sets that are already larger.
    pub fn set_max_possible_values(&mut self, max: usize) {
        self.max_possible_values = max;
        for column in &mut self.columns {
            if column.capped && column.values.as_ref().is_some_and(|set| set.len() > max) {
                column.values = None;
            }
        }
    }

    pub fn observe_row(&mut self, row: &DataRow) {
        for (index, cell) in row.cells.iter().enumerate() {
            self.observe(index, cell);
        }
    }

    pub fn observe(&mut self, column_index: usize, cell: &Cell) {
        if cell.is_missing() {
            return;
        }

        let Some(column) = self.columns.get_mut(column_index) else {
            return;
        };

        if let Some(set) = column.values.as_mut() {
            set.insert(cell);
            if column.capped && set.len() > self.max_possible_values {
                column.values = None;
            }
        }

        if column.track_bounds {
            let registry = &self.registry;
            let declared = &column.data_type;

            match &column.lower {
                Some(lower) if registry.compare(declared, cell, lower) != Ordering::Less => {}
                _ => column.lower = Some(cell.clone()),
            }

            match &column.upper {
                Some(upper) if registry.compare(declared, cell, upper) != Ordering::Greater => {}
                _ => column.upper = Some(cell.clone()),
            }
        }
    }

    /// Folds the collected domains into `spec`, consuming the tracker.
    #[must_use]
    pub fn finalize(self, spec: &TableSpec) -> TableSpec {
        let mut result = spec.clone();
        for (column, tracker) in result.columns.iter_mut().zip(self.columns) {
            column.domain = ColumnDomain {
                values: tracker.values.map(|set| set.order),
                lower: tracker.lower,
                upper: tracker.upper,
            };
        }
        result
    }
}
