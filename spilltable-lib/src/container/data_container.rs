use super::error::{illegal_state, schema_violation};
use super::{ContainerTable, DomainTracker, SpillBuffer};
use crate::Result;
use crate::data::{Cell, DataRow, TableSpec, TypeRegistry};
use crate::settings::ContainerSettings;
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::Arc;

const LOG_TARGET: &str = " container";

#[derive(Debug)]
struct Build {
    spec: TableSpec,
    buffer: SpillBuffer,
    domain: DomainTracker,
    keys: FxHashSet<Cell>,
}

#[derive(Debug)]
enum State {
    Unopened,
    Open(Box<Build>),
    Closed(ContainerTable),
}

/// Builds a table by streaming rows into it.
///
/// The lifecycle is `open` → `append`* → `close`, after which [`table`](Self::table) hands out the
/// read-only result. Rows are validated against the table spec as they arrive, row keys must be unique,
/// and per-column domains are computed along the way.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use spilltable_lib::container::DataContainer;
/// # use spilltable_lib::data::{Cell, CellTypeId, ColumnSpec, DataRow, IntCell, RowKey, TableSpec, TypeRegistry};
/// # use spilltable_lib::settings::ContainerSettings;
/// # fn main() -> spilltable_lib::Result<()> {
/// let mut container = DataContainer::new(Arc::new(TypeRegistry::with_builtins()), ContainerSettings::default());
/// container.open(TableSpec::new(vec![ColumnSpec::new("n", CellTypeId::INT)]))?;
/// container.append(DataRow::new(RowKey::named("Row0"), vec![Cell::from(IntCell(7))]))?;
/// container.close()?;
///
/// for row in &container.table()? {
///     println!("{}", row?.key);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DataContainer {
    registry: Arc<TypeRegistry>,
    settings: ContainerSettings,
    capacity_rows: Option<usize>,
    destination: Option<PathBuf>,
    max_possible_values: usize,
    state: State,
}

impl DataContainer {
    /// A container whose in-memory capacity is derived from `settings.max_cells_in_memory`.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, settings: ContainerSettings) -> Self {
        Self {
            registry,
            max_possible_values: settings.max_possible_values,
            settings,
            capacity_rows: None,
            destination: None,
            state: State::Unopened,
        }
    }

    /// Keeps exactly `rows` rows in memory instead of deriving the capacity from the settings.
    #[must_use]
    pub const fn with_capacity_rows(mut self, rows: usize) -> Self {
        self.capacity_rows = Some(rows);
        self
    }

    /// Writes every row to the caller-owned file at `path`, which is never deleted by the engine.
    #[must_use]
    pub fn writing_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed(_))
    }

    /// Starts a new build, discarding any build in progress.
    pub fn open(&mut self, spec: TableSpec) -> Result<()> {
        self.open_with_domain(spec, false)
    }

    /// Starts a new build.
    ///
    /// With `init_domain`, domain information already present in `spec` is kept and extended
    /// rather than recomputed from scratch. Seeded possible values are not subject to the cap.
    pub fn open_with_domain(&mut self, spec: TableSpec, init_domain: bool) -> Result<()> {
        if self.is_closed() {
            return Err(illegal_state("a closed container cannot be reopened"));
        }

        self.validate_spec(&spec)?;

        if let State::Open(previous) = core::mem::replace(&mut self.state, State::Unopened) {
            log::debug!(
                target: LOG_TARGET,
                "abandoning build with {} rows to open a new one",
                previous.buffer.row_count()
            );
        }

        let buffer = match &self.destination {
            Some(path) => SpillBuffer::with_file(path.clone(), Arc::clone(&self.registry), self.settings.writer_options()),
            None => {
                let capacity = self
                    .capacity_rows
                    .unwrap_or_else(|| self.settings.capacity_rows(spec.column_count()));
                SpillBuffer::new(capacity, Arc::clone(&self.registry), self.settings.writer_options())
            }
        };

        let domain = DomainTracker::new(&spec, Arc::clone(&self.registry), self.max_possible_values, init_domain);

        log::debug!(
            target: LOG_TARGET,
            "opened container with {} columns, keeping up to {} rows in memory",
            spec.column_count(),
            buffer.capacity()
        );

        self.state = State::Open(Box::new(Build {
            spec,
            buffer,
            domain,
            keys: FxHashSet::default(),
        }));

        Ok(())
    }

    fn validate_spec(&self, spec: &TableSpec) -> Result<()> {
        let mut names = FxHashSet::default();
        for column in &spec.columns {
            if !self.registry.contains(&column.data_type) {
                return Err(schema_violation(format!(
                    "column '{}' is declared with unknown value type '{}'",
                    column.name, column.data_type
                )));
            }

            if !names.insert(column.name.as_str()) {
                return Err(schema_violation(format!("column name '{}' appears more than once", column.name)));
            }
        }

        Ok(())
    }

    /// Adds one row.
    ///
    /// A row that does not fit the table spec or repeats an existing key is rejected and the container
    /// stays open. A failure while spilling to disk is fatal to the build.
    pub fn append(&mut self, row: DataRow) -> Result<()> {
        let State::Open(build) = &mut self.state else {
            return Err(illegal_state("rows can only be appended to an open container"));
        };

        let width = build.spec.column_count();
        if row.width() != width {
            return Err(schema_violation(format!(
                "row '{}' has {} cells but the table has {width} columns",
                row.key,
                row.width()
            )));
        }

        for (column, cell) in build.spec.columns.iter().zip(&row.cells) {
            if let Some(actual) = cell.cell_type()
                && !self.registry.is_compatible(&column.data_type, &actual)
            {
                return Err(schema_violation(format!(
                    "row '{}' has a '{actual}' value in column '{}' of type '{}'",
                    row.key, column.name, column.data_type
                )));
            }
        }

        if build.keys.contains(&row.key.id) {
            return Err(schema_violation(format!("duplicate row key '{}'", row.key)));
        }

        build.domain.observe_row(&row);

        let key = row.key.id.clone();
        build.buffer.append(row)?;
        let _ = build.keys.insert(key);

        Ok(())
    }

    /// Finalizes the build. Calling it again on a closed container does nothing.
    pub fn close(&mut self) -> Result<()> {
        let build = match core::mem::replace(&mut self.state, State::Unopened) {
            State::Open(build) => build,
            State::Closed(table) => {
                self.state = State::Closed(table);
                return Ok(());
            }
            State::Unopened => return Err(illegal_state("close called on a container that was never opened")),
        };

        let Build { spec, buffer, domain, .. } = *build;
        let spec = domain.finalize(&spec);
        let row_count = buffer.row_count();
        let backing = buffer.close(&spec)?;

        let table = ContainerTable::new(spec, row_count, Arc::clone(&self.registry), backing);
        log::debug!(
            target: LOG_TARGET,
            "closed container with {row_count} rows ({})",
            if table.is_file_backed() { "file" } else { "memory" }
        );

        self.state = State::Closed(table);
        Ok(())
    }

    /// The read-only table of a closed container.
    pub fn table(&self) -> Result<ContainerTable> {
        match &self.state {
            State::Closed(table) => Ok(table.clone()),
            _ => Err(illegal_state("the table is only available once the container is closed")),
        }
    }

    /// Rows appended so far, or the final row count once closed.
    pub fn row_count(&self) -> Result<u64> {
        match &self.state {
            State::Open(build) => Ok(build.buffer.row_count()),
            State::Closed(table) => Ok(table.row_count()),
            State::Unopened => Err(illegal_state("the container has not been opened")),
        }
    }

    /// The declared spec while open, or the final spec with computed domains once closed.
    #[must_use]
    pub fn spec(&self) -> Option<&TableSpec> {
        match &self.state {
            State::Open(build) => Some(&build.spec),
            State::Closed(table) => Some(table.spec()),
            State::Unopened => None,
        }
    }

    /// The spill buffer of the build in progress.
    #[must_use]
    pub fn buffer(&self) -> Option<&SpillBuffer> {
        match &self.state {
            State::Open(build) => Some(&build.buffer),
            _ => None,
        }
    }

    #[must_use]
    pub const fn max_possible_values(&self) -> usize {
        self.max_possible_values
    }

    /// Changes the possible-values cap, including for the build in progress.
    pub fn set_max_possible_values(&mut self, max: usize) {
        self.max_possible_values = max;
        if let State::Open(build) = &mut self.state {
            build.domain.set_max_possible_values(max);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::{ErrorKind, error_kind};
    use crate::data::{CellTypeId, ColumnSpec, IntCell, RowKey, StringCell};

    fn spec() -> TableSpec {
        TableSpec::new(vec![ColumnSpec::new("name", CellTypeId::STRING), ColumnSpec::new("n", CellTypeId::LONG)])
    }

    fn row(i: i32) -> DataRow {
        DataRow::new(
            RowKey::named(&format!("Row{i}")),
            vec![Cell::from(StringCell::from(format!("v{}", i % 3))), Cell::from(IntCell(i))],
        )
    }

    fn container() -> DataContainer {
        DataContainer::new(Arc::new(TypeRegistry::with_builtins()), ContainerSettings::default())
    }

    #[test]
    fn wrong_state_calls_are_illegal() {
        let mut c = container();
        assert_eq!(error_kind(&c.append(row(0)).unwrap_err()), ErrorKind::IllegalState);
        assert_eq!(error_kind(&c.close().unwrap_err()), ErrorKind::IllegalState);
        assert_eq!(error_kind(&c.row_count().unwrap_err()), ErrorKind::IllegalState);
        assert_eq!(error_kind(&c.table().unwrap_err()), ErrorKind::IllegalState);
        assert!(c.spec().is_none());

        c.open(spec()).unwrap();
        assert_eq!(error_kind(&c.table().unwrap_err()), ErrorKind::IllegalState);
    }

    #[test]
    fn closed_container_cannot_be_reopened() {
        let mut c = container();
        c.open(spec()).unwrap();
        c.close().unwrap();
        assert_eq!(error_kind(&c.open(spec()).unwrap_err()), ErrorKind::IllegalState);
        assert!(c.is_closed());
    }

    #[test]
    fn reopening_discards_the_build() {
        let mut c = container();
        c.open(spec()).unwrap();
        c.append(row(0)).unwrap();
        c.open(spec()).unwrap();
        assert_eq!(c.row_count().unwrap(), 0);
        c.append(row(0)).unwrap();
        assert_eq!(c.row_count().unwrap(), 1);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let mut c = container();
        let unknown = TableSpec::new(vec![ColumnSpec::new("x", CellTypeId::new("nope"))]);
        assert_eq!(error_kind(&c.open(unknown).unwrap_err()), ErrorKind::SchemaViolation);

        let duplicate = TableSpec::new(vec![ColumnSpec::new("x", CellTypeId::INT), ColumnSpec::new("x", CellTypeId::INT)]);
        assert_eq!(error_kind(&c.open(duplicate).unwrap_err()), ErrorKind::SchemaViolation);
        assert!(!c.is_open());
    }

    #[test]
    fn width_and_type_violations_leave_the_container_usable() {
        let mut c = container();
        c.open(spec()).unwrap();

        let narrow = DataRow::new(RowKey::named("a"), vec![Cell::Missing]);
        assert_eq!(error_kind(&c.append(narrow).unwrap_err()), ErrorKind::SchemaViolation);

        let swapped = DataRow::new(
            RowKey::named("b"),
            vec![Cell::from(IntCell(1)), Cell::from(StringCell::from("x"))],
        );
        assert_eq!(error_kind(&c.append(swapped).unwrap_err()), ErrorKind::SchemaViolation);

        c.append(row(1)).unwrap();
        assert_eq!(c.row_count().unwrap(), 1);
    }

    #[test]
    fn subtypes_and_missing_values_are_accepted() {
        let mut c = container();
        c.open(spec()).unwrap();
        c.append(DataRow::new(RowKey::named("m"), vec![Cell::Missing, Cell::Missing])).unwrap();
        c.append(row(1)).unwrap();
        assert_eq!(c.row_count().unwrap(), 2);
    }

    #[test]
    fn capacity_follows_cell_budget() {
        let settings = ContainerSettings {
            max_cells_in_memory: 10,
            ..ContainerSettings::default()
        };
        let mut c = DataContainer::new(Arc::new(TypeRegistry::with_builtins()), settings);
        c.open(spec()).unwrap();
        assert_eq!(c.buffer().unwrap().capacity(), 5);

        for i in 0..8 {
            c.append(row(i)).unwrap();
        }
        let buffer = c.buffer().unwrap();
        assert_eq!(buffer.in_memory_len(), 5);
        assert_eq!(buffer.spilled_rows(), 3);
    }

    #[test]
    fn lowering_the_cap_while_open() {
        let mut c = container().with_capacity_rows(100);
        c.open(spec()).unwrap();
        for i in 0..6 {
            c.append(row(i)).unwrap();
        }
        c.set_max_possible_values(2);
        c.close().unwrap();
        assert_eq!(c.max_possible_values(), 2);
        assert!(c.spec().unwrap().columns[0].domain.values.is_none());
    }

    #[test]
    fn close_computes_domains() {
        let mut c = container();
        c.open(spec()).unwrap();
        for i in 0..6 {
            c.append(row(i)).unwrap();
        }
        c.close().unwrap();

        let table = c.table().unwrap();
        let names = table.spec().columns[0].domain.values.as_ref().unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(table.spec().columns[1].domain.lower, Some(Cell::from(IntCell(0))));
        assert_eq!(table.spec().columns[1].domain.upper, Some(Cell::from(IntCell(5))));
    }
}
