//! Container files written to caller-chosen paths: round trips, corruption and lossy decoding.

use core::any::Any;
use core::fmt::{Display, Formatter, Result as FmtResult};
use core::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use spilltable_lib::Result;
use spilltable_lib::container::{
    DataContainer, ErrorKind, FORMAT_MAGIC, HEADER_SIZE, InMemoryRows, NoProgress, RowReader, RowSource, RowWriter, error_kind, read_from_file,
    write_to_file,
};
use spilltable_lib::data::{
    BinaryCell, Cell, CellTypeId, ColumnSpec, CompactCodec, CompactValue, DataRow, DataValue, DateTimeCell, IntCell, JsonCodec, RowKey,
    StringCell, TableSpec, TypeEntry, TypeRegistry,
};
use spilltable_lib::settings::ContainerSettings;
use std::path::Path;
use std::sync::Arc;

fn builtins() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::with_builtins())
}

fn sample() -> InMemoryRows {
    let spec = TableSpec::new(vec![
        ColumnSpec::new("city", CellTypeId::STRING),
        ColumnSpec::new("population", CellTypeId::INT),
        ColumnSpec::new("photo", CellTypeId::BINARY),
        ColumnSpec::new("founded", CellTypeId::DATETIME),
    ])
    .with_name("cities");

    let founded = chrono::DateTime::parse_from_rfc3339("1624-01-01T00:00:00Z").unwrap().to_utc();
    let rows = [("Amsterdam", 921_402), ("Utrecht", 361_924), ("Delft", 103_581)]
        .into_iter()
        .map(|(city, population)| {
            DataRow::new(
                RowKey::named(city),
                vec![
                    Cell::from(StringCell::from(city)),
                    Cell::from(IntCell(population)),
                    Cell::from(BinaryCell(city.bytes().cycle().take(4096).collect())),
                    Cell::from(DateTimeCell(founded)),
                ],
            )
        })
        .collect();

    InMemoryRows::new(spec, rows)
}

fn write_sample(path: &Path) {
    write_to_file(&sample(), path, builtins(), &ContainerSettings::default(), &NoProgress).unwrap();
}

fn rows_of(path: &Path, registry: Arc<TypeRegistry>) -> Vec<DataRow> {
    read_from_file(path, registry).unwrap().iter().collect::<Result<_>>().unwrap()
}

#[test]
fn named_tables_survive_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);

    let table = read_from_file(&path, builtins()).unwrap();
    assert_eq!(table.spec().name.as_deref(), Some("cities"));
    assert_eq!(table.row_count(), 3);
    assert!(!table.is_temporary());

    let population = &table.spec().columns[1].domain;
    assert_eq!(population.lower, Some(Cell::from(IntCell(103_581))));
    assert_eq!(population.upper, Some(Cell::from(IntCell(921_402))));

    let mut cities = table.spec().columns[0].domain.values.clone().unwrap();
    cities.sort_by_key(ToString::to_string);
    assert_eq!(cities.iter().map(ToString::to_string).collect::<Vec<_>>(), ["Amsterdam", "Delft", "Utrecht"]);

    assert_eq!(rows_of(&path, builtins()), sample().rows().unwrap().collect::<Result<Vec<_>>>().unwrap());
}

#[test]
fn caller_owned_files_are_never_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);

    let table = read_from_file(&path, builtins()).unwrap();
    table.dispose();
    drop(table);
    assert!(path.exists());
}

#[test]
fn explicit_destination_is_written_even_without_a_spill() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.container");

    let mut c = DataContainer::new(builtins(), ContainerSettings::default()).writing_to(&path);
    c.open(TableSpec::new(vec![ColumnSpec::new("n", CellTypeId::INT)])).unwrap();
    c.append(DataRow::new(RowKey::named("a"), vec![Cell::from(IntCell(1))])).unwrap();
    c.close().unwrap();

    let table = c.table().unwrap();
    assert_eq!(table.file_path(), Some(path.as_path()));
    assert!(!table.is_temporary());
    drop(c);
    drop(table);

    assert_eq!(read_from_file(&path, builtins()).unwrap().row_count(), 1);
}

#[test]
fn empty_containers_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.container");
    let spec = TableSpec::new(vec![ColumnSpec::new("n", CellTypeId::INT)]);

    write_to_file(&InMemoryRows::new(spec, Vec::new()), &path, builtins(), &ContainerSettings::default(), &NoProgress).unwrap();

    let table = read_from_file(&path, builtins()).unwrap();
    assert_eq!(table.row_count(), 0);
    assert!(table.iter().next().is_none());
}

#[test]
fn wrong_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[..8].copy_from_slice(&(FORMAT_MAGIC ^ 1).to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let err = read_from_file(&path, builtins()).unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
}

#[test]
fn truncated_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);
    let bytes = std::fs::read(&path).unwrap();

    for len in [0, HEADER_SIZE - 1, HEADER_SIZE, bytes.len() - 1] {
        std::fs::write(&path, &bytes[..len]).unwrap();
        let err = read_from_file(&path, builtins()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption, "length {len}");
    }
}

/// Handles this process holds on `path`, including ones whose file has since been deleted.
#[cfg(target_os = "linux")]
fn open_handles(path: &Path) -> usize {
    let deleted = format!("{} (deleted)", path.display());
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|target| target == path || target.as_os_str() == deleted.as_str())
        .count()
}

#[cfg(target_os = "linux")]
#[test]
fn blob_handles_are_released_with_the_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);
    let path = path.canonicalize().unwrap();
    let table = read_from_file(&path, builtins()).unwrap();
    assert_eq!(open_handles(&path), 0);

    let mut cursor = table.iter();
    let first = cursor.next().unwrap().unwrap();
    assert_eq!(first.cells[2], Cell::from(BinaryCell(b"Amsterdam".iter().copied().cycle().take(4096).collect())));
    assert!(cursor.has_open_stream());
    assert_eq!(open_handles(&path), 2, "data and blob sections are open mid-scan");

    assert_eq!(cursor.by_ref().count(), 2);
    assert!(!cursor.has_open_stream());
    assert_eq!(open_handles(&path), 0);

    let mut closed = table.iter();
    let _ = closed.next().unwrap().unwrap();
    closed.close();
    assert_eq!(open_handles(&path), 0);
}

#[test]
fn corrupt_row_lengths_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);
    let bytes = std::fs::read(&path).unwrap();

    let data_len = usize::try_from(u64::from_le_bytes(bytes[16..24].try_into().unwrap())).unwrap();
    let data_end = HEADER_SIZE + data_len;
    let mut rows = zstd::decode_all(&bytes[HEADER_SIZE..data_end]).unwrap();
    rows[0..4].copy_from_slice(&0xFFFF_FFF0_u32.to_le_bytes());
    let data = zstd::encode_all(rows.as_slice(), 3).unwrap();

    let mut patched = bytes[..HEADER_SIZE].to_vec();
    patched[16..24].copy_from_slice(&(data.len() as u64).to_le_bytes());
    patched.extend_from_slice(&data);
    patched.extend_from_slice(&bytes[data_end..]);
    std::fs::write(&path, patched).unwrap();

    let table = read_from_file(&path, builtins()).unwrap();
    let mut cursor = table.iter();
    let err = cursor.next().unwrap().unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    assert!(cursor.next().is_none());
    assert!(!cursor.has_open_stream());
}

#[test]
fn missing_files_are_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_from_file(dir.path().join("absent.container"), builtins()).unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::Io);
}

#[test]
fn unknown_value_types_degrade_to_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cities.container");
    write_sample(&path);

    // A reader that knows nothing about binary values still gets every other cell.
    let mut registry = TypeRegistry::new();
    let _ = registry.register(TypeEntry::new(CellTypeId::STRING).compact(CompactCodec::<StringCell>::new()));
    let _ = registry.register(TypeEntry::new(CellTypeId::INT).compact(CompactCodec::<IntCell>::new()));
    let _ = registry.register(TypeEntry::new(CellTypeId::DATETIME).fallback(JsonCodec::<DateTimeCell>::new()));

    let table = read_from_file(&path, Arc::new(registry)).unwrap();
    let mut cursor = table.iter();
    let rows: Vec<_> = (&mut cursor).collect::<Result<_>>().unwrap();

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.cells[2].is_missing()));
    assert_eq!(rows[1].cells[0], Cell::from(StringCell::from("Utrecht")));
    assert_eq!(cursor.degraded_cells(), 3);
}

/// Decodes only even numbers; odd payloads fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fragile(u64);

const FRAGILE: CellTypeId = CellTypeId::from_static("fragile");

impl Display for Fragile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl DataValue for Fragile {
    fn cell_type(&self) -> CellTypeId {
        FRAGILE
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
}

impl CompactValue for Fragile {
    fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
        writer.write_u64(self.0)
    }

    fn read_compact(reader: &mut RowReader<'_>) -> Result<Self> {
        let value = reader.read_u64()?;
        if value % 2 == 1 {
            return Err(ohno::app_err!("odd value {value}"));
        }
        Ok(Self(value))
    }
}

#[test]
fn undecodable_cells_are_counted_not_fatal() {
    let mut registry = TypeRegistry::with_builtins();
    registry
        .register(TypeEntry::new(FRAGILE).compact(CompactCodec::<Fragile>::new()))
        .unwrap();
    let registry = Arc::new(registry);

    let spec = TableSpec::new(vec![ColumnSpec::new("value", FRAGILE), ColumnSpec::new("label", CellTypeId::STRING)]);
    let mut c = DataContainer::new(Arc::clone(&registry), ContainerSettings::default()).with_capacity_rows(0);
    c.open(spec).unwrap();
    for n in 0..6u64 {
        c.append(DataRow::new(
            RowKey::named(&format!("Row{n}")),
            vec![Cell::from(Fragile(n)), Cell::from(StringCell::from(format!("label {n}")))],
        ))
        .unwrap();
    }
    c.close().unwrap();

    let table = c.table().unwrap();
    let mut cursor = table.iter();
    let rows: Vec<_> = (&mut cursor).collect::<Result<_>>().unwrap();

    assert_eq!(rows.len(), 6);
    assert_eq!(cursor.degraded_cells(), 3);
    for (n, row) in rows.iter().enumerate() {
        assert_eq!(row.cells[0].is_missing(), n % 2 == 1);
        assert_eq!(row.cells[1], Cell::from(StringCell::from(format!("label {n}"))));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

const POINT: CellTypeId = CellTypeId::from_static("point");

impl Display for Point {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl DataValue for Point {
    fn cell_type(&self) -> CellTypeId {
        POINT
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
}

#[test]
fn fallback_codec_values_round_trip() {
    let mut registry = TypeRegistry::with_builtins();
    registry.register(TypeEntry::new(POINT).fallback(JsonCodec::<Point>::new())).unwrap();
    let registry = Arc::new(registry);

    let spec = TableSpec::new(vec![ColumnSpec::new("at", POINT)]);
    let rows: Vec<_> = (0..4)
        .map(|i| DataRow::new(RowKey::named(&format!("p{i}")), vec![Cell::from(Point { x: i, y: -i })]))
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.container");
    write_to_file(
        &InMemoryRows::new(spec, rows.clone()),
        &path,
        Arc::clone(&registry),
        &ContainerSettings::default(),
        &NoProgress,
    )
    .unwrap();

    assert_eq!(rows_of(&path, registry), rows);
}

#[test]
fn values_without_any_codec_are_unserializable() {
    let mut registry = TypeRegistry::with_builtins();
    registry.register(TypeEntry::new(POINT)).unwrap();

    let spec = TableSpec::new(vec![ColumnSpec::new("at", POINT)]);
    let mut c = DataContainer::new(Arc::new(registry), ContainerSettings::default()).with_capacity_rows(0);
    c.open(spec).unwrap();

    let err = c
        .append(DataRow::new(RowKey::named("p"), vec![Cell::from(Point { x: 1, y: 2 })]))
        .unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::Unserializable);
}

#[test]
fn small_frames_read_back_in_order() {
    let settings = ContainerSettings {
        rows_per_frame: 2,
        ..ContainerSettings::default()
    };
    let rows: Vec<_> = (0..11)
        .map(|i| DataRow::new(RowKey::named(&format!("Row{i}")), vec![Cell::from(IntCell(i))]))
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.container");
    write_to_file(
        &InMemoryRows::new(TableSpec::new(vec![ColumnSpec::new("n", CellTypeId::INT)]), rows.clone()),
        &path,
        builtins(),
        &settings,
        &NoProgress,
    )
    .unwrap();

    assert_eq!(rows_of(&path, builtins()), rows);
}
