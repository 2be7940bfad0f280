use super::error::{corruption, illegal_state};
use super::row_codec::{BlobAddress, BlobSink, BlobSource, RowDecoder, RowEncoder};
use super::{FrozenDictionary, PaddedBytes, RowReader, RowWriter, TagDictionary};
use crate::Result;
use crate::data::{Cell, CellTypeId, ColumnDomain, ColumnSpec, DataRow, TableSpec, TypeRegistry};
use ohno::IntoAppError;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_TARGET: &str = "    format";

pub const FORMAT_MAGIC: u64 = 0x5350_494C_4C54_424C;
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 40; // 8 magic + 4 version + 4 flags + 3 x 8 section lengths

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Knobs of the on-disk writer, usually derived from [`ContainerSettings`](crate::settings::ContainerSettings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Rows per compressed frame; each frame boundary resets the compressor state.
    pub rows_per_frame: usize,

    pub compression_level: i32,

    /// Directory for engine-generated files, `None` for the OS temp directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            rows_per_frame: 1000,
            compression_level: 3,
            temp_dir: None,
        }
    }
}

/// Decoded container file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub data_len: u64,
    pub blob_len: u64,
    pub spec_len: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&FORMAT_MAGIC.to_le_bytes());
        bytes[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // bytes[12..16] are the reserved flags
        bytes[16..24].copy_from_slice(&self.data_len.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.blob_len.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.spec_len.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; HEADER_SIZE], file_len: u64) -> Result<Self> {
        let u64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        let u32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            u32::from_le_bytes(raw)
        };

        let magic = u64_at(0);
        if magic != FORMAT_MAGIC {
            return Err(corruption(format!(
                "invalid container format: expected magic 0x{FORMAT_MAGIC:016X}, found 0x{magic:016X}"
            )));
        }

        let version = u32_at(8);
        if version != FORMAT_VERSION {
            return Err(corruption(format!("unsupported container version {version}, expected {FORMAT_VERSION}")));
        }

        let flags = u32_at(12);
        if flags != 0 {
            return Err(corruption(format!("unknown container flags 0x{flags:08X}")));
        }

        let header = Self {
            data_len: u64_at(16),
            blob_len: u64_at(24),
            spec_len: u64_at(32),
        };

        let total = (HEADER_SIZE as u64)
            .checked_add(header.data_len)
            .and_then(|n| n.checked_add(header.blob_len))
            .and_then(|n| n.checked_add(header.spec_len));
        if total != Some(file_len) {
            return Err(corruption(format!(
                "section lengths ({} + {} + {}) do not match a file of {file_len} bytes",
                header.data_len, header.blob_len, header.spec_len
            )));
        }

        Ok(header)
    }

    #[must_use]
    pub const fn blob_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.data_len
    }

    #[must_use]
    pub const fn spec_start(&self) -> u64 {
        self.blob_start() + self.blob_len
    }

    /// Total size of the container file in bytes.
    #[must_use]
    pub const fn file_len(&self) -> u64 {
        self.spec_start() + self.spec_len
    }
}

/// Spools blob payloads into an anonymous temp file until the container is finished.
#[derive(Debug)]
struct BlobSpool {
    temp_dir: Option<PathBuf>,
    compression_level: i32,
    file: Option<BufWriter<File>>,
    len: u64,
}

impl BlobSpool {
    const fn new(temp_dir: Option<PathBuf>, compression_level: i32) -> Self {
        Self {
            temp_dir,
            compression_level,
            file: None,
            len: 0,
        }
    }

    /// Appends the spooled payloads to `out` and returns how many bytes that took.
    fn copy_into(&mut self, out: &mut impl Write) -> Result<u64> {
        let Some(spool) = self.file.take() else {
            return Ok(0);
        };

        let mut file = spool.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        let _ = file.seek(SeekFrom::Start(0))?;
        let copied = std::io::copy(&mut file, out)?;
        if copied != self.len {
            ohno::bail!("blob spool holds {copied} bytes, expected {}", self.len);
        }

        Ok(copied)
    }
}

impl BlobSink for BlobSpool {
    fn store(&mut self, payload: &[u8], compress: bool) -> Result<BlobAddress> {
        if self.file.is_none() {
            let file = match &self.temp_dir {
                Some(dir) => tempfile::tempfile_in(dir),
                None => tempfile::tempfile(),
            }
            .into_app_err("unable to create blob spool file")?;
            self.file = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
        }

        let compressed;
        let bytes = if compress {
            compressed = zstd::encode_all(payload, self.compression_level)?;
            compressed.as_slice()
        } else {
            payload
        };

        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
        }

        let address = BlobAddress {
            offset: self.len,
            len: bytes.len() as u64,
            compressed: compress,
        };
        self.len += address.len;
        Ok(address)
    }
}

enum DataSink {
    Idle(BufWriter<File>),
    Frame(zstd::stream::write::Encoder<'static, BufWriter<File>>),
    Failed,
}

impl core::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Idle(_) => "Idle",
            Self::Frame(_) => "Frame",
            Self::Failed => "Failed",
        })
    }
}

/// Streams encoded rows into a container file and finalizes it.
#[derive(Debug)]
pub struct ContainerWriter {
    path: PathBuf,
    registry: Arc<TypeRegistry>,
    dictionary: TagDictionary,
    blobs: BlobSpool,
    row_writer: RowWriter,
    sink: DataSink,
    options: WriterOptions,
    rows_in_frame: usize,
}

/// What a finished container file looks like, enough to read it back without reopening it.
#[derive(Debug)]
pub struct FinishedContainer {
    pub header: Header,
    pub dictionary: FrozenDictionary,
    pub row_count: u64,
}

impl ContainerWriter {
    /// Takes ownership of a freshly created, empty file and writes the header placeholder.
    pub fn new(file: File, path: PathBuf, registry: Arc<TypeRegistry>, options: WriterOptions) -> Result<Self> {
        let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        out.write_all(&[0u8; HEADER_SIZE])
            .into_app_err_with(|| format!("unable to write to container file '{}'", path.display()))?;

        Ok(Self {
            path,
            registry,
            dictionary: TagDictionary::new(),
            blobs: BlobSpool::new(options.temp_dir.clone(), options.compression_level),
            row_writer: RowWriter::new(),
            sink: DataSink::Idle(out),
            options,
            rows_in_frame: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn row_count(&self) -> u64 {
        self.row_writer.row_count()
    }

    pub fn write_row(&mut self, row: &DataRow) -> Result<()> {
        let mut encoder = RowEncoder::new(&self.registry, &mut self.dictionary, Some(&mut self.blobs));
        if let Err(e) = encoder.encode_row(row, &mut self.row_writer) {
            self.row_writer.clear();
            return Err(e);
        }

        if matches!(self.sink, DataSink::Idle(_)) {
            self.sink = match core::mem::replace(&mut self.sink, DataSink::Failed) {
                DataSink::Idle(out) => DataSink::Frame(zstd::stream::write::Encoder::new(out, self.options.compression_level)?),
                other => other,
            };
        }

        let DataSink::Frame(encoder) = &mut self.sink else {
            return Err(illegal_state("container file is no longer writable"));
        };

        self.row_writer.row_done(encoder)?;
        self.rows_in_frame += 1;

        if self.rows_in_frame >= self.options.rows_per_frame {
            self.end_frame()?;
        }

        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        if let DataSink::Frame(encoder) = core::mem::replace(&mut self.sink, DataSink::Failed) {
            self.sink = DataSink::Idle(encoder.finish()?);
        }
        self.rows_in_frame = 0;
        Ok(())
    }

    /// Completes the data section, appends the blob and spec sections and patches the header.
    pub fn finish(mut self, spec: &TableSpec) -> Result<FinishedContainer> {
        self.end_frame()?;
        let DataSink::Idle(mut out) = core::mem::replace(&mut self.sink, DataSink::Failed) else {
            return Err(illegal_state("container file is no longer writable"));
        };

        let data_end = out.stream_position()?;
        let data_len = data_end - HEADER_SIZE as u64;
        let blob_len = self.blobs.copy_into(&mut out)?;

        let row_count = self.row_writer.row_count();
        let spec_bytes = encode_spec(spec, row_count, &self.registry, &mut self.dictionary)?;
        out.write_all(&spec_bytes)?;

        let header = Header {
            data_len,
            blob_len,
            spec_len: spec_bytes.len() as u64,
        };

        // Go back and write the header
        let _ = out.seek(SeekFrom::Start(0))?;
        out.write_all(&header.encode())?;
        out.flush()?;

        let file = out.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()
            .into_app_err_with(|| format!("unable to sync container file '{}'", self.path.display()))?;

        #[expect(clippy::cast_precision_loss, reason = "only used for a log message")]
        let size_mb = header.file_len() as f64 / (1024.0 * 1024.0);
        log::debug!(target: LOG_TARGET, "finished container '{}': {row_count} rows, {size_mb:.2} MB", self.path.display());

        Ok(FinishedContainer {
            header,
            dictionary: self.dictionary.freeze(),
            row_count,
        })
    }
}

fn encode_spec(spec: &TableSpec, row_count: u64, registry: &TypeRegistry, dictionary: &mut TagDictionary) -> Result<Vec<u8>> {
    let row_count = u32::try_from(row_count).into_app_err_with(|| format!("{row_count} rows do not fit in a container"))?;

    // Columns go first into a scratch buffer: domain cells may still allocate tags.
    let mut columns = RowWriter::new();
    columns.write_optional_str(spec.name.as_deref())?;
    columns.write_len(spec.columns.len())?;
    {
        let mut encoder = RowEncoder::new(registry, dictionary, None);
        for column in &spec.columns {
            columns.write_str(&column.name)?;
            columns.write_str(column.data_type.as_str())?;

            if let Some(values) = &column.domain.values {
                columns.write_bool(true);
                columns.write_len(values.len())?;
                for value in values {
                    encoder.encode_cell(value, &mut columns)?;
                }
            } else {
                columns.write_bool(false);
            }

            for bound in [&column.domain.lower, &column.domain.upper] {
                if let Some(cell) = bound {
                    columns.write_bool(true);
                    encoder.encode_cell(cell, &mut columns)?;
                } else {
                    columns.write_bool(false);
                }
            }

            columns.write_len(column.properties.len())?;
            for (key, value) in &column.properties {
                columns.write_str(key)?;
                columns.write_str(value)?;
            }
        }
    }

    let mut out = RowWriter::new();
    out.write_u32(row_count);
    let frozen = dictionary.freeze();
    out.write_len(frozen.types().len())?;
    for id in frozen.types() {
        out.write_str(id.as_str())?;
    }

    let mut bytes = out.take();
    bytes.extend_from_slice(columns.as_bytes());
    Ok(bytes)
}

fn decode_spec(bytes: &PaddedBytes, registry: &TypeRegistry) -> Result<(TableSpec, FrozenDictionary, u64)> {
    let mut reader = bytes.reader();
    let row_count = u64::from(reader.read_u32()?);

    let type_count = reader.read_len()?;
    let mut types = Vec::with_capacity(type_count.min(bytes.len()));
    for _ in 0..type_count {
        types.push(CellTypeId::new(reader.read_str()?));
    }
    let dictionary = FrozenDictionary::from_types(types)?;

    let mut decoder = RowDecoder::new(registry, &dictionary, None);
    let name = reader.read_optional_str()?.map(str::to_string);
    let column_count = reader.read_len()?;
    let mut columns = Vec::with_capacity(column_count.min(bytes.len()));
    for _ in 0..column_count {
        columns.push(decode_column(&mut reader, &mut decoder)?);
    }

    if !reader.is_at_end() {
        return Err(corruption(format!("{} unexpected bytes after the spec section", reader.remaining())));
    }

    Ok((TableSpec { name, columns }, dictionary, row_count))
}

fn decode_column(reader: &mut RowReader<'_>, decoder: &mut RowDecoder<'_>) -> Result<ColumnSpec> {
    let name = reader.read_str()?;
    let data_type = CellTypeId::new(reader.read_str()?);
    let mut column = ColumnSpec::new(name, data_type);

    let values = if reader.read_bool()? {
        let count = reader.read_len()?;
        let mut values = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            values.push(decoder.decode_cell(reader)?);
        }
        Some(values)
    } else {
        None
    };

    let mut bound = |reader: &mut RowReader<'_>| -> Result<Option<Cell>> {
        if reader.read_bool()? { decoder.decode_cell(reader).map(Some) } else { Ok(None) }
    };
    let lower = bound(reader)?;
    let upper = bound(reader)?;
    column.domain = ColumnDomain { values, lower, upper };

    let property_count = reader.read_len()?;
    for _ in 0..property_count {
        let key = reader.read_str()?;
        let value = reader.read_str()?;
        let _ = column.properties.insert(key.to_string(), value.to_string());
    }

    Ok(column)
}

/// Schema and layout of a finished container file, read without touching the data section.
#[derive(Debug, Clone)]
pub struct ContainerFileInfo {
    pub header: Header,
    pub dictionary: FrozenDictionary,
    pub spec: TableSpec,
    pub row_count: u64,
}

pub fn read_container_info(path: &Path, registry: &TypeRegistry) -> Result<ContainerFileInfo> {
    let mut file = File::open(path).into_app_err_with(|| format!("unable to open container file '{}'", path.display()))?;
    let file_len = file
        .metadata()
        .into_app_err_with(|| format!("unable to get metadata of '{}'", path.display()))?
        .len();

    if file_len < HEADER_SIZE as u64 {
        return Err(corruption(format!(
            "'{}' is too short to be a container file ({file_len} bytes)",
            path.display()
        )));
    }

    let mut raw = [0u8; HEADER_SIZE];
    file.read_exact(&mut raw)?;
    let header = Header::decode(&raw, file_len)?;

    let spec_len =
        usize::try_from(header.spec_len).map_err(|e| corruption(format!("spec section of {} bytes is too large: {e}", header.spec_len)))?;
    let _ = file.seek(SeekFrom::Start(header.spec_start()))?;
    let mut bytes = PaddedBytes::default();
    bytes.fill_from(&mut file, spec_len)?;

    let (spec, dictionary, row_count) = decode_spec(&bytes, registry)?;
    Ok(ContainerFileInfo {
        header,
        dictionary,
        spec,
        row_count,
    })
}

/// Sequential reader over the data section of a container file.
pub struct DataStream {
    decoder: zstd::stream::read::Decoder<'static, BufReader<Take<File>>>,
    body: PaddedBytes,
}

impl DataStream {
    pub fn open(path: &Path, header: &Header) -> Result<Self> {
        let mut file = File::open(path).into_app_err_with(|| format!("unable to open container file '{}'", path.display()))?;
        let _ = file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let decoder = zstd::stream::read::Decoder::new(file.take(header.data_len))?;
        Ok(Self {
            decoder,
            body: PaddedBytes::default(),
        })
    }

    /// Reads the next framed row body.
    pub fn next_body(&mut self) -> Result<&PaddedBytes> {
        let mut len = [0u8; 4];
        self.decoder
            .read_exact(&mut len)
            .map_err(|e| corruption(format!("data section ends before the declared row count: {e}")))?;
        let len = u32::from_le_bytes(len) as usize;

        self.body
            .fill_from(&mut self.decoder, len)
            .map_err(|e| corruption(format!("row of {len} bytes is truncated: {e}")))?;
        Ok(&self.body)
    }
}

impl core::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DataStream").field("body_len", &self.body.len()).finish_non_exhaustive()
    }
}

/// Random access to the blob section for one cursor; the file is opened on first use.
#[derive(Debug)]
pub struct FileBlobSource {
    path: PathBuf,
    base: u64,
    limit: u64,
    file: Option<File>,
}

impl FileBlobSource {
    #[must_use]
    pub fn new(path: PathBuf, header: &Header) -> Self {
        Self {
            path,
            base: header.blob_start(),
            limit: header.blob_len,
            file: None,
        }
    }
}

impl BlobSource for FileBlobSource {
    fn load(&mut self, address: BlobAddress) -> Result<Vec<u8>> {
        if address.offset.checked_add(address.len).is_none_or(|end| end > self.limit) {
            return Err(corruption(format!(
                "blob at {}+{} lies outside the blob section of {} bytes",
                address.offset, address.len, self.limit
            )));
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => File::open(&self.path).into_app_err_with(|| format!("unable to open container file '{}'", self.path.display()))?,
        };
        let file = self.file.insert(file);

        let _ = file.seek(SeekFrom::Start(self.base + address.offset))?;
        let len = usize::try_from(address.len)?;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;

        if address.compressed {
            Ok(zstd::decode_all(bytes.as_slice())?)
        } else {
            Ok(bytes)
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::error::{ErrorKind, error_kind};
    use crate::data::{BinaryCell, IntCell, RowKey, StringCell};

    fn spec() -> TableSpec {
        TableSpec::new(vec![
            ColumnSpec::new("name", CellTypeId::STRING)
                .with_domain(ColumnDomain::default().with_values(vec![Cell::from(StringCell::from("a"))]))
                .with_property("origin", "test"),
            ColumnSpec::new("n", CellTypeId::INT)
                .with_domain(ColumnDomain::default().with_bounds(Cell::from(IntCell(-1)), Cell::from(IntCell(5)))),
            ColumnSpec::new("payload", CellTypeId::BINARY),
        ])
        .with_name("sample")
    }

    fn write_file(path: &Path, rows: &[DataRow], rows_per_frame: usize) -> FinishedContainer {
        let file = File::create(path).unwrap();
        let options = WriterOptions {
            rows_per_frame,
            ..WriterOptions::default()
        };
        let mut writer = ContainerWriter::new(file, path.to_path_buf(), Arc::new(TypeRegistry::with_builtins()), options).unwrap();
        for row in rows {
            writer.write_row(row).unwrap();
        }
        writer.finish(&spec()).unwrap()
    }

    fn rows(n: i32) -> Vec<DataRow> {
        (0..n)
            .map(|i| {
                DataRow::new(
                    RowKey::named(&format!("Row{i}")),
                    vec![
                        Cell::from(StringCell::from("a")),
                        Cell::from(IntCell(i)),
                        Cell::from(BinaryCell(vec![u8::try_from(i % 256).unwrap(); 64])),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn spec_section_reads_back_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.container");
        let finished = write_file(&path, &rows(10), 3);

        let registry = TypeRegistry::with_builtins();
        let info = read_container_info(&path, &registry).unwrap();
        assert_eq!(info.spec, spec());
        assert_eq!(info.row_count, 10);
        assert_eq!(info.dictionary, finished.dictionary);
        assert_eq!(info.header, finished.header);
        assert!(info.header.blob_len > 0);
    }

    #[test]
    fn data_stream_spans_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.container");
        let expected = rows(25);
        let _ = write_file(&path, &expected, 4);

        let registry = TypeRegistry::with_builtins();
        let info = read_container_info(&path, &registry).unwrap();
        let mut stream = DataStream::open(&path, &info.header).unwrap();
        let mut blobs = FileBlobSource::new(path.clone(), &info.header);

        for row in &expected {
            let body = stream.next_body().unwrap().clone();
            let mut decoder = RowDecoder::new(&registry, &info.dictionary, Some(&mut blobs));
            assert_eq!(&decoder.decode_row(&body, 3).unwrap(), row);
        }

        let err = stream.next_body().unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.container");
        let _ = write_file(&path, &rows(2), 10);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = read_container_info(&path, &TypeRegistry::with_builtins()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.container");
        let _ = write_file(&path, &rows(2), 10);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let err = read_container_info(&path, &TypeRegistry::with_builtins()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);

        std::fs::write(&path, &bytes[..10]).unwrap();
        let err = read_container_info(&path, &TypeRegistry::with_builtins()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }

    #[test]
    fn unfinished_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.container");
        let file = File::create(&path).unwrap();
        let mut writer = ContainerWriter::new(file, path.clone(), Arc::new(TypeRegistry::with_builtins()), WriterOptions::default()).unwrap();
        for row in &rows(3) {
            writer.write_row(row).unwrap();
        }
        drop(writer);

        let err = read_container_info(&path, &TypeRegistry::with_builtins()).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }
}
