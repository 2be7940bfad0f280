//! Binary encoding of rows and cells.
//!
//! ```text
//! row   := [key cell][color: u32 LE][cell]*[ROW_SEPARATOR]
//! cell  := [MISSING_TAG]
//!        | [tag][vlen len][compact payload]
//!        | [tag][vlen len][vlen offset][vlen len][u8 compressed]   blob, payload in the blob section
//!        | [FALLBACK_TAG][type id string][vlen len][fallback payload]
//! ```
//!
//! Every inline payload is length-prefixed so a value whose deserializer fails can be skipped
//! and replaced by a missing cell without losing the row framing.

use super::error::{ContainerError, corruption};
use super::tag_dictionary::{FALLBACK_TAG, MISSING_TAG};
use super::{FrozenDictionary, PaddedBytes, RowReader, RowWriter, TagDictionary};
use crate::Result;
use crate::data::{Cell, CellSerializer, CellTypeId, Color, DataRow, RowKey, TypeEntry, TypeRegistry};
use ohno::AppError;

const LOG_TARGET: &str = "     codec";

/// Terminates every encoded row.
pub const ROW_SEPARATOR: u8 = b'\n';

/// Location of one blob payload within the blob section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobAddress {
    pub offset: u64,
    pub len: u64,
    pub compressed: bool,
}

/// Out-of-line storage for blob payloads while a container is written.
pub trait BlobSink {
    fn store(&mut self, payload: &[u8], compress: bool) -> Result<BlobAddress>;
}

/// Access to blob payloads while a container is read.
pub trait BlobSource {
    fn load(&mut self, address: BlobAddress) -> Result<Vec<u8>>;
}

/// Write side of the codec, borrowing the state of one container under construction.
pub struct RowEncoder<'a> {
    registry: &'a TypeRegistry,
    dictionary: &'a mut TagDictionary,
    blobs: Option<&'a mut dyn BlobSink>,
}

impl<'a> RowEncoder<'a> {
    pub fn new(registry: &'a TypeRegistry, dictionary: &'a mut TagDictionary, blobs: Option<&'a mut dyn BlobSink>) -> Self {
        Self {
            registry,
            dictionary,
            blobs,
        }
    }

    pub fn encode_row(&mut self, row: &DataRow, writer: &mut RowWriter) -> Result<()> {
        self.encode_cell(&row.key.id, writer)?;
        writer.write_u32(row.key.color.argb());
        for cell in &row.cells {
            self.encode_cell(cell, writer)?;
        }
        writer.write_byte(ROW_SEPARATOR);
        Ok(())
    }

    pub fn encode_cell(&mut self, cell: &Cell, writer: &mut RowWriter) -> Result<()> {
        let Cell::Value(value) = cell else {
            writer.write_byte(MISSING_TAG);
            return Ok(());
        };

        let id = value.cell_type();
        let entry = self.registry.get(&id);

        if let Some(serializer) = entry.and_then(|e| e.compact_serializer()) {
            let tag = self.dictionary.tag_for(&id)?;
            writer.write_byte(tag);

            let blob_policy = entry.and_then(|e| e.blob_policy());
            if let (Some(policy), Some(sink)) = (blob_policy, self.blobs.as_deref_mut()) {
                let mut scratch = RowWriter::new();
                serializer.serialize(value.as_ref(), &mut scratch)?;
                let address = sink.store(scratch.as_bytes(), policy.compress)?;
                return writer.write_length_prefixed(|w| {
                    w.write_u64(address.offset)?;
                    w.write_u64(address.len)?;
                    w.write_bool(address.compressed);
                    Ok(())
                });
            }

            return writer.write_length_prefixed(|w| serializer.serialize(value.as_ref(), w));
        }

        if let Some(serializer) = entry.and_then(|e| e.fallback_serializer()) {
            writer.write_byte(FALLBACK_TAG);
            writer.write_str(id.as_str())?;
            return writer.write_length_prefixed(|w| serializer.serialize(value.as_ref(), w));
        }

        Err(AppError::new(ContainerError::Unserializable(id)))
    }
}

impl core::fmt::Debug for RowEncoder<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RowEncoder")
            .field("dictionary", &self.dictionary)
            .field("has_blob_sink", &self.blobs.is_some())
            .finish_non_exhaustive()
    }
}

/// Read side of the codec.
pub struct RowDecoder<'a> {
    registry: &'a TypeRegistry,
    dictionary: &'a FrozenDictionary,
    blobs: Option<&'a mut dyn BlobSource>,
    degraded: u64,
}

impl<'a> RowDecoder<'a> {
    pub fn new(registry: &'a TypeRegistry, dictionary: &'a FrozenDictionary, blobs: Option<&'a mut dyn BlobSource>) -> Self {
        Self {
            registry,
            dictionary,
            blobs,
            degraded: 0,
        }
    }

    /// Number of cells replaced by a missing value because their payload could not be decoded.
    #[must_use]
    pub const fn degraded(&self) -> u64 {
        self.degraded
    }

    /// Decodes one row body of `width` cells; the body must end exactly at the row separator.
    pub fn decode_row(&mut self, body: &PaddedBytes, width: usize) -> Result<DataRow> {
        let mut reader = body.reader();

        let id = self.decode_cell(&mut reader)?;
        let color = Color::from_argb(reader.read_u32()?);

        let mut cells = Vec::with_capacity(width);
        for _ in 0..width {
            cells.push(self.decode_cell(&mut reader)?);
        }

        let separator = reader.read_byte()?;
        if separator != ROW_SEPARATOR || !reader.is_at_end() {
            return Err(corruption(format!(
                "row framing is broken: expected separator at offset {} of {}",
                reader.position() - 1,
                body.len()
            )));
        }

        Ok(DataRow::new(RowKey { id, color }, cells))
    }

    pub fn decode_cell(&mut self, reader: &mut RowReader<'_>) -> Result<Cell> {
        let tag = reader.read_byte()?;
        match tag {
            MISSING_TAG => Ok(Cell::Missing),
            FALLBACK_TAG => {
                let id = CellTypeId::new(reader.read_str()?);
                let len = reader.read_len()?;
                let mut payload = reader.sub_reader(len)?;
                let serializer = self.registry.get(&id).and_then(|e| e.fallback_serializer());
                Ok(self.deserialize_or_degrade(&id, serializer, &mut payload))
            }
            _ => {
                let id = self.dictionary.type_for(tag)?.clone();
                let entry = self.registry.get(&id).map(AsRef::as_ref);
                let serializer = entry.and_then(TypeEntry::compact_serializer);

                let len = reader.read_len()?;
                let mut payload = reader.sub_reader(len)?;

                if entry.and_then(TypeEntry::blob_policy).is_some()
                    && let Some(blobs) = self.blobs.as_deref_mut()
                {
                    let address = BlobAddress {
                        offset: payload.read_u64()?,
                        len: payload.read_u64()?,
                        compressed: payload.read_bool()?,
                    };

                    let payload = match blobs.load(address) {
                        Ok(bytes) => PaddedBytes::new(bytes),
                        Err(e) => {
                            self.degrade(&id, &e);
                            return Ok(Cell::Missing);
                        }
                    };

                    return Ok(self.deserialize_or_degrade(&id, serializer, &mut payload.reader()));
                }

                Ok(self.deserialize_or_degrade(&id, serializer, &mut payload))
            }
        }
    }

    fn deserialize_or_degrade(&mut self, id: &CellTypeId, serializer: Option<&dyn CellSerializer>, payload: &mut RowReader<'_>) -> Cell {
        let Some(serializer) = serializer else {
            self.degrade(id, &AppError::new(ContainerError::Unserializable(id.clone())));
            return Cell::Missing;
        };

        match serializer.deserialize(payload) {
            Ok(cell) => cell,
            Err(e) => {
                self.degrade(id, &e);
                Cell::Missing
            }
        }
    }

    fn degrade(&mut self, id: &CellTypeId, err: &AppError) {
        log::warn!(target: LOG_TARGET, "unable to decode a '{id}' value, substituting a missing cell: {err}");
        self.degraded += 1;
    }
}

impl core::fmt::Debug for RowDecoder<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RowDecoder")
            .field("dictionary", &self.dictionary)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::container::error::{ErrorKind, error_kind};
    use crate::data::{BinaryCell, CompactCodec, DataValue, DateTimeCell, DoubleCell, IntCell, StringCell};
    use chrono::{TimeZone, Utc};
    use core::any::Any;
    use core::fmt::{Display, Formatter, Result as FmtResult};
    use core::hash::{Hash, Hasher};
    use rustc_hash::FxHashMap;

    fn encode(registry: &TypeRegistry, dict: &mut TagDictionary, row: &DataRow) -> Result<PaddedBytes> {
        let mut writer = RowWriter::new();
        RowEncoder::new(registry, dict, None).encode_row(row, &mut writer)?;
        Ok(PaddedBytes::new(writer.take()))
    }

    fn sample_row() -> DataRow {
        DataRow::new(
            RowKey::named("Row0").with_color(Color::rgb(1, 2, 3)),
            vec![
                Cell::from(StringCell::from("abc")),
                Cell::Missing,
                Cell::from(IntCell(-17)),
                Cell::from(DoubleCell(3.25)),
                Cell::from(DateTimeCell(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())),
            ],
        )
    }

    #[test]
    fn row_round_trip() {
        let registry = TypeRegistry::with_builtins();
        let mut dict = TagDictionary::new();
        let row = sample_row();
        let body = encode(&registry, &mut dict, &row).unwrap();

        let frozen = dict.freeze();
        let mut decoder = RowDecoder::new(&registry, &frozen, None);
        let decoded = decoder.decode_row(&body, row.width()).unwrap();

        assert_eq!(decoded, row);
        assert_eq!(decoded.key.color, Color::rgb(1, 2, 3));
        assert_eq!(decoder.degraded(), 0);

        // string, int and double get tags, the datetime goes through the fallback path
        assert_eq!(frozen.types(), [CellTypeId::STRING, CellTypeId::INT, CellTypeId::DOUBLE]);
    }

    #[test]
    fn broken_separator_is_corruption() {
        let registry = TypeRegistry::with_builtins();
        let mut dict = TagDictionary::new();
        let row = DataRow::new(RowKey::named("k"), vec![Cell::from(IntCell(1))]);
        let body = encode(&registry, &mut dict, &row).unwrap();

        let mut bytes = body.as_slice().to_vec();
        let last = bytes.len() - 1;
        bytes[last] = 0x55;

        let frozen = dict.freeze();
        let err = RowDecoder::new(&registry, &frozen, None)
            .decode_row(&PaddedBytes::new(bytes), 1)
            .unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }

    #[test]
    fn out_of_range_tag_is_corruption() {
        let registry = TypeRegistry::with_builtins();
        let frozen = FrozenDictionary::default();
        let body = PaddedBytes::new(vec![42, 0, 0, 0, 0, ROW_SEPARATOR]);
        let err = RowDecoder::new(&registry, &frozen, None).decode_row(&body, 0).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::FormatCorruption);
    }

    /// A value whose codec writes fine but refuses to read anything back.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Fragile(u8);

    impl Display for Fragile {
        fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
            write!(f, "fragile {}", self.0)
        }
    }

    impl DataValue for Fragile {
        fn cell_type(&self) -> CellTypeId {
            CellTypeId::from_static("fragile")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn eq_value(&self, other: &dyn DataValue) -> bool {
            other.as_any().downcast_ref::<Self>() == Some(self)
        }

        fn hash_value(&self, mut state: &mut dyn Hasher) {
            self.hash(&mut state);
        }
    }

    impl crate::data::CompactValue for Fragile {
        fn write_compact(&self, writer: &mut RowWriter) -> Result<()> {
            writer.write_byte(self.0);
            writer.write_byte(self.0);
            Ok(())
        }

        fn read_compact(_reader: &mut RowReader<'_>) -> Result<Self> {
            ohno::bail!("fragile values never decode")
        }
    }

    #[test]
    fn failing_cell_degrades_to_missing() {
        let mut registry = TypeRegistry::with_builtins();
        registry
            .register(TypeEntry::new(CellTypeId::from_static("fragile")).compact(CompactCodec::<Fragile>::new()))
            .unwrap();

        let mut dict = TagDictionary::new();
        let row = DataRow::new(RowKey::named("k"), vec![Cell::from(Fragile(3)), Cell::from(IntCell(9))]);
        let body = encode(&registry, &mut dict, &row).unwrap();

        let frozen = dict.freeze();
        let mut decoder = RowDecoder::new(&registry, &frozen, None);
        let decoded = decoder.decode_row(&body, 2).unwrap();
        assert!(decoded.cells[0].is_missing());
        assert_eq!(decoded.cells[1], Cell::from(IntCell(9)));
        assert_eq!(decoder.degraded(), 1);
    }

    #[test]
    fn type_without_codec_is_unserializable() {
        let mut registry = TypeRegistry::with_builtins();
        registry.register(TypeEntry::new(CellTypeId::from_static("fragile"))).unwrap();

        let mut dict = TagDictionary::new();
        let row = DataRow::new(RowKey::named("k"), vec![Cell::from(Fragile(1))]);
        let err = encode(&registry, &mut dict, &row).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::Unserializable);
    }

    #[derive(Debug, Default)]
    struct MemoryBlobs {
        payloads: FxHashMap<u64, (Vec<u8>, bool)>,
        next: u64,
    }

    impl BlobSink for MemoryBlobs {
        fn store(&mut self, payload: &[u8], compress: bool) -> Result<BlobAddress> {
            let offset = self.next;
            self.next += payload.len() as u64;
            let _ = self.payloads.insert(offset, (payload.to_vec(), compress));
            Ok(BlobAddress {
                offset,
                len: payload.len() as u64,
                compressed: compress,
            })
        }
    }

    impl BlobSource for MemoryBlobs {
        fn load(&mut self, address: BlobAddress) -> Result<Vec<u8>> {
            self.payloads
                .get(&address.offset)
                .map(|(bytes, _)| bytes.clone())
                .ok_or_else(|| ohno::app_err!("no blob at {}", address.offset))
        }
    }

    #[test]
    fn blob_values_go_out_of_line() {
        let registry = TypeRegistry::with_builtins();
        let mut dict = TagDictionary::new();
        let mut blobs = MemoryBlobs::default();
        let row = DataRow::new(RowKey::named("k"), vec![Cell::from(BinaryCell(vec![7; 1000]))]);

        let mut writer = RowWriter::new();
        RowEncoder::new(&registry, &mut dict, Some(&mut blobs))
            .encode_row(&row, &mut writer)
            .unwrap();
        let body = PaddedBytes::new(writer.take());
        assert!(body.len() < 100, "blob payload should not be inline");
        assert!(blobs.payloads.values().all(|(_, compressed)| *compressed));

        let frozen = dict.freeze();
        let decoded = RowDecoder::new(&registry, &frozen, Some(&mut blobs)).decode_row(&body, 1).unwrap();
        assert_eq!(decoded, row);
    }
}
