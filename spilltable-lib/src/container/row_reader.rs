use super::error::corruption;
use crate::Result;
use std::io::Read;

/// Zero bytes kept after the logical end of every decode buffer so vlen never reads past the allocation.
pub const READ_PADDING: usize = 16;

/// An owned byte buffer with trailing padding, the only thing a [`RowReader`] can be built from.
#[derive(Debug, Clone, Default)]
pub struct PaddedBytes {
    bytes: Vec<u8>,
    len: usize,
}

impl PaddedBytes {
    #[must_use]
    pub fn new(mut bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        bytes.resize(len + READ_PADDING, 0);
        Self { bytes, len }
    }

    /// Replaces the content with exactly `len` bytes pulled from `source`, reusing the allocation.
    ///
    /// The buffer only grows as bytes actually arrive, so a bogus `len` from a damaged file cannot
    /// force a large allocation.
    pub fn fill_from(&mut self, source: &mut impl Read, len: usize) -> std::io::Result<()> {
        self.bytes.clear();
        self.len = 0;

        let read = Read::take(&mut *source, len as u64).read_to_end(&mut self.bytes)?;
        if read < len {
            self.bytes.clear();
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, found {read}"),
            ));
        }

        self.bytes.resize(len + READ_PADDING, 0);
        self.len = len;
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    #[must_use]
    pub fn reader(&self) -> RowReader<'_> {
        RowReader {
            data: &self.bytes,
            position: 0,
            limit: self.len,
        }
    }
}

/// Cursor over an encoded byte sequence.
///
/// Every read is bounds-checked against the logical length and reports truncation as format
/// corruption instead of panicking.
#[derive(Debug)]
pub struct RowReader<'a> {
    data: &'a [u8],
    position: usize,
    limit: usize,
}

impl<'a> RowReader<'a> {
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.position == self.limit
    }

    fn advance(&mut self, len: usize) -> Result<usize> {
        let start = self.position;
        match start.checked_add(len) {
            Some(end) if end <= self.limit => {
                self.position = end;
                Ok(start)
            }
            _ => Err(corruption(format!(
                "read of {len} bytes at offset {start} runs past the end of a {} byte record",
                self.limit
            ))),
        }
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.advance(len)?;
        Ok(&self.data[start..start + len])
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let start = self.advance(1)?;
        Ok(self.data[start])
    }

    pub fn peek_byte(&self) -> Option<u8> {
        (self.position < self.limit).then(|| self.data[self.position])
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, bytes) =
            vlen::decode::<u64>(&self.data[self.position..]).map_err(|e| corruption(format!("invalid vlen integer: {e}")))?;
        let _ = self.advance(bytes)?;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let raw = self.read_u64()?;
        Ok((raw >> 1).cast_signed() ^ -((raw & 1).cast_signed()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_slice(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u64()?;
        usize::try_from(len).map_err(|e| corruption(format!("length {len} does not fit in memory: {e}")))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.read_slice(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        core::str::from_utf8(bytes).map_err(|e| corruption(format!("invalid UTF-8 in string: {e}")))
    }

    pub fn read_optional_str(&mut self) -> Result<Option<&'a str>> {
        if self.read_bool()? { self.read_str().map(Some) } else { Ok(None) }
    }

    /// Splits off the next `len` bytes as an independent reader and skips past them here.
    pub fn sub_reader(&mut self, len: usize) -> Result<Self> {
        let start = self.advance(len)?;
        Ok(Self {
            data: &self.data[start..],
            position: 0,
            limit: len,
        })
    }
}
