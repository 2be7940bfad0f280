use crate::Result;
use ohno::{IntoAppError, app_err};
use std::io::Write;

/// Accumulates the encoded body of one row, then frames it onto an output stream.
#[derive(Debug, Default)]
pub struct RowWriter {
    buffer: Vec<u8>,
    row_count: u64,
}

impl RowWriter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            row_count: 0,
        }
    }

    #[must_use]
    pub const fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Number of bytes written for the current row so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Discards the current row without emitting it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Hands out the accumulated bytes, leaving the writer empty.
    pub fn take(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.buffer)
    }

    /// Emits the current row as `[u32 LE length][body]` and starts a new one.
    pub fn row_done(&mut self, out: &mut impl Write) -> Result<()> {
        let len = u32::try_from(self.buffer.len()).into_app_err_with(|| format!("encoded row of {} bytes is too large", self.buffer.len()))?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&self.buffer)?;
        self.buffer.clear();
        self.row_count += 1;
        Ok(())
    }

    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; 17];
        let bytes_written = vlen::encode(&mut buf[..], value).map_err(|e| app_err!("unable to encode vlen u64: {e}"))?;
        self.buffer.extend_from_slice(&buf[..bytes_written]);
        Ok(())
    }

    /// Zig-zag encodes a signed value so small magnitudes stay short.
    #[inline]
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(((value << 1) ^ (value >> 63)).cast_unsigned())
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    pub fn write_len(&mut self, len: usize) -> Result<()> {
        self.write_u64(len as u64)
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_len(bytes.len())?;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_optional_str(&mut self, s: Option<&str>) -> Result<()> {
        if let Some(s) = s {
            self.write_byte(1);
            self.write_str(s)
        } else {
            self.write_byte(0);
            Ok(())
        }
    }

    /// Runs `f` and prefixes whatever it wrote with its length.
    pub fn write_length_prefixed(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let start = self.buffer.len();
        let result = f(self);
        let payload = self.buffer.split_off(start);
        result?;
        self.write_bytes(&payload)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn row_done_frames_body() {
        let mut writer = RowWriter::new();
        writer.write_byte(7);
        writer.write_u32(0xAABB_CCDD);

        let mut out = Vec::new();
        writer.row_done(&mut out).unwrap();

        assert_eq!(out, [5, 0, 0, 0, 7, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert!(writer.is_empty());
        assert_eq!(writer.row_count(), 1);
    }

    #[test]
    fn length_prefix_discards_partial_output_on_error() {
        let mut writer = RowWriter::new();
        writer.write_byte(1);
        let result = writer.write_length_prefixed(|w| {
            w.write_byte(9);
            ohno::bail!("nope")
        });
        let _ = result.unwrap_err();
        assert_eq!(writer.as_bytes(), [1]);
    }

    #[test]
    fn take_resets() {
        let mut writer = RowWriter::new();
        writer.write_bool(true);
        assert_eq!(writer.take(), vec![1]);
        assert_eq!(writer.len(), 0);
    }
}
