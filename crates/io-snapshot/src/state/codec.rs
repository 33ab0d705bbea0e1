//! Little-endian primitive codec for packed field payloads.

use super::{SnapshotError, SnapshotResult};

/// By-value builder; chain the primitives, then [`finish`](Encoder::finish).
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bool(self, value: bool) -> Self {
        self.u8(value as u8)
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor over a packed field payload.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(SnapshotError::InvalidFieldEncoding("length overflow"))?;
        if end > self.buf.len() {
            return Err(SnapshotError::InvalidFieldEncoding("truncated payload"));
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> SnapshotResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> SnapshotResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> SnapshotResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> SnapshotResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn bool(&mut self) -> SnapshotResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SnapshotError::InvalidFieldEncoding("bool out of range")),
        }
    }

    pub fn bytes(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
        self.take(len)
    }

    /// Owned copy of the next `len` bytes. Allocation is fallible so a
    /// hostile length field cannot abort the process.
    pub fn bytes_vec(&mut self, len: usize) -> SnapshotResult<Vec<u8>> {
        let src = self.take(len)?;
        let mut out = Vec::new();
        out.try_reserve_exact(len).map_err(|_| SnapshotError::OutOfMemory)?;
        out.extend_from_slice(src);
        Ok(out)
    }

    /// Consume the decoder; trailing bytes are an encoding error.
    pub fn finish(self) -> SnapshotResult<()> {
        if self.pos != self.buf.len() {
            return Err(SnapshotError::InvalidFieldEncoding("trailing bytes"));
        }
        Ok(())
    }
}
