//! Tag-length-value snapshot container.
//!
//! Layout: 4-byte device id, u16 major, u16 minor, then zero or more
//! fields of `u16 tag | u32 len | payload`, all little endian. Unknown
//! tags are skipped on read so minor-version additions stay compatible;
//! a major bump is a hard break.

pub mod codec;

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot truncated")]
    Truncated,

    #[error("snapshot device id mismatch")]
    DeviceIdMismatch,

    #[error("unsupported snapshot major version {0}")]
    UnsupportedMajor(u16),

    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),

    #[error("snapshot allocation failed")]
    OutOfMemory,
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

/// Snapshotting contract for device models.
///
/// `DEVICE_ID` is stable forever; within one major version only new TLV
/// fields may be added.
pub trait IoSnapshot {
    const DEVICE_ID: [u8; 4];
    const DEVICE_VERSION: SnapshotVersion;

    fn save_state(&self) -> Vec<u8>;
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()>;
}

pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], version: SnapshotVersion) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&device_id);
        buf.extend_from_slice(&version.major.to_le_bytes());
        buf.extend_from_slice(&version.minor.to_le_bytes());
        Self { buf }
    }

    pub fn field_bytes(&mut self, tag: u16, payload: &[u8]) {
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn field_u32(&mut self, tag: u16, value: u32) {
        self.field_bytes(tag, &value.to_le_bytes());
    }

    pub fn field_u64(&mut self, tag: u16, value: u64) {
        self.field_bytes(tag, &value.to_le_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct SnapshotReader<'a> {
    version: SnapshotVersion,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], device_id: [u8; 4]) -> SnapshotResult<Self> {
        if bytes.len() < 8 {
            return Err(SnapshotError::Truncated);
        }
        if bytes[0..4] != device_id {
            return Err(SnapshotError::DeviceIdMismatch);
        }
        let major = u16::from_le_bytes([bytes[4], bytes[5]]);
        let minor = u16::from_le_bytes([bytes[6], bytes[7]]);

        let mut fields = BTreeMap::new();
        let mut pos = 8usize;
        while pos < bytes.len() {
            if pos + 6 > bytes.len() {
                return Err(SnapshotError::Truncated);
            }
            let tag = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
            let len = u32::from_le_bytes([
                bytes[pos + 2],
                bytes[pos + 3],
                bytes[pos + 4],
                bytes[pos + 5],
            ]) as usize;
            pos += 6;
            let end = pos.checked_add(len).ok_or(SnapshotError::Truncated)?;
            if end > bytes.len() {
                return Err(SnapshotError::Truncated);
            }
            // Duplicate tags: last one wins, like repeated writes.
            fields.insert(tag, &bytes[pos..end]);
            pos = end;
        }

        Ok(Self { version: SnapshotVersion::new(major, minor), fields })
    }

    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    pub fn ensure_device_major(&self, major: u16) -> SnapshotResult<()> {
        if self.version.major != major {
            return Err(SnapshotError::UnsupportedMajor(self.version.major));
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        match self.fields.get(&tag) {
            None => Ok(None),
            Some(payload) => {
                let arr: [u8; 4] = (*payload)
                    .try_into()
                    .map_err(|_| SnapshotError::InvalidFieldEncoding("u32 field length"))?;
                Ok(Some(u32::from_le_bytes(arr)))
            }
        }
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        match self.fields.get(&tag) {
            None => Ok(None),
            Some(payload) => {
                let arr: [u8; 8] = (*payload)
                    .try_into()
                    .map_err(|_| SnapshotError::InvalidFieldEncoding("u64 field length"))?;
                Ok(Some(u64::from_le_bytes(arr)))
            }
        }
    }
}
