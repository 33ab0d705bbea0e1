use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("request out of bounds: offset={offset} len={len} capacity={capacity}")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("byte offset computation overflowed")]
    OffsetOverflow,
}
