//! Disk image backends and geometry for the vireo storage devices.
//!
//! Backends are asynchronous by contract: requests are submitted, results
//! are polled. A backend is free to complete work before `submit_*`
//! returns (the in-memory backend does), and callers must behave
//! identically either way.

pub mod backend;
pub mod error;
pub mod geometry;

pub use backend::{Completion, MemDisk, RequestId, StepDisk, StorageBackend};
pub use error::{DiskError, Result};
pub use geometry::{DriveGeometry, CD_SECTOR_SIZE, HD_SECTOR_SIZE};
