//! Asynchronous disk image backends.

use std::collections::VecDeque;

use crate::error::DiskError;

/// Monotonic request handle. Ids are unique for the lifetime of a backend
/// and never reused, so a completion always names exactly one submission.
pub type RequestId = u64;

/// Outcome of one submitted request, surfaced by `poll_complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Read { id: RequestId, data: Vec<u8> },
    Write { id: RequestId },
    Failed { id: RequestId, error: DiskError },
}

impl Completion {
    pub fn id(&self) -> RequestId {
        match self {
            Completion::Read { id, .. } | Completion::Write { id } | Completion::Failed { id, .. } => *id,
        }
    }
}

/// Byte-addressed disk image with submit/poll semantics.
///
/// Completions come back in submission order. A backend may finish a
/// request before `submit_*` returns or arbitrarily many polls later;
/// callers must not depend on either timing.
pub trait StorageBackend {
    /// Image size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn submit_read(&mut self, offset: u64, len: usize) -> RequestId;

    fn submit_write(&mut self, offset: u64, data: Vec<u8>) -> RequestId;

    fn poll_complete(&mut self) -> Option<Completion>;
}

fn check_range(capacity: u64, offset: u64, len: u64) -> Result<(), DiskError> {
    let end = offset.checked_add(len).ok_or(DiskError::OffsetOverflow)?;
    if end > capacity {
        return Err(DiskError::OutOfBounds { offset, len, capacity });
    }
    Ok(())
}

/// Fully in-memory image. Every request completes before `submit_*`
/// returns; results still arrive through the poll queue.
pub struct MemDisk {
    data: Vec<u8>,
    next_id: RequestId,
    done: VecDeque<Completion>,
}

impl MemDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, next_id: 0, done: VecDeque::new() }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn alloc_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl StorageBackend for MemDisk {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn submit_read(&mut self, offset: u64, len: usize) -> RequestId {
        let id = self.alloc_id();
        let completion = match check_range(self.data.len() as u64, offset, len as u64) {
            Ok(()) => {
                let start = offset as usize;
                Completion::Read { id, data: self.data[start..start + len].to_vec() }
            }
            Err(error) => Completion::Failed { id, error },
        };
        self.done.push_back(completion);
        id
    }

    fn submit_write(&mut self, offset: u64, data: Vec<u8>) -> RequestId {
        let id = self.alloc_id();
        let completion = match check_range(self.data.len() as u64, offset, data.len() as u64) {
            Ok(()) => {
                let start = offset as usize;
                self.data[start..start + data.len()].copy_from_slice(&data);
                Completion::Write { id }
            }
            Err(error) => Completion::Failed { id, error },
        };
        self.done.push_back(completion);
        id
    }

    fn poll_complete(&mut self) -> Option<Completion> {
        self.done.pop_front()
    }
}

enum StepOp {
    Read { offset: u64, len: usize },
    Write { offset: u64, data: Vec<u8> },
}

/// Image that holds submitted requests until the host steps them.
///
/// Exists to exercise deferred completion paths: nothing completes inside
/// `submit_*`, and the host chooses when (and how many) requests finish.
pub struct StepDisk {
    data: Vec<u8>,
    next_id: RequestId,
    pending: VecDeque<(RequestId, StepOp)>,
    done: VecDeque<Completion>,
}

impl StepDisk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, next_id: 0, pending: VecDeque::new(), done: VecDeque::new() }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Execute the oldest pending request. Returns false when idle.
    pub fn step_one(&mut self) -> bool {
        let Some((id, op)) = self.pending.pop_front() else {
            return false;
        };
        let capacity = self.data.len() as u64;
        let completion = match op {
            StepOp::Read { offset, len } => match check_range(capacity, offset, len as u64) {
                Ok(()) => {
                    let start = offset as usize;
                    Completion::Read { id, data: self.data[start..start + len].to_vec() }
                }
                Err(error) => Completion::Failed { id, error },
            },
            StepOp::Write { offset, data } => match check_range(capacity, offset, data.len() as u64) {
                Ok(()) => {
                    let start = offset as usize;
                    self.data[start..start + data.len()].copy_from_slice(&data);
                    Completion::Write { id }
                }
                Err(error) => Completion::Failed { id, error },
            },
        };
        self.done.push_back(completion);
        true
    }

    pub fn step_all(&mut self) {
        while self.step_one() {}
    }

    fn alloc_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl StorageBackend for StepDisk {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn submit_read(&mut self, offset: u64, len: usize) -> RequestId {
        let id = self.alloc_id();
        self.pending.push_back((id, StepOp::Read { offset, len }));
        id
    }

    fn submit_write(&mut self, offset: u64, data: Vec<u8>) -> RequestId {
        let id = self.alloc_id();
        self.pending.push_back((id, StepOp::Write { offset, data }));
        id
    }

    fn poll_complete(&mut self) -> Option<Completion> {
        self.done.pop_front()
    }
}
