//! Deterministic snapshot encoding for the vireo device models.

pub mod state;
pub mod storage;
