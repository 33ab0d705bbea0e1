//! Host-visible transfer notifications.
//!
//! Storage controllers report activity through this seam so a UI can show
//! a busy indicator and running totals without polling device registers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// A media read was submitted to the backend.
    ReadStart,
    /// A media read finished and its payload reached the guest.
    ReadEnd { bytes: u64, sectors: u64 },
    /// Guest data was handed to the backend for writing.
    WriteEnd { bytes: u64, sectors: u64 },
}

pub trait EventSink {
    fn event(&mut self, event: TransferEvent);
}

/// Sink that ignores everything.
pub struct NullEvents;

impl EventSink for NullEvents {
    fn event(&mut self, _event: TransferEvent) {}
}
