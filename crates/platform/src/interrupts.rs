//! Interrupt line handles handed to device models.

use std::cell::Cell;
use std::rc::Rc;

/// An edge-triggered interrupt line.
///
/// Devices call [`raise`](IrqLine::raise) once per event after applying
/// their own masking (nIEN and friends); delivery policy belongs to the
/// interrupt controller behind the handle.
pub trait IrqLine {
    fn raise(&mut self);
}

/// Line that drops every edge. Default wiring until the machine attaches
/// a real controller.
pub struct NullIrq;

impl IrqLine for NullIrq {
    fn raise(&mut self) {}
}

/// Shared counting latch. The device side raises, the host side reads and
/// clears; useful wherever edges must be counted rather than just seen.
#[derive(Clone, Default)]
pub struct LatchIrq(Rc<Cell<u64>>);

impl LatchIrq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges raised since the last [`clear`](LatchIrq::clear).
    pub fn raised(&self) -> u64 {
        self.0.get()
    }

    pub fn clear(&self) -> u64 {
        self.0.replace(0)
    }
}

impl IrqLine for LatchIrq {
    fn raise(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}
