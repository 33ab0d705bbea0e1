//! Host-side seams shared by the vireo device models: port I/O dispatch,
//! guest physical memory access, interrupt lines and transfer events.

pub mod events;
pub mod interrupts;
pub mod io;
pub mod memory;

pub use events::{EventSink, NullEvents, TransferEvent};
pub use interrupts::{IrqLine, LatchIrq, NullIrq};
pub use io::{IoPortBus, PortIoDevice};
pub use memory::MemoryBus;
