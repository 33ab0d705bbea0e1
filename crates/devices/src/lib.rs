//! Guest-visible device models: the legacy IDE/ATAPI storage controller
//! and the PCI configuration space bridge.

pub mod ide;
pub mod pci;
