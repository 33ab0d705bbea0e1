//! x86 port-mapped I/O dispatch.

/// A device reachable through `in`/`out` instructions.
///
/// `size` is the access width in bytes (1, 2 or 4). Reads of unclaimed
/// ports float high; that fallback lives in [`IoPortBus`], not in the
/// devices.
pub trait PortIoDevice {
    fn read(&mut self, port: u16, size: u8) -> u32;

    fn write(&mut self, port: u16, size: u8, value: u32);

    /// Return the device to its power-on state.
    fn reset(&mut self) {}
}

struct RangeEntry {
    start: u16,
    len: u16,
    device: Box<dyn PortIoDevice>,
}

/// Routes port accesses to registered devices by port range.
#[derive(Default)]
pub struct IoPortBus {
    ranges: Vec<RangeEntry>,
}

impl IoPortBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `device` for ports `start..start + len`. Later
    /// registrations win on overlap.
    pub fn register_range(&mut self, start: u16, len: u16, device: Box<dyn PortIoDevice>) {
        self.ranges.push(RangeEntry { start, len, device });
    }

    fn find(&mut self, port: u16) -> Option<&mut RangeEntry> {
        self.ranges.iter_mut().rev().find(|entry| {
            port >= entry.start && (port - entry.start) < entry.len
        })
    }

    pub fn read(&mut self, port: u16, size: u8) -> u32 {
        match self.find(port) {
            Some(entry) => entry.device.read(port, size),
            None => match size {
                1 => 0xFF,
                2 => 0xFFFF,
                _ => 0xFFFF_FFFF,
            },
        }
    }

    pub fn write(&mut self, port: u16, size: u8, value: u32) {
        if let Some(entry) = self.find(port) {
            entry.device.write(port, size, value);
        }
    }

    pub fn reset(&mut self) {
        for entry in &mut self.ranges {
            entry.device.reset();
        }
    }
}
