//! PCI configuration space bridge on ports 0xCF8/0xCFC.
//!
//! Both doubleword ports are modeled as four consecutive byte registers,
//! matching how the guest-visible protocol behaves: a configuration
//! query latches when the last address byte lands, a configuration write
//! commits when the last data byte lands. Multi-byte accesses decompose
//! into byte accesses in address order, so a 32-bit `out` to 0xCF8
//! performs exactly one query.

use std::collections::BTreeMap;

use vireo_io_snapshot::state::{IoSnapshot, SnapshotResult, SnapshotVersion};
use vireo_io_snapshot::storage::PciBusState;
use vireo_platform::io::PortIoDevice;

pub const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
pub const PCI_CONFIG_DATA: u16 = 0xCFC;

/// An I/O BAR with a power-of-two size, used to answer size probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciBar {
    pub size: u32,
}

/// Registration descriptor for one PCI function.
pub struct PciDeviceProfile {
    /// bus << 8 | device << 3 | function.
    pub bdf: u16,
    /// Configuration space as bytes, at least the 64-byte header.
    pub config_space: Vec<u8>,
    /// Descriptors aligned with registers 0x10..0x28; `None` slots read
    /// back as zero after any write.
    pub bars: Vec<Option<PciBar>>,
}

struct Slot {
    space: Vec<u32>,
    bars: Vec<Option<PciBar>>,
    /// Dwords 4..10 captured at registration; non-probe BAR writes snap
    /// back to these (BAR relocation is not supported).
    original_bars: [u32; 6],
}

pub struct PciBus {
    addr: [u8; 4],
    value: [u8; 4],
    response: [u8; 4],
    status: [u8; 4],
    slots: BTreeMap<u16, Slot>,
}

impl PciBus {
    /// A bus with the host bridge and ISA bridge already present, the
    /// minimum population guests expect to enumerate.
    pub fn new() -> Self {
        let mut bus = Self {
            addr: [0; 4],
            value: [0; 4],
            response: [0; 4],
            status: [0; 4],
            slots: BTreeMap::new(),
        };
        bus.register_device(host_bridge_profile());
        bus.register_device(isa_bridge_profile());
        bus
    }

    pub fn register_device(&mut self, profile: PciDeviceProfile) {
        debug_assert!(profile.config_space.len() >= 64, "config space below header size");
        debug_assert!(
            !self.slots.contains_key(&profile.bdf),
            "duplicate registration for bdf {:#x}",
            profile.bdf
        );
        let space: Vec<u32> = profile
            .config_space
            .chunks(4)
            .map(|chunk| {
                let mut dword = [0u8; 4];
                dword[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(dword)
            })
            .collect();
        let mut original_bars = [0u32; 6];
        for (index, dst) in original_bars.iter_mut().enumerate() {
            *dst = space.get(4 + index).copied().unwrap_or(0);
        }
        self.slots.insert(profile.bdf, Slot { space, bars: profile.bars, original_bars });
    }

    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        let mut value = 0u32;
        for i in 0..u16::from(size) {
            value |= u32::from(self.read_byte(port.wrapping_add(i))) << (8 * i);
        }
        value
    }

    pub fn io_write(&mut self, port: u16, size: u8, value: u32) {
        for i in 0..u16::from(size) {
            self.write_byte(port.wrapping_add(i), (value >> (8 * i)) as u8);
        }
    }

    fn read_byte(&mut self, port: u16) -> u8 {
        match port {
            0xCF8..=0xCFB => self.status[usize::from(port - PCI_CONFIG_ADDRESS)],
            0xCFC..=0xCFF => self.response[usize::from(port - PCI_CONFIG_DATA)],
            _ => 0xFF,
        }
    }

    fn write_byte(&mut self, port: u16, value: u8) {
        match port {
            0xCF8..=0xCFB => {
                let index = usize::from(port - PCI_CONFIG_ADDRESS);
                self.addr[index] = value;
                if index == 3 {
                    self.query();
                }
            }
            0xCFC..=0xCFF => {
                let index = usize::from(port - PCI_CONFIG_DATA);
                self.value[index] = value;
                if index == 3 {
                    self.config_write();
                }
            }
            _ => {}
        }
    }

    /// Latch the response for the selected function/register. Absent
    /// functions answer all-ones with a zero status.
    fn query(&mut self) {
        let bdf = u16::from(self.addr[2]) << 8 | u16::from(self.addr[1]);
        let reg = usize::from(self.addr[0] & 0xFC);
        match self.slots.get(&bdf) {
            Some(slot) => {
                self.status = 0x8000_0000u32.to_le_bytes();
                let dword = slot.space.get(reg >> 2).copied().unwrap_or(0);
                self.response = dword.to_le_bytes();
            }
            None => {
                self.response = [0xFF; 4];
                self.status = [0; 4];
            }
        }
    }

    /// Commit the latched data dword. Only BAR registers react; an
    /// all-ones probe stores the size mask, anything else restores the
    /// registration-time value. Every other register ignores writes.
    fn config_write(&mut self) {
        let bdf = u16::from(self.addr[2]) << 8 | u16::from(self.addr[1]);
        let reg = usize::from(self.addr[0] & 0xFC);
        let Some(slot) = self.slots.get_mut(&bdf) else {
            return;
        };
        if !(0x10..0x28).contains(&reg) {
            return;
        }
        let dword_index = reg >> 2;
        if dword_index >= slot.space.len() {
            return;
        }
        let written = u32::from_le_bytes(self.value);
        let bar_index = (reg - 0x10) >> 2;
        match slot.bars.get(bar_index).copied().flatten() {
            Some(bar) => {
                if (written | 3) == 0xFFFF_FFFF {
                    slot.space[dword_index] = !(bar.size - 1);
                } else {
                    slot.space[dword_index] = slot.original_bars[bar_index];
                }
            }
            None => slot.space[dword_index] = 0,
        }
    }

    pub fn snapshot_state(&self) -> PciBusState {
        PciBusState {
            addr: self.addr,
            value: self.value,
            response: self.response,
            status: self.status,
        }
    }

    /// Adopt the serialized latches. Registered devices are wiring, not
    /// state; the machine re-registers them before restoring.
    pub fn restore_state(&mut self, state: &PciBusState) {
        self.addr = state.addr;
        self.value = state.value;
        self.response = state.response;
        self.status = state.status;
    }
}

impl Default for PciBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIoDevice for PciBus {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        self.io_read(port, size)
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        self.io_write(port, size, value);
    }
}

impl IoSnapshot for PciBus {
    const DEVICE_ID: [u8; 4] = PciBusState::DEVICE_ID;
    const DEVICE_VERSION: SnapshotVersion = PciBusState::DEVICE_VERSION;

    fn save_state(&self) -> Vec<u8> {
        self.snapshot_state().save_state()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let mut state = PciBusState::default();
        state.load_state(bytes)?;
        self.restore_state(&state);
        Ok(())
    }
}

fn bridge_space(header: &[u8]) -> Vec<u8> {
    let mut space = header.to_vec();
    space.resize(64, 0);
    space
}

fn host_bridge_profile() -> PciDeviceProfile {
    // 00:00.0 Host bridge: Intel 440FX PMC.
    PciDeviceProfile {
        bdf: 0,
        config_space: bridge_space(&[
            0x86, 0x80, 0x37, 0x12, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x06,
        ]),
        bars: Vec::new(),
    }
}

fn isa_bridge_profile() -> PciDeviceProfile {
    // 00:01.0 ISA bridge: Intel 82371SB PIIX3.
    PciDeviceProfile {
        bdf: 1 << 3,
        config_space: bridge_space(&[
            0x86, 0x80, 0x00, 0x70, 0x07, 0x00, 0x00, 0x02, 0x00, 0x00, 0x01, 0x06, 0x00, 0x00,
            0x80, 0x00,
        ]),
        bars: Vec::new(),
    }
}
