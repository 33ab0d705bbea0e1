//! Legacy IDE channel with one attached drive (ATA hard disk or ATAPI
//! CD-ROM).
//!
//! The model covers the classic command block, the control block status/
//! control register, PIO data transfers with DRQ-block interrupts, and
//! Bus Master IDE DMA through a physical region descriptor table. Media
//! access goes through an asynchronous [`StorageBackend`]; completions
//! are applied after port writes and from [`tick`](IdeController::tick),
//! so instant and deferred backends drive the same code path.

mod atapi;
mod dma;
mod identify;

pub use dma::MAX_PRD_ENTRIES_PER_DMA;

use std::cell::RefCell;
use std::rc::Rc;

use vireo_io_snapshot::state::{IoSnapshot, SnapshotResult, SnapshotVersion};
use vireo_io_snapshot::storage::IdeChannelState;
use vireo_platform::events::{EventSink, NullEvents, TransferEvent};
use vireo_platform::interrupts::{IrqLine, NullIrq};
use vireo_platform::memory::MemoryBus;
use vireo_storage::backend::{Completion, RequestId, StorageBackend};
use vireo_storage::geometry::DriveGeometry;

use crate::pci::{PciBar, PciDeviceProfile};

// Status register values the guest actually sees: combinations of BSY
// (0x80), DRDY (0x40), DSC (0x10), DRQ (0x08) and ERR (0x01).
const STATUS_READY: u8 = 0x50;
const STATUS_DATA: u8 = 0x58;
const STATUS_BUSY: u8 = 0x80;
const STATUS_FAULT: u8 = 0xFF;
const STATUS_RESET: u8 = 0x51;

const CTRL_NIEN: u8 = 0x02;
const CTRL_SRST: u8 = 0x04;

const DRIVE_HEAD_SLAVE: u8 = 0x10;

// Bus master status bits (write-one-to-clear for 2 and 4).
const DMA_STATUS_ACTIVE: u8 = 0x01;
const DMA_STATUS_ERROR: u8 = 0x02;
const DMA_STATUS_IRQ: u8 = 0x04;

/// Legacy resource assignment for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdePortMap {
    pub cmd_base: u16,
    pub ctrl_base: u16,
    pub bus_master_base: u16,
    pub irq: u8,
    pub pci_bdf: u16,
}

pub const PRIMARY_PORTS: IdePortMap = IdePortMap {
    cmd_base: 0x1F0,
    ctrl_base: 0x3F4,
    bus_master_base: 0xC000,
    irq: 14,
    pci_bdf: 0x1E << 3,
};

pub const SECONDARY_PORTS: IdePortMap = IdePortMap {
    cmd_base: 0x170,
    ctrl_base: 0x374,
    bus_master_base: 0xC000,
    irq: 15,
    pci_bdf: 0x1F << 3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeChannel {
    Primary,
    Secondary,
}

impl IdeChannel {
    pub fn ports(self) -> IdePortMap {
        match self {
            IdeChannel::Primary => PRIMARY_PORTS,
            IdeChannel::Secondary => SECONDARY_PORTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    /// Hard disk, 512-byte sectors.
    Ata,
    /// Packet device (CD-ROM), 2048-byte sectors.
    Atapi,
}

/// What a full staging buffer triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagedAction {
    None,
    CommitWrite,
    AtapiPacket,
}

/// The storage request the controller is waiting on.
#[derive(Debug)]
enum PendingTransfer {
    PioRead { id: RequestId, byte_count: usize },
    DmaRead { id: RequestId, byte_count: usize },
    WriteCommit { id: RequestId },
    DmaWrite { ids: Vec<RequestId> },
}

fn pending_matches(pending: &PendingTransfer, id: RequestId) -> bool {
    match pending {
        PendingTransfer::PioRead { id: expected, .. }
        | PendingTransfer::DmaRead { id: expected, .. }
        | PendingTransfer::WriteCommit { id: expected } => *expected == id,
        PendingTransfer::DmaWrite { ids } => ids.contains(&id),
    }
}

/// Cumulative transfer counters for host-side display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub sectors_read: u64,
    pub sectors_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// A media read is in flight.
    pub loading: bool,
}

pub struct IdeController {
    kind: DriveKind,
    ports: IdePortMap,
    geometry: DriveGeometry,
    disk: Rc<RefCell<dyn StorageBackend>>,
    irq: Box<dyn IrqLine>,
    events: Box<dyn EventSink>,
    stats: TransferStats,

    device_control: u8,
    last_drive: u8,
    pio_pos: usize,
    pio_data: Vec<u8>,
    lba: bool,
    sector_count: u16,
    sector_number: u16,
    /// Features on write, error code on read; shares one shift register.
    feature_error: u16,
    cylinder_low: u16,
    cylinder_high: u16,
    head: u8,
    drive_head: u8,
    status: u8,
    /// Applied after the next status read.
    next_status: Option<u8>,
    sectors_per_drq: u16,

    write_dest: u64,
    staging: Vec<u8>,
    staging_count: usize,
    staging_pos: usize,
    staged_action: StagedAction,

    prdt_addr: u32,
    dma_status: u8,

    pending: Option<PendingTransfer>,
}

impl IdeController {
    pub fn new(channel: IdeChannel, kind: DriveKind, disk: Rc<RefCell<dyn StorageBackend>>) -> Self {
        let byte_len = disk.borrow().len();
        let geometry = match kind {
            DriveKind::Ata => DriveGeometry::hard_disk(byte_len),
            DriveKind::Atapi => DriveGeometry::cdrom(byte_len),
        };
        Self {
            kind,
            ports: channel.ports(),
            geometry,
            disk,
            irq: Box::new(NullIrq),
            events: Box::new(NullEvents),
            stats: TransferStats::default(),
            device_control: CTRL_NIEN,
            last_drive: 0xFF,
            pio_pos: 0,
            pio_data: Vec::new(),
            lba: false,
            sector_count: 0,
            sector_number: 0,
            feature_error: 0,
            cylinder_low: 0,
            cylinder_high: 0,
            head: 0,
            drive_head: 0,
            status: STATUS_READY,
            next_status: None,
            sectors_per_drq: 1,
            write_dest: 0,
            staging: Vec::new(),
            staging_count: 0,
            staging_pos: 0,
            staged_action: StagedAction::None,
            prdt_addr: 0,
            dma_status: 0,
            pending: None,
        }
    }

    pub fn set_irq_line(&mut self, irq: Box<dyn IrqLine>) {
        self.irq = irq;
    }

    pub fn set_event_sink(&mut self, events: Box<dyn EventSink>) {
        self.events = events;
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn geometry(&self) -> DriveGeometry {
        self.geometry
    }

    pub fn ports(&self) -> IdePortMap {
        self.ports
    }

    /// PCI identity for this channel: an ICH10-style IDE function with
    /// I/O BARs mirroring the legacy assignments.
    pub fn pci_profile(&self) -> PciDeviceProfile {
        let mut space = vec![0u8; 0xA0];
        space[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
        space[0x02..0x04].copy_from_slice(&0x3A20u16.to_le_bytes());
        space[0x04..0x06].copy_from_slice(&0x0005u16.to_le_bytes()); // I/O + bus master
        space[0x06..0x08].copy_from_slice(&0x02A0u16.to_le_bytes());
        space[0x09] = 0x8F; // prog-if: native mode capable, bus master
        space[0x0A] = 0x01; // IDE controller
        space[0x0B] = 0x01; // mass storage
        space[0x10..0x12].copy_from_slice(&(self.ports.cmd_base | 1).to_le_bytes());
        space[0x14..0x16].copy_from_slice(&(self.ports.ctrl_base | 1).to_le_bytes());
        space[0x20..0x22].copy_from_slice(&(self.ports.bus_master_base | 1).to_le_bytes());
        space[0x2C..0x2E].copy_from_slice(&0x1043u16.to_le_bytes());
        space[0x2E..0x30].copy_from_slice(&0x82D4u16.to_le_bytes());
        space[0x3C] = self.ports.irq;
        space[0x3D] = 0x01; // INTA#
        PciDeviceProfile {
            bdf: self.ports.pci_bdf,
            config_space: space,
            bars: vec![
                Some(PciBar { size: 8 }),
                Some(PciBar { size: 4 }),
                None,
                None,
                Some(PciBar { size: 0x10 }),
            ],
        }
    }

    /// Read one of the controller's ports. PIO data reads do not touch
    /// guest memory, so no bus is needed here.
    pub fn io_read(&mut self, port: u16, size: u8) -> u32 {
        if let Some(offset) = port.checked_sub(self.ports.cmd_base) {
            if offset < 8 {
                return self.read_cmd_reg(offset, size);
            }
        }
        if port == (self.ports.ctrl_base | 2) {
            return u32::from(self.read_status());
        }
        if let Some(offset) = port.checked_sub(self.ports.bus_master_base) {
            if offset < 8 {
                return self.dma_port_read(offset, size);
            }
        }
        match size {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFFFF_FFFF,
        }
    }

    /// Write one of the controller's ports, then apply any storage
    /// completions the write produced.
    pub fn io_write(&mut self, mem: &mut dyn MemoryBus, port: u16, size: u8, value: u32) {
        if let Some(offset) = port.checked_sub(self.ports.cmd_base) {
            if offset < 8 {
                self.write_cmd_reg(mem, offset, size, value);
                self.pump(mem);
                return;
            }
        }
        if port == (self.ports.ctrl_base | 2) {
            self.write_control(value as u8);
            return;
        }
        if let Some(offset) = port.checked_sub(self.ports.bus_master_base) {
            if offset < 8 {
                self.dma_port_write(offset, size, value);
            }
        }
    }

    /// Advance deferred work: apply completions a backend has finished
    /// since the last call.
    pub fn tick(&mut self, mem: &mut dyn MemoryBus) {
        self.pump(mem);
    }

    fn read_cmd_reg(&mut self, offset: u16, size: u8) -> u32 {
        match offset {
            0 => match size {
                1 => u32::from(self.read_data()),
                2 => {
                    let lo = u32::from(self.read_data());
                    lo | u32::from(self.read_data()) << 8
                }
                _ => {
                    let mut value = 0u32;
                    for shift in [0u32, 8, 16, 24] {
                        value |= u32::from(self.read_data()) << shift;
                    }
                    value
                }
            },
            1 => u32::from(self.feature_error & 0xFF),
            2 => u32::from(self.sector_count & 0xFF),
            3 => u32::from(self.sector_number & 0xFF),
            4 => u32::from(self.cylinder_low & 0xFF),
            5 => u32::from(self.cylinder_high & 0xFF),
            6 => u32::from(self.drive_head),
            _ => u32::from(self.read_status()),
        }
    }

    fn write_cmd_reg(&mut self, mem: &mut dyn MemoryBus, offset: u16, size: u8, value: u32) {
        match offset {
            0 => match size {
                1 => self.write_data(value as u8),
                2 => {
                    self.write_data(value as u8);
                    self.write_data((value >> 8) as u8);
                }
                _ => {
                    for shift in [0u32, 8, 16, 24] {
                        self.write_data((value >> shift) as u8);
                    }
                }
            },
            1 => self.feature_error = shift_in(self.feature_error, value),
            2 => self.sector_count = shift_in(self.sector_count, value),
            3 => self.sector_number = shift_in(self.sector_number, value),
            4 => self.cylinder_low = shift_in(self.cylinder_low, value),
            5 => self.cylinder_high = shift_in(self.cylinder_high, value),
            6 => {
                let value = value as u8;
                if value & DRIVE_HEAD_SLAVE != 0 {
                    // No slave drive attached; the select is ignored
                    // outright so the master state stays untouched.
                    return;
                }
                self.drive_head = value;
                self.lba = value >> 6 & 1 != 0;
                self.head = value & 0x0F;
                self.last_drive = value;
            }
            _ => self.exec_ata_command(mem, value as u8),
        }
    }

    /// Returns the current status, then promotes any deferred value; the
    /// caller sees the state from before the read.
    fn read_status(&mut self) -> u8 {
        let current = self.status;
        if let Some(next) = self.next_status.take() {
            self.status = next;
        }
        current
    }

    fn write_control(&mut self, value: u8) {
        self.device_control = value;
        if value & CTRL_SRST != 0 {
            self.device_reset();
        }
    }

    /// Soft reset: post-diagnostic signature in the task file, no
    /// interrupt. In-flight storage requests are abandoned.
    fn device_reset(&mut self) {
        self.status = STATUS_RESET;
        self.sector_count = 1;
        self.feature_error = 1;
        self.sector_number = 1;
        match self.kind {
            DriveKind::Ata => {
                self.cylinder_low = 0x3C;
                self.cylinder_high = 0xC3;
            }
            DriveKind::Atapi => {
                self.cylinder_low = 0x14;
                self.cylinder_high = 0xEB;
            }
        }
        self.pending = None;
    }

    fn push_irq(&mut self) {
        if self.device_control & CTRL_NIEN == 0 {
            self.irq.raise();
        }
    }

    fn disk_len(&self) -> u64 {
        self.disk.borrow().len()
    }

    fn exec_ata_command(&mut self, mem: &mut dyn MemoryBus, command: u8) {
        match command {
            0x00 => {
                // NOP
                self.push_irq();
                self.status = STATUS_READY;
            }
            0x08 => {
                // DEVICE RESET
                self.pio_pos = 0;
                self.pio_data = Vec::new();
                self.device_reset();
                self.push_irq();
            }
            0x10 => self.push_irq(), // RECALIBRATE (obsolete)
            0x27 => self.read_native_max_address(),
            0x20 | 0x24 | 0x29 | 0xC4 => self.ata_read_sectors(command),
            0x30 | 0x34 | 0x39 => self.ata_write_sectors(command),
            0x90 => {
                // EXECUTE DEVICE DIAGNOSTIC
                self.push_irq();
                self.feature_error = 0x101;
                self.status = STATUS_READY;
            }
            0x91 => self.push_irq(), // INITIALIZE DEVICE PARAMETERS
            0xA0 => {
                // PACKET: stage a 12-byte command descriptor block.
                if self.kind == DriveKind::Atapi {
                    self.status = STATUS_DATA;
                    self.allocate_staging(12);
                    self.staged_action = StagedAction::AtapiPacket;
                    self.sector_count = 1;
                    self.push_irq();
                }
            }
            0xA1 => {
                // IDENTIFY PACKET DEVICE
                if self.kind == DriveKind::Atapi {
                    self.create_identify_block();
                    self.status = STATUS_DATA;
                } else {
                    self.status = STATUS_READY;
                }
                self.push_irq();
            }
            0xC6 => {
                // SET MULTIPLE MODE
                self.sectors_per_drq = self.sector_count;
                self.push_irq();
            }
            0xC8 => self.ata_read_dma(),
            0xCA => self.ata_write_dma(mem),
            0xE1 | 0xEA | 0xEF => self.push_irq(), // IDLE IMMEDIATE / FLUSH EXT / SET FEATURES
            0xEC => {
                // IDENTIFY DEVICE: packet devices stay silent so the
                // guest probes with 0xA1 instead.
                if self.kind == DriveKind::Atapi {
                    return;
                }
                self.create_identify_block();
                self.status = STATUS_DATA;
                self.push_irq();
            }
            _ => {
                // Unknown command: abort error code, no interrupt.
                self.feature_error = 4;
            }
        }
    }

    /// READ NATIVE MAX ADDRESS EXT, repurposed by the boot firmware to
    /// fetch the raw image size in bytes.
    fn read_native_max_address(&mut self) {
        self.push_irq();
        let len = self.disk_len() as u32;
        let mut data = vec![0u8; 12];
        data[4..8].copy_from_slice(&len.to_le_bytes());
        self.pio_data = data;
        self.status = STATUS_DATA;
    }

    fn chs_lba(&self) -> u64 {
        let cylinder = u64::from(self.cylinder_low & 0xFF | self.cylinder_high << 8 & 0xFF00);
        let head = u64::from(self.head);
        let sector = u64::from(self.sector_number & 0xFF);
        // Sector numbering starts at 1; sector 0 wraps to an address far
        // past any image and takes the out-of-range path.
        ((cylinder * u64::from(self.geometry.head_count) + head)
            * u64::from(self.geometry.sectors_per_track)
            + sector)
            .wrapping_sub(1)
    }

    fn lba28(&self) -> u64 {
        u64::from(self.sector_number & 0xFF)
            | u64::from(self.cylinder_low & 0xFF) << 8
            | u64::from(self.cylinder_high & 0xFF) << 16
            | u64::from(self.head) << 24
    }

    // Only the low 32 bits of the 48-bit address are assembled; images
    // this model serves sit far below that limit.
    fn lba48(&self) -> u64 {
        u64::from(self.sector_number & 0xFF)
            | u64::from(self.cylinder_low & 0xFF) << 8
            | u64::from(self.cylinder_high & 0xFF) << 16
            | u64::from(self.sector_number >> 8) << 24
    }

    /// Byte range of a sector transfer, or None when it falls outside
    /// the image (including address arithmetic overflow).
    fn transfer_range(&self, lba: u64, count: u32) -> Option<(u64, usize)> {
        let sector_size = u64::from(self.geometry.sector_size);
        let byte_count = u64::from(count) * sector_size;
        let start = lba.checked_mul(sector_size)?;
        let end = start.checked_add(byte_count)?;
        if end > self.disk_len() {
            return None;
        }
        Some((start, byte_count as usize))
    }

    fn command_sector_count(&self, extended: bool) -> u32 {
        if extended {
            if self.sector_count == 0 {
                0x10000
            } else {
                u32::from(self.sector_count)
            }
        } else {
            let count = self.sector_count & 0xFF;
            if count == 0 {
                0x100
            } else {
                u32::from(count)
            }
        }
    }

    fn ata_read_sectors(&mut self, command: u8) {
        let extended = command == 0x24 || command == 0x29;
        let count = self.command_sector_count(extended);
        let lba = if extended {
            self.lba48()
        } else if self.lba {
            self.lba28()
        } else {
            self.chs_lba()
        };

        // Quirk kept from the original controller: the LBA-mid register
        // is bumped by the sector count before the range check.
        self.cylinder_low = self.cylinder_low.wrapping_add(count as u16);

        let Some((start, byte_count)) = self.transfer_range(lba, count) else {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        };

        self.status = STATUS_BUSY;
        self.report_read_start();
        let id = self.disk.borrow_mut().submit_read(start, byte_count);
        self.pending = Some(PendingTransfer::PioRead { id, byte_count });
    }

    fn ata_write_sectors(&mut self, command: u8) {
        let extended = command == 0x34 || command == 0x39;
        let count = self.command_sector_count(extended);
        let lba = if extended {
            self.lba48()
        } else if self.lba {
            self.lba28()
        } else {
            self.chs_lba()
        };

        self.cylinder_low = self.cylinder_low.wrapping_add(count as u16);

        let Some((start, byte_count)) = self.transfer_range(lba, count) else {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        };

        self.status = STATUS_READY;
        self.next_status = Some(STATUS_DATA);
        self.allocate_staging(byte_count);
        self.write_dest = start;
        self.staged_action = StagedAction::CommitWrite;
        self.push_irq();
    }

    fn ata_read_dma(&mut self) {
        // DMA reads take the short count without the zero-means-256
        // promotion, and always address by LBA28.
        let count = u32::from(self.sector_count & 0xFF);
        let lba = self.lba28();

        self.cylinder_low = self.cylinder_low.wrapping_add(count as u16);

        let Some((start, byte_count)) = self.transfer_range(lba, count) else {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        };

        self.status = STATUS_BUSY;
        self.dma_status |= DMA_STATUS_ACTIVE;
        self.report_read_start();
        let id = self.disk.borrow_mut().submit_read(start, byte_count);
        self.pending = Some(PendingTransfer::DmaRead { id, byte_count });
    }

    fn ata_write_dma(&mut self, mem: &mut dyn MemoryBus) {
        let count = u32::from(self.sector_count & 0xFF);
        let lba = self.lba28();

        self.cylinder_low = self.cylinder_low.wrapping_add(count as u16);

        let Some((start, byte_count)) = self.transfer_range(lba, count) else {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        };

        self.status = STATUS_BUSY;
        self.dma_status |= DMA_STATUS_ACTIVE;

        let entries = match dma::walk_prdt(mem, self.prdt_addr) {
            Ok(entries) => entries,
            Err(_) => {
                self.finish_dma_error();
                return;
            }
        };

        // One storage write per descriptor; the transfer is done when
        // every write has completed.
        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut disk = self.disk.borrow_mut();
            let mut offset = 0u64;
            for entry in &entries {
                let mut chunk = vec![0u8; entry.byte_count as usize];
                mem.read_physical(u64::from(entry.addr), &mut chunk);
                ids.push(disk.submit_write(start + offset, chunk));
                offset += u64::from(entry.byte_count);
            }
        }
        self.pending = Some(PendingTransfer::DmaWrite { ids });
        self.report_write(byte_count);
        // Completions may already be queued; the caller pumps them next.
    }

    /// Drain one byte from the PIO buffer.
    ///
    /// Reads past the end return zero but still advance the cursor. The
    /// cylinder registers count down through the block and reload with
    /// the bytes remaining, clamped to 0xF000 when it does not fit.
    fn read_data(&mut self) -> u8 {
        if self.pio_pos >= self.pio_data.len() {
            self.pio_pos += 1;
            return 0;
        }

        let next = self.pio_pos + 1;
        let drq_block = usize::from(self.sectors_per_drq) * 512;
        if (drq_block != 0 && next % drq_block == 0) || next == self.pio_data.len() {
            self.push_irq();
        }

        if self.cylinder_low != 0 {
            self.cylinder_low -= 1;
        } else if self.cylinder_high != 0 {
            self.cylinder_high -= 1;
            self.cylinder_low = 0xFF;
        }

        if self.cylinder_low == 0 && self.cylinder_high == 0 {
            let remaining = self.pio_data.len() - next;
            if remaining >= 0x10000 {
                self.cylinder_high = 0xF0;
                self.cylinder_low = 0;
            } else {
                self.cylinder_high = (remaining >> 8) as u16;
                self.cylinder_low = (remaining & 0xFF) as u16;
            }
        }

        if next >= self.pio_data.len() {
            self.status = STATUS_READY;
        }

        let byte = self.pio_data[self.pio_pos];
        self.pio_pos = next;
        byte
    }

    /// Accept one byte into the staging buffer; bytes beyond the
    /// expected count are dropped. Filling the buffer fires the staged
    /// action.
    fn write_data(&mut self, value: u8) {
        if self.staging_pos >= self.staging_count {
            return;
        }
        self.staging[self.staging_pos] = value;
        self.staging_pos += 1;

        let drq_block = usize::from(self.sectors_per_drq) * 512;
        if drq_block != 0 && self.staging_pos % drq_block == 0 {
            self.push_irq();
        }

        if self.staging_pos == self.staging_count {
            match self.staged_action {
                StagedAction::None => {}
                StagedAction::CommitWrite => self.commit_staged_write(),
                StagedAction::AtapiPacket => self.exec_atapi_packet(),
            }
        }
    }

    // Grow-only: a smaller request reuses the existing buffer, only the
    // logical count and cursor reset.
    fn allocate_staging(&mut self, size: usize) {
        if size > self.staging.len() {
            self.staging = vec![0u8; size];
        }
        self.staging_count = size;
        self.staging_pos = 0;
    }

    fn commit_staged_write(&mut self) {
        self.status = STATUS_READY;
        let data = self.staging[..self.staging_count].to_vec();
        let byte_count = data.len();
        let id = self.disk.borrow_mut().submit_write(self.write_dest, data);
        self.pending = Some(PendingTransfer::WriteCommit { id });
        // Counters move at submission, not at completion.
        self.report_write(byte_count);
    }

    fn dma_port_read(&mut self, offset: u16, size: u8) -> u32 {
        match (offset, size) {
            (0, 1) => 1,
            (0, 4) => 1 | u32::from(self.dma_status) << 16,
            (2, 1) => u32::from(self.dma_status),
            (4, 4) => self.prdt_addr,
            _ => 0,
        }
    }

    fn dma_port_write(&mut self, offset: u16, size: u8, value: u32) {
        match (offset, size) {
            (0, 1) => {
                if value & 1 != 0 {
                    self.push_irq();
                }
            }
            (0, 4) => {
                if value & 1 != 0 {
                    self.push_irq();
                }
                self.dma_status &= !((value >> 16) as u8);
            }
            (2, 1) => self.dma_status &= !(value as u8),
            (4, 4) => self.prdt_addr = value,
            _ => {}
        }
    }

    fn finish_dma_success(&mut self) {
        self.status = STATUS_READY;
        self.dma_status &= !(DMA_STATUS_ACTIVE | DMA_STATUS_ERROR);
        self.dma_status |= DMA_STATUS_IRQ;
        self.push_irq();
    }

    fn finish_dma_error(&mut self) {
        self.status = STATUS_FAULT;
        self.dma_status &= !DMA_STATUS_ACTIVE;
        self.dma_status |= DMA_STATUS_ERROR | DMA_STATUS_IRQ;
        self.pending = None;
        self.push_irq();
    }

    fn pump(&mut self, mem: &mut dyn MemoryBus) {
        loop {
            let completion = self.disk.borrow_mut().poll_complete();
            let Some(completion) = completion else {
                return;
            };
            self.apply_completion(mem, completion);
        }
    }

    fn apply_completion(&mut self, mem: &mut dyn MemoryBus, completion: Completion) {
        // No outstanding transfer means the completion is stale: a reset
        // or restore happened after submission. Drop it.
        let Some(pending) = self.pending.take() else {
            return;
        };

        match (pending, completion) {
            (PendingTransfer::PioRead { id, byte_count }, Completion::Read { id: done, data })
                if id == done =>
            {
                self.pio_data = data;
                self.status = STATUS_DATA;
                self.pio_pos = 0;
                self.push_irq();
                self.report_read_end(byte_count);
            }
            (PendingTransfer::DmaRead { id, byte_count }, Completion::Read { id: done, data })
                if id == done =>
            {
                match dma::walk_prdt(mem, self.prdt_addr) {
                    Ok(entries) => {
                        dma::scatter(mem, &entries, &data);
                        self.finish_dma_success();
                        self.report_read_end(byte_count);
                    }
                    Err(_) => {
                        self.stats.loading = false;
                        self.finish_dma_error();
                    }
                }
            }
            (PendingTransfer::WriteCommit { id }, Completion::Write { id: done }) if id == done => {
                self.push_irq();
            }
            (PendingTransfer::DmaWrite { mut ids }, Completion::Write { id: done })
                if ids.contains(&done) =>
            {
                ids.retain(|&id| id != done);
                if ids.is_empty() {
                    self.finish_dma_success();
                } else {
                    self.pending = Some(PendingTransfer::DmaWrite { ids });
                }
            }
            (pending, Completion::Failed { id, .. }) if pending_matches(&pending, id) => {
                let was_dma = matches!(
                    pending,
                    PendingTransfer::DmaRead { .. } | PendingTransfer::DmaWrite { .. }
                );
                if was_dma {
                    self.finish_dma_error();
                } else {
                    self.status = STATUS_FAULT;
                    self.push_irq();
                }
                self.stats.loading = false;
            }
            (pending, _) => {
                // Mismatched id: a stale completion raced a newer
                // request. Keep waiting for the real one.
                self.pending = Some(pending);
            }
        }
    }

    fn report_read_start(&mut self) {
        self.stats.loading = true;
        self.events.event(TransferEvent::ReadStart);
    }

    fn report_read_end(&mut self, byte_count: usize) {
        self.stats.loading = false;
        let bytes = byte_count as u64;
        let sectors = bytes / u64::from(self.geometry.sector_size);
        self.stats.sectors_read += sectors;
        self.stats.bytes_read += bytes;
        self.events.event(TransferEvent::ReadEnd { bytes, sectors });
    }

    fn report_write(&mut self, byte_count: usize) {
        let bytes = byte_count as u64;
        let sectors = bytes / u64::from(self.geometry.sector_size);
        self.stats.sectors_written += sectors;
        self.stats.bytes_written += bytes;
        self.events.event(TransferEvent::WriteEnd { bytes, sectors });
    }

    pub fn snapshot_state(&self) -> IdeChannelState {
        IdeChannelState {
            device_control: self.device_control,
            last_drive: self.last_drive,
            pio_pos: self.pio_pos as u32,
            pio_data: self.pio_data.clone(),
            lba: self.lba,
            sector_count: self.sector_count,
            sector_number: self.sector_number,
            feature_error: self.feature_error,
            cylinder_low: self.cylinder_low,
            head: self.head,
            drive_head: self.drive_head,
            status: self.status,
            sectors_per_drq: self.sectors_per_drq,
            write_dest: self.write_dest,
            staging_count: self.staging_count as u32,
            staging_pos: self.staging_pos as u32,
            staging: self.staging.clone(),
            next_status: self.next_status,
            prdt_addr: self.prdt_addr,
            dma_status: self.dma_status,
        }
    }

    /// Adopt serialized register state. `cylinder_high` is not part of
    /// the format and keeps its current value; the staged action and any
    /// in-flight storage request do not survive either, so completions
    /// submitted before the restore are dropped as stale.
    pub fn restore_state(&mut self, state: &IdeChannelState) {
        self.device_control = state.device_control;
        self.last_drive = state.last_drive;
        self.pio_pos = state.pio_pos as usize;
        self.pio_data = state.pio_data.clone();
        self.lba = state.lba;
        self.sector_count = state.sector_count;
        self.sector_number = state.sector_number;
        self.feature_error = state.feature_error;
        self.cylinder_low = state.cylinder_low;
        self.head = state.head;
        self.drive_head = state.drive_head;
        self.status = state.status;
        self.sectors_per_drq = state.sectors_per_drq;
        self.write_dest = state.write_dest;
        self.staging = state.staging.clone();
        self.staging_count = state.staging_count as usize;
        self.staging_pos = state.staging_pos as usize;
        self.next_status = state.next_status;
        self.prdt_addr = state.prdt_addr;
        self.dma_status = state.dma_status;
        self.staged_action = StagedAction::None;
        self.pending = None;
    }
}

fn shift_in(register: u16, value: u32) -> u16 {
    register << 8 | (value & 0xFF) as u16
}

impl IoSnapshot for IdeController {
    const DEVICE_ID: [u8; 4] = IdeChannelState::DEVICE_ID;
    const DEVICE_VERSION: SnapshotVersion = IdeChannelState::DEVICE_VERSION;

    fn save_state(&self) -> Vec<u8> {
        self.snapshot_state().save_state()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let mut state = IdeChannelState::default();
        state.load_state(bytes)?;
        self.restore_state(&state);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
