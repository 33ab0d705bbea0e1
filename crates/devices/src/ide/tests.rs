use std::cell::RefCell;
use std::rc::Rc;

use vireo_platform::interrupts::LatchIrq;
use vireo_platform::memory::MemoryBus;
use vireo_storage::backend::MemDisk;
use vireo_storage::StorageBackend;

use super::*;

struct VecMemory(Vec<u8>);

impl MemoryBus for VecMemory {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]) {
        buf.fill(0);
        let start = paddr as usize;
        if start < self.0.len() {
            let len = buf.len().min(self.0.len() - start);
            buf[..len].copy_from_slice(&self.0[start..start + len]);
        }
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) {
        let start = paddr as usize;
        self.0[start..start + buf.len()].copy_from_slice(buf);
    }
}

fn controller(kind: DriveKind, len: usize) -> (IdeController, LatchIrq, VecMemory) {
    let disk: Rc<RefCell<dyn StorageBackend>> = Rc::new(RefCell::new(MemDisk::zeroed(len)));
    let mut ide = IdeController::new(IdeChannel::Primary, kind, disk);
    let irq = LatchIrq::new();
    ide.set_irq_line(Box::new(irq.clone()));
    let mut mem = VecMemory(vec![0u8; 0x1000]);
    // Unmask interrupts; nIEN is set at power-on.
    ide.io_write(&mut mem, 0x3F6, 1, 0);
    (ide, irq, mem)
}

#[test]
fn parameter_registers_shift_bytes_in() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F2, 1, 0x12);
    ide.io_write(&mut mem, 0x1F2, 1, 0x34);
    assert_eq!(ide.sector_count, 0x1234);
    // Reads expose only the low byte.
    assert_eq!(ide.io_read(0x1F2, 1), 0x34);

    ide.io_write(&mut mem, 0x1F3, 1, 0xAB);
    ide.io_write(&mut mem, 0x1F4, 1, 0xCD);
    ide.io_write(&mut mem, 0x1F5, 1, 0xEF);
    assert_eq!(ide.sector_number, 0xAB);
    assert_eq!(ide.cylinder_low, 0xCD);
    assert_eq!(ide.cylinder_high, 0xEF);
}

#[test]
fn slave_select_is_ignored_entirely() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F6, 1, 0xE5);
    assert_eq!(ide.drive_head, 0xE5);
    assert!(ide.lba);
    assert_eq!(ide.head, 5);

    ide.io_write(&mut mem, 0x1F6, 1, 0xB3);
    // Bit 4 selects the absent slave; nothing changes.
    assert_eq!(ide.drive_head, 0xE5);
    assert_eq!(ide.head, 5);
    assert_eq!(ide.last_drive, 0xE5);
}

#[test]
fn status_read_promotes_deferred_value() {
    let (mut ide, _irq, _mem) = controller(DriveKind::Ata, 1 << 20);
    ide.status = STATUS_READY;
    ide.next_status = Some(STATUS_DATA);
    assert_eq!(ide.io_read(0x1F7, 1), u32::from(STATUS_READY));
    assert_eq!(ide.io_read(0x1F7, 1), u32::from(STATUS_DATA));
    assert_eq!(ide.io_read(0x1F7, 1), u32::from(STATUS_DATA));
}

#[test]
fn alternate_status_mirrors_command_status() {
    let (mut ide, _irq, _mem) = controller(DriveKind::Ata, 1 << 20);
    ide.status = STATUS_DATA;
    assert_eq!(ide.io_read(0x3F6, 1), u32::from(STATUS_DATA));
}

#[test]
fn soft_reset_posts_ata_signature() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x3F6, 1, 4);
    assert_eq!(ide.status, STATUS_RESET);
    assert_eq!(ide.sector_count, 1);
    assert_eq!(ide.sector_number, 1);
    assert_eq!(ide.cylinder_low, 0x3C);
    assert_eq!(ide.cylinder_high, 0xC3);
    // Soft reset itself raises no interrupt.
    assert_eq!(irq.raised(), 0);
}

#[test]
fn soft_reset_posts_atapi_signature() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Atapi, 2048 * 16);
    ide.io_write(&mut mem, 0x3F6, 1, 4);
    assert_eq!(ide.cylinder_low, 0x14);
    assert_eq!(ide.cylinder_high, 0xEB);
}

#[test]
fn device_reset_command_clears_pio_and_interrupts() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.pio_data = vec![1, 2, 3];
    ide.pio_pos = 1;
    ide.io_write(&mut mem, 0x1F7, 1, 0x08);
    assert!(ide.pio_data.is_empty());
    assert_eq!(ide.pio_pos, 0);
    assert_eq!(ide.cylinder_low, 0x3C);
    assert_eq!(irq.raised(), 1);
}

#[test]
fn diagnostic_posts_error_register_signature() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F7, 1, 0x90);
    assert_eq!(ide.feature_error, 0x101);
    assert_eq!(ide.status, STATUS_READY);
    assert_eq!(irq.raised(), 1);
}

#[test]
fn unknown_command_aborts_silently() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F7, 1, 0xF7);
    assert_eq!(ide.feature_error, 4);
    assert_eq!(irq.raised(), 0);
}

#[test]
fn nien_masks_command_interrupts() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x3F6, 1, CTRL_NIEN.into());
    ide.io_write(&mut mem, 0x1F7, 1, 0x00); // NOP
    assert_eq!(irq.raised(), 0);
    ide.io_write(&mut mem, 0x3F6, 1, 0);
    ide.io_write(&mut mem, 0x1F7, 1, 0x00);
    assert_eq!(irq.raised(), 1);
}

#[test]
fn set_multiple_updates_drq_block() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F2, 1, 16);
    ide.io_write(&mut mem, 0x1F7, 1, 0xC6);
    assert_eq!(ide.sectors_per_drq, 16);
}

#[test]
fn read_native_max_reports_image_size() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Ata, 0x12340 * 512);
    ide.io_write(&mut mem, 0x1F7, 1, 0x27);
    assert_eq!(ide.status, STATUS_DATA);
    assert_eq!(ide.pio_data.len(), 12);
    assert_eq!(
        u32::from_le_bytes(ide.pio_data[4..8].try_into().unwrap()),
        0x12340 * 512
    );
}

#[test]
fn staging_allocation_only_grows() {
    let (mut ide, _irq, _mem) = controller(DriveKind::Ata, 1 << 20);
    ide.allocate_staging(1024);
    assert_eq!(ide.staging.len(), 1024);
    ide.staging_pos = 7;

    ide.allocate_staging(12);
    // Smaller request: buffer kept, logical extent reset.
    assert_eq!(ide.staging.len(), 1024);
    assert_eq!(ide.staging_count, 12);
    assert_eq!(ide.staging_pos, 0);
}

#[test]
fn identify_for_selected_slave_is_empty() {
    let (mut ide, _irq, _mem) = controller(DriveKind::Ata, 1 << 20);
    ide.drive_head = 0x10;
    ide.create_identify_block();
    assert!(ide.pio_data.is_empty());
    // Draining it behaves like any past-the-end read.
    assert_eq!(ide.read_data(), 0);
}

#[test]
fn chs_sector_zero_is_out_of_range() {
    let (mut ide, irq, mut mem) = controller(DriveKind::Ata, 1 << 20);
    ide.io_write(&mut mem, 0x1F6, 1, 0xA0); // CHS mode
    ide.io_write(&mut mem, 0x1F2, 1, 1);
    ide.io_write(&mut mem, 0x1F3, 1, 0); // illegal sector number
    ide.io_write(&mut mem, 0x1F7, 1, 0x20);
    assert_eq!(ide.status, STATUS_FAULT);
    assert_eq!(irq.raised(), 1);
}

#[test]
fn lba48_uses_full_sector_count() {
    let (mut ide, _irq, mut mem) = controller(DriveKind::Ata, 2 << 20);
    ide.io_write(&mut mem, 0x1F6, 1, 0x40);
    // Two-byte sector count: 0x0102 sectors.
    ide.io_write(&mut mem, 0x1F2, 1, 1);
    ide.io_write(&mut mem, 0x1F2, 1, 2);
    ide.io_write(&mut mem, 0x1F3, 1, 0);
    ide.io_write(&mut mem, 0x1F3, 1, 0);
    ide.io_write(&mut mem, 0x1F4, 1, 0);
    ide.io_write(&mut mem, 0x1F4, 1, 0);
    ide.io_write(&mut mem, 0x1F5, 1, 0);
    ide.io_write(&mut mem, 0x1F5, 1, 0);
    ide.io_write(&mut mem, 0x1F7, 1, 0x24);
    assert_eq!(ide.status, STATUS_DATA);
    assert_eq!(ide.pio_data.len(), 0x102 * 512);
}

#[test]
fn pci_profile_mirrors_port_assignment() {
    let (ide, _irq, _mem) = controller(DriveKind::Ata, 1 << 20);
    let profile = ide.pci_profile();
    assert_eq!(profile.bdf, 0x1E << 3);
    assert_eq!(profile.config_space.len(), 0xA0);
    assert_eq!(&profile.config_space[0x10..0x12], &(0x1F1u16).to_le_bytes());
    assert_eq!(&profile.config_space[0x14..0x16], &(0x3F5u16).to_le_bytes());
    assert_eq!(&profile.config_space[0x20..0x22], &(0xC001u16).to_le_bytes());
    assert_eq!(profile.config_space[0x3C], 14);
    assert_eq!(profile.bars.len(), 5);
    assert_eq!(profile.bars[4], Some(PciBar { size: 0x10 }));
}

#[test]
fn secondary_channel_port_map() {
    let ports = IdeChannel::Secondary.ports();
    assert_eq!(ports.cmd_base, 0x170);
    assert_eq!(ports.ctrl_base, 0x374);
    assert_eq!(ports.irq, 15);
    assert_eq!(ports.pci_bdf, 0x1F << 3);
}
