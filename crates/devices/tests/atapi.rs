//! ATAPI packet command tests driven through the ports.

use std::cell::RefCell;
use std::rc::Rc;

use vireo_devices::ide::{DriveKind, IdeChannel, IdeController};
use vireo_platform::interrupts::LatchIrq;
use vireo_platform::memory::MemoryBus;
use vireo_storage::backend::{MemDisk, StorageBackend};

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

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 3) as u8).collect()
}

struct Rig {
    ide: IdeController,
    mem: VecMemory,
    irq: LatchIrq,
}

fn cd_rig(image: Vec<u8>) -> Rig {
    let disk: Rc<RefCell<dyn StorageBackend>> = Rc::new(RefCell::new(MemDisk::new(image)));
    let mut ide = IdeController::new(IdeChannel::Secondary, DriveKind::Atapi, disk);
    let irq = LatchIrq::new();
    ide.set_irq_line(Box::new(irq.clone()));
    let mut mem = VecMemory(vec![0u8; 0x20000]);
    ide.io_write(&mut mem, 0x376, 1, 0);
    Rig { ide, mem, irq }
}

fn outb(rig: &mut Rig, port: u16, value: u8) {
    rig.ide.io_write(&mut rig.mem, port, 1, value.into());
}

fn send_packet(rig: &mut Rig, packet: [u8; 12]) {
    outb(rig, 0x177, 0xA0);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x58);
    for pair in packet.chunks(2) {
        let word = u16::from_le_bytes([pair[0], pair[1]]);
        rig.ide.io_write(&mut rig.mem, 0x170, 2, word.into());
    }
}

fn drain(rig: &mut Rig, bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes);
    for _ in 0..bytes {
        out.push(rig.ide.io_read(0x170, 1) as u8);
    }
    out
}

#[test]
fn packet_command_requires_packet_device() {
    let disk: Rc<RefCell<dyn StorageBackend>> = Rc::new(RefCell::new(MemDisk::zeroed(1 << 20)));
    let mut ide = IdeController::new(IdeChannel::Primary, DriveKind::Ata, disk);
    let mut mem = VecMemory(vec![0u8; 0x100]);
    ide.io_write(&mut mem, 0x3F6, 1, 0);
    ide.io_write(&mut mem, 0x1F7, 1, 0xA0);
    // Hard disks ignore PACKET outright.
    assert_eq!(ide.io_read(0x1F7, 1), 0x50);
}

#[test]
fn test_unit_ready() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    send_packet(&mut rig, [0; 12]);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x40);
    assert_eq!(rig.ide.io_read(0x174, 1), 8);
    assert_eq!(rig.ide.io_read(0x175, 1), 0);
    // PACKET itself plus the response.
    assert_eq!(rig.irq.raised(), 2);
}

#[test]
fn inquiry_reports_drive_identity() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x12;
    packet[4] = 36;
    send_packet(&mut rig, packet);

    assert_eq!(rig.ide.io_read(0x177, 1), 0x58);
    let data = drain(&mut rig, 36);
    assert_eq!(&data[0..4], &[0x05, 0x80, 0x01, 0x31]);
    assert_eq!(&data[8..16], b"SONY    ");
    assert_eq!(&data[16..32], b"CD-ROM CDU-1000 ");
    assert_eq!(&data[32..36], b"1.1a");
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
}

#[test]
fn inquiry_truncates_to_allocation_length() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x12;
    packet[4] = 4;
    send_packet(&mut rig, packet);
    let data = drain(&mut rig, 4);
    assert_eq!(&data[..], &[0x05, 0x80, 0x01, 0x31]);
    // Fifth byte is already past the payload.
    assert_eq!(rig.ide.io_read(0x170, 1), 0);
}

#[test]
fn request_sense_caps_at_fifteen_bytes() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x03;
    packet[4] = 18;
    send_packet(&mut rig, packet);
    let data = drain(&mut rig, 15);
    assert_eq!(data[0], 0xF0);
    assert_eq!(data[7], 8);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
}

#[test]
fn request_sense_short_allocation() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x03;
    packet[4] = 4;
    send_packet(&mut rig, packet);
    let data = drain(&mut rig, 4);
    // Truncation drops the additional-sense length byte entirely.
    assert_eq!(&data[..], &[0xF0, 0, 0, 0]);
}

#[test]
fn read_capacity_is_big_endian() {
    let mut rig = cd_rig(vec![0u8; 2048 * 100]);
    let mut packet = [0u8; 12];
    packet[0] = 0x25;
    send_packet(&mut rig, packet);
    let data = drain(&mut rig, 8);
    assert_eq!(&data[0..4], &100u32.to_be_bytes());
    assert_eq!(&data[4..8], &[0, 0, 0x08, 0x00]);
}

#[test]
fn read_toc_swaps_byte_count_registers() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x43;
    send_packet(&mut rig, packet);
    // Unlike the other responses these land high/low swapped.
    assert_eq!(rig.ide.io_read(0x174, 1), 0);
    assert_eq!(rig.ide.io_read(0x175, 1), 8);
    let data = drain(&mut rig, 4);
    assert_eq!(&data[..], &[0, 10, 1, 1]);
}

#[test]
fn event_status_sizes_by_allocation() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x4A;
    packet[7] = 0x01;
    packet[8] = 0x10;
    send_packet(&mut rig, packet);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x58);
    let data = drain(&mut rig, 0x110);
    assert!(data.iter().all(|&b| b == 0));
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
}

#[test]
fn read10_pio_delivers_sectors() {
    let image = patterned(2048 * 64);
    let mut rig = cd_rig(image.clone());
    let mut packet = [0u8; 12];
    packet[0] = 0x28;
    packet[5] = 1; // LBA 1
    packet[8] = 2; // 2 sectors
    send_packet(&mut rig, packet);

    assert_eq!(rig.ide.io_read(0x177, 1), 0x58);
    // Announced DRQ byte count: 4096 clamps to nothing, low/high split.
    assert_eq!(rig.ide.io_read(0x174, 1), 0x00);
    assert_eq!(rig.ide.io_read(0x175, 1), 0x10);

    let data = drain(&mut rig, 4096);
    assert_eq!(&data[..], &image[2048..2048 * 3]);
    assert_eq!(rig.ide.stats().sectors_read, 2);
}

#[test]
fn read10_beyond_media_faults() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x28;
    packet[5] = 16; // first LBA past the media
    packet[8] = 1;
    send_packet(&mut rig, packet);
    assert_eq!(rig.ide.io_read(0x177, 1), 0xFF);
}

#[test]
fn read10_clamps_to_media_end() {
    let image = patterned(2048 * 16);
    let mut rig = cd_rig(image.clone());
    let mut packet = [0u8; 12];
    packet[0] = 0x28;
    packet[5] = 15;
    packet[8] = 4; // only one sector remains
    send_packet(&mut rig, packet);
    let data = drain(&mut rig, 2048);
    assert_eq!(&data[..], &image[2048 * 15..]);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
}

#[test]
fn read10_dma_scatters_to_memory() {
    let image = patterned(2048 * 64);
    let mut rig = cd_rig(image.clone());

    // PRDT: one 2048-byte region.
    rig.mem.write_physical(0x800, &0x4000u32.to_le_bytes());
    rig.mem.write_physical(0x804, &2048u16.to_le_bytes());
    rig.mem.write_physical(0x806, &[0, 0x80]);
    rig.ide.io_write(&mut rig.mem, 0xC004, 4, 0x800);

    // DMA delivery is requested through the features register before
    // PACKET.
    outb(&mut rig, 0x171, 1);
    let mut packet = [0u8; 12];
    packet[0] = 0x28;
    packet[5] = 3;
    packet[8] = 1;
    send_packet(&mut rig, packet);

    assert_eq!(&rig.mem.0[0x4000..0x4000 + 2048], &image[2048 * 3..2048 * 4]);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
    assert_eq!(rig.ide.io_read(0xC002, 1), 0x04);
}

#[test]
fn unknown_packet_completes_without_interrupt() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    let mut packet = [0u8; 12];
    packet[0] = 0x7F;
    send_packet(&mut rig, packet);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
    // Only the PACKET command interrupt fired.
    assert_eq!(rig.irq.raised(), 1);
}

#[test]
fn identify_packet_device_word_zero() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    outb(&mut rig, 0x177, 0xA1);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x58);
    let lo = rig.ide.io_read(0x170, 1) as u8;
    let hi = rig.ide.io_read(0x170, 1) as u8;
    assert_eq!(u16::from_le_bytes([lo, hi]), 0x8540);
}

#[test]
fn identify_device_is_silent_on_packet_drives() {
    let mut rig = cd_rig(vec![0u8; 2048 * 16]);
    outb(&mut rig, 0x177, 0xEC);
    assert_eq!(rig.ide.io_read(0x177, 1), 0x50);
    assert_eq!(rig.irq.raised(), 0);
}
