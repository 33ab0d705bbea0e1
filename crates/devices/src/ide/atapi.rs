//! ATAPI packet command interpretation.
//!
//! Runs when the 12-byte command descriptor block staged by PACKET
//! (0xA0) is complete. Read commands go through the storage backend like
//! their ATA counterparts; everything else is answered from fixed data.

use super::{
    IdeController, PendingTransfer, STATUS_BUSY, STATUS_DATA, STATUS_FAULT, STATUS_READY,
};

// Fixed INQUIRY payload for the emulated drive.
const INQUIRY_DATA: [u8; 36] = [
    0x05, 0x80, 0x01, 0x31, 0x00, 0x00, 0x00, 0x00,
    // Vendor: "SONY    "
    0x53, 0x4F, 0x4E, 0x59, 0x20, 0x20, 0x20, 0x20,
    // Product: "CD-ROM CDU-1000 "
    0x43, 0x44, 0x2D, 0x52, 0x4F, 0x4D, 0x20, 0x43, 0x44, 0x55, 0x2D, 0x31, 0x30, 0x30, 0x30,
    0x20,
    // Revision: "1.1a"
    0x31, 0x2E, 0x31, 0x61,
];

impl IdeController {
    pub(super) fn exec_atapi_packet(&mut self) {
        let mut packet = [0u8; 12];
        packet.copy_from_slice(&self.staging[..12]);

        // Interrupt reason: I/O, command-complete.
        self.sector_count = 2;

        match packet[0] {
            0x00 => {
                // TEST UNIT READY
                self.status = 0x40;
                self.cylinder_low = 8;
                self.cylinder_high = 0;
                self.push_irq();
            }
            0x03 => self.request_sense(&packet),
            0x12 => self.inquiry(&packet),
            0x1E => {
                // PREVENT/ALLOW MEDIUM REMOVAL
                self.pio_data = Vec::new();
                self.status = STATUS_READY;
                self.pio_pos = 0;
                self.push_irq();
            }
            0x25 => self.read_capacity(),
            0x28 => {
                // READ (10); the features bit selects DMA delivery.
                if self.feature_error & 1 != 0 {
                    self.atapi_read_dma(&packet);
                } else {
                    self.atapi_read_pio(&packet);
                }
            }
            0x43 => self.read_toc(),
            0x46 | 0x4A => self.empty_allocated_response(&packet),
            0x51 => {
                // READ DISC INFORMATION
                self.pio_data = Vec::new();
                self.status = STATUS_READY;
                self.pio_pos = 0;
                self.push_irq();
            }
            0x5A => {
                // MODE SENSE (10)
                self.push_irq();
                self.status = STATUS_READY;
            }
            _ => {
                // Unsupported packets complete without data and without
                // an interrupt.
                self.status = STATUS_READY;
            }
        }
    }

    fn request_sense(&mut self, packet: &[u8; 12]) {
        let len = usize::from(packet[4]).min(15);
        let mut data = vec![0u8; len];
        // Current-error response, 8 bytes of additional sense; short
        // allocations simply truncate it.
        if let Some(byte) = data.get_mut(0) {
            *byte = 0xF0;
        }
        if let Some(byte) = data.get_mut(7) {
            *byte = 8;
        }
        self.pio_data = data;
        self.status = STATUS_DATA;
        self.pio_pos = 0;
        self.cylinder_low = 8;
        self.cylinder_high = 0;
        self.push_irq();
    }

    fn inquiry(&mut self, packet: &[u8; 12]) {
        let len = usize::from(packet[4]).min(INQUIRY_DATA.len());
        self.pio_data = INQUIRY_DATA[..len].to_vec();
        self.status = STATUS_DATA;
        self.pio_pos = 0;
        self.push_irq();
    }

    fn read_capacity(&mut self) {
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&(self.geometry.sector_count as u32).to_be_bytes());
        data[6] = (self.geometry.sector_size >> 8) as u8;
        data[7] = self.geometry.sector_size as u8;
        self.pio_data = data;
        self.status = STATUS_DATA;
        self.pio_pos = 0;
        self.cylinder_low = 8;
        self.cylinder_high = 0;
        self.push_irq();
    }

    fn read_toc(&mut self) {
        // Single-session disc: one track, lead-out right after it.
        let mut data = vec![0u8; 2048];
        data[1] = 10;
        data[2] = 1;
        data[3] = 1;
        self.pio_data = data;
        self.status = STATUS_DATA;
        self.pio_pos = 0;
        self.cylinder_high = 8;
        self.cylinder_low = 0;
        self.push_irq();
    }

    /// GET CONFIGURATION / GET EVENT STATUS NOTIFICATION: all-zero
    /// payload sized by the allocation length in the packet.
    fn empty_allocated_response(&mut self, packet: &[u8; 12]) {
        let alloc = usize::from(packet[8]) | usize::from(packet[7]) << 8;
        self.pio_data = vec![0u8; alloc];
        self.status = STATUS_DATA;
        self.pio_pos = 0;
        self.push_irq();
    }

    fn atapi_read_pio(&mut self, packet: &[u8; 12]) {
        let lba = u64::from(u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]));
        let count = u64::from(packet[7]) << 8 | u64::from(packet[8]);
        let sector_size = u64::from(self.geometry.sector_size);
        let byte_count = count * sector_size;
        let start = lba * sector_size;

        // The host announces per-DRQ byte counts through the cylinder
        // registers; zero means the 32 KiB default. The announcement is
        // made even when the command then faults.
        let mut max_drq = (self.cylinder_high & 0xFF) << 8 | self.cylinder_low & 0xFF;
        if max_drq == 0 {
            max_drq = 0x8000;
        }
        let announced = byte_count.min(u64::from(max_drq));
        self.cylinder_low = (announced & 0xFF) as u16;
        self.cylinder_high = (announced >> 8 & 0xFF) as u16;

        let disk_len = self.disk_len();
        if start >= disk_len {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        }
        let byte_count = byte_count.min(disk_len - start) as usize;

        self.status = STATUS_BUSY;
        self.report_read_start();
        let id = self.disk.borrow_mut().submit_read(start, byte_count);
        self.pending = Some(PendingTransfer::PioRead { id, byte_count });
    }

    fn atapi_read_dma(&mut self, packet: &[u8; 12]) {
        let lba = u64::from(u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]));
        let count = u64::from(packet[7]) << 8 | u64::from(packet[8]);
        let sector_size = u64::from(self.geometry.sector_size);
        let byte_count = count * sector_size;
        let start = lba * sector_size;

        let disk_len = self.disk_len();
        if start >= disk_len {
            self.status = STATUS_FAULT;
            self.push_irq();
            return;
        }
        let byte_count = byte_count.min(disk_len - start) as usize;

        self.status = STATUS_BUSY;
        self.report_read_start();
        let id = self.disk.borrow_mut().submit_read(start, byte_count);
        self.pending = Some(PendingTransfer::DmaRead { id, byte_count });
    }
}
