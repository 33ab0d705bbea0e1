//! IDENTIFY DEVICE / IDENTIFY PACKET DEVICE response blocks.

use vireo_storage::geometry::DriveGeometry;

use super::{DriveKind, IdeController, DRIVE_HEAD_SLAVE};

const IDENTIFY_BLOCK_BYTES: usize = 512;

impl IdeController {
    /// Build the 256-word identify block and park it in the PIO buffer.
    pub(super) fn create_identify_block(&mut self) {
        self.pio_pos = 0;

        if self.drive_head & DRIVE_HEAD_SLAVE != 0 {
            // No slave drive is modeled; its identify drains as zeros.
            self.pio_data = Vec::new();
            return;
        }

        self.pio_data = build_identify(self.kind, &self.geometry);
    }
}

fn put_word(block: &mut [u8], word: usize, value: u16) {
    block[word * 2..word * 2 + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_dword(block: &mut [u8], word: usize, value: u32) {
    block[word * 2..word * 2 + 4].copy_from_slice(&value.to_le_bytes());
}

fn build_identify(kind: DriveKind, geometry: &DriveGeometry) -> Vec<u8> {
    let mut block = vec![0u8; IDENTIFY_BLOCK_BYTES];
    let cylinders = geometry.cylinder_count;
    let heads = geometry.head_count;
    let spt = geometry.sectors_per_track;
    let sectors = geometry.sector_count as u32;

    // Word 0: general configuration; bit 15+removable for packet devices.
    put_word(&mut block, 0, if kind == DriveKind::Atapi { 0x8540 } else { 0x0040 });
    put_word(&mut block, 1, cylinders);
    put_word(&mut block, 3, heads);
    put_word(&mut block, 6, spt);
    // Words 20..22: buffer type/size, ECC byte count.
    put_word(&mut block, 20, 3);
    put_word(&mut block, 21, 0x0200);
    put_word(&mut block, 22, 4);
    // Words 27..46: model name, all blanks.
    for word in 27..47 {
        put_word(&mut block, word, 0x2020);
    }
    put_word(&mut block, 47, 0x00FF); // max sectors per DRQ block
    put_word(&mut block, 48, 1);
    put_word(&mut block, 49, 0x0300); // capabilities: LBA, DMA
    put_word(&mut block, 51, 0x0200);
    put_word(&mut block, 52, 0x0200);
    put_word(&mut block, 53, 7); // words 54-58, 64-70 and 88 are valid
    // Current translation mirrors the default one.
    put_word(&mut block, 54, cylinders);
    put_word(&mut block, 55, heads);
    put_word(&mut block, 56, spt & 0xFF);
    put_dword(&mut block, 57, sectors);
    put_dword(&mut block, 60, sectors); // LBA28 addressable sectors
    put_word(&mut block, 63, 0x0400); // multiword DMA mode 2 selected
    for word in 65..69 {
        put_word(&mut block, word, 30); // cycle times
    }
    put_word(&mut block, 80, 0x007E); // ATA-1 through ATA-6
    put_word(&mut block, 83, 0x7400);
    put_word(&mut block, 84, 0x4000);
    put_word(&mut block, 85, 0x4000);
    put_word(&mut block, 86, 0x7400);
    put_word(&mut block, 87, 0x4000);
    put_word(&mut block, 93, 0x6001); // hardware reset result
    put_dword(&mut block, 100, sectors); // LBA48 addressable sectors

    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(block: &[u8], index: usize) -> u16 {
        u16::from_le_bytes([block[index * 2], block[index * 2 + 1]])
    }

    #[test]
    fn hard_disk_block() {
        let geometry = DriveGeometry::hard_disk(64 * 1024 * 1024);
        let block = build_identify(DriveKind::Ata, &geometry);

        assert_eq!(block.len(), IDENTIFY_BLOCK_BYTES);
        assert_eq!(word(&block, 0), 0x0040);
        assert_eq!(word(&block, 1), geometry.cylinder_count);
        assert_eq!(word(&block, 3), 16);
        assert_eq!(word(&block, 6), 63);
        assert_eq!(word(&block, 54), geometry.cylinder_count);
        // Model name drains as blanks.
        assert!(block[54..94].iter().all(|&b| b == 0x20));
        // LBA28 and LBA48 sector counts.
        let sectors = geometry.sector_count as u32;
        assert_eq!(word(&block, 60), (sectors & 0xFFFF) as u16);
        assert_eq!(word(&block, 61), (sectors >> 16) as u16);
        assert_eq!(word(&block, 100), (sectors & 0xFFFF) as u16);
        assert_eq!(word(&block, 101), (sectors >> 16) as u16);
        // Everything past word 102 stays zero.
        assert!(block[204..].iter().all(|&b| b == 0));
    }

    #[test]
    fn packet_device_block() {
        let geometry = DriveGeometry::cdrom(2048 * 1000);
        let block = build_identify(DriveKind::Atapi, &geometry);
        assert_eq!(word(&block, 0), 0x8540);
        assert_eq!(word(&block, 1), 16383);
        assert_eq!(word(&block, 3), 1);
        assert_eq!(word(&block, 6), 0);
    }
}
