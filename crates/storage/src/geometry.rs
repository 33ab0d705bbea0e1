//! CHS geometry derivation for IDE-attached images.

pub const HD_SECTOR_SIZE: u32 = 512;
pub const CD_SECTOR_SIZE: u32 = 2048;

/// Translation geometry reported to the guest for one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveGeometry {
    pub sector_size: u32,
    /// Total addressable sectors; partial trailing sectors round up.
    pub sector_count: u64,
    pub head_count: u16,
    pub sectors_per_track: u16,
    /// Clamped to 16383, the largest cylinder count legacy software
    /// tolerates.
    pub cylinder_count: u16,
}

const MAX_CYLINDERS: u64 = 16383;

impl DriveGeometry {
    /// Hard disk translation: 16 heads, 63 sectors per track.
    pub fn hard_disk(byte_len: u64) -> Self {
        Self::derive(byte_len, HD_SECTOR_SIZE, 16, 63)
    }

    /// CD-ROM: 2048-byte sectors and no meaningful track layout. The
    /// cylinder figure pegs at the clamp value, which guests ignore for
    /// packet devices.
    pub fn cdrom(byte_len: u64) -> Self {
        Self::derive(byte_len, CD_SECTOR_SIZE, 1, 0)
    }

    fn derive(byte_len: u64, sector_size: u32, head_count: u16, sectors_per_track: u16) -> Self {
        let sector_count = byte_len.div_ceil(u64::from(sector_size));
        let chs_divisor = u64::from(head_count) * u64::from(sectors_per_track);
        let cylinder_count = if chs_divisor == 0 {
            MAX_CYLINDERS
        } else {
            (sector_count / chs_divisor).min(MAX_CYLINDERS)
        };
        Self {
            sector_size,
            sector_count,
            head_count,
            sectors_per_track,
            cylinder_count: cylinder_count as u16,
        }
    }
}
