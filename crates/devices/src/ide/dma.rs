//! Bus Master IDE descriptor table handling.

use vireo_platform::memory::MemoryBus;

/// Upper bound on physical region descriptors walked for one transfer.
/// A table that never sets its end-of-table flag becomes a DMA error
/// instead of an unbounded walk through guest memory.
pub const MAX_PRD_ENTRIES_PER_DMA: usize = 65_536;

/// One physical region descriptor: 8 bytes in guest memory holding a
/// physical address, a 16-bit byte count (0 encodes 0x10000) and an
/// end-of-table flag in bit 7 of the last byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PrdEntry {
    pub addr: u32,
    pub byte_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DmaError {
    PrdTableUnterminated,
}

pub(super) fn walk_prdt(
    mem: &mut dyn MemoryBus,
    prdt_addr: u32,
) -> Result<Vec<PrdEntry>, DmaError> {
    let mut entries = Vec::new();
    let mut entry_addr = u64::from(prdt_addr);
    loop {
        if entries.len() >= MAX_PRD_ENTRIES_PER_DMA {
            return Err(DmaError::PrdTableUnterminated);
        }
        let addr = mem.read_u32(entry_addr);
        let mut byte_count = u32::from(mem.read_u16(entry_addr + 4));
        let end_of_table = mem.read_u8(entry_addr + 7) & 0x80 != 0;
        if byte_count == 0 {
            byte_count = 0x10000;
        }
        entries.push(PrdEntry { addr, byte_count });
        if end_of_table {
            return Ok(entries);
        }
        entry_addr += 8;
    }
}

/// Scatter `data` into guest memory along the descriptor chain. Regions
/// past the end of the payload are left untouched; short final regions
/// receive a partial copy.
pub(super) fn scatter(mem: &mut dyn MemoryBus, entries: &[PrdEntry], data: &[u8]) {
    let mut offset = 0usize;
    for entry in entries {
        let start = offset.min(data.len());
        let end = (offset + entry.byte_count as usize).min(data.len());
        if start < end {
            mem.write_physical(u64::from(entry.addr), &data[start..end]);
        }
        offset += entry.byte_count as usize;
    }
}
