/// Guest physical memory as seen by device DMA engines.
///
/// Accesses take `&mut self` so implementations backed by MMIO windows or
/// dirty tracking can have side effects. Out-of-range accesses are the
/// implementation's business; device models never assume they trap.
pub trait MemoryBus {
    fn read_physical(&mut self, paddr: u64, buf: &mut [u8]);

    fn write_physical(&mut self, paddr: u64, buf: &[u8]);

    fn read_u8(&mut self, paddr: u64) -> u8 {
        let mut buf = [0u8; 1];
        self.read_physical(paddr, &mut buf);
        buf[0]
    }

    fn read_u16(&mut self, paddr: u64) -> u16 {
        let mut buf = [0u8; 2];
        self.read_physical(paddr, &mut buf);
        u16::from_le_bytes(buf)
    }

    fn read_u32(&mut self, paddr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf);
        u32::from_le_bytes(buf)
    }

    fn write_u32(&mut self, paddr: u64, value: u32) {
        self.write_physical(paddr, &value.to_le_bytes());
    }
}
