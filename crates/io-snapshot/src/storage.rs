//! Serialized state for the storage controller and the PCI config bridge.
//!
//! The IDE channel packs its registers into a single field whose byte
//! order is the format contract; reordering or widening an entry is a
//! major-version break.

use crate::state::codec::{Decoder, Encoder};
use crate::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};

/// Decode cap for the inlined PIO and staging buffers. Snapshots may come
/// from untrusted files, so allocations stay bounded.
pub const MAX_IDE_DATA_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Register and buffer state of one IDE channel.
///
/// `cylinder_high` is deliberately absent: the original serialization
/// never carried it, and that omission is part of the format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdeChannelState {
    pub device_control: u8,
    pub last_drive: u8,
    pub pio_pos: u32,
    pub pio_data: Vec<u8>,
    pub lba: bool,
    pub sector_count: u16,
    pub sector_number: u16,
    pub feature_error: u16,
    pub cylinder_low: u16,
    pub head: u8,
    pub drive_head: u8,
    pub status: u8,
    pub sectors_per_drq: u16,
    pub write_dest: u64,
    pub staging_count: u32,
    pub staging_pos: u32,
    pub staging: Vec<u8>,
    pub next_status: Option<u8>,
    pub prdt_addr: u32,
    pub dma_status: u8,
}

const IDE_TAG_CHANNEL: u16 = 1;

impl IdeChannelState {
    fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new()
            .u8(self.device_control)
            .u8(self.last_drive)
            .u32(self.pio_pos)
            .u32(self.pio_data.len() as u32)
            .bytes(&self.pio_data)
            .bool(self.lba)
            .u16(self.sector_count)
            .u16(self.sector_number)
            .u16(self.feature_error)
            .u16(self.cylinder_low)
            .u8(self.head)
            .u8(self.drive_head)
            .u8(self.status)
            .u16(self.sectors_per_drq)
            .u64(self.write_dest)
            .u32(self.staging_count)
            .u32(self.staging_pos)
            .u32(self.staging.len() as u32)
            .bytes(&self.staging);
        e = match self.next_status {
            None => e.u8(0),
            Some(status) => e.u8(1).u8(status),
        };
        e.u32(self.prdt_addr).u8(self.dma_status).finish()
    }

    fn decode(bytes: &[u8]) -> SnapshotResult<Self> {
        let mut d = Decoder::new(bytes);

        let device_control = d.u8()?;
        let last_drive = d.u8()?;
        // The PIO cursor may legitimately point past the buffer; drains
        // past the end keep advancing it. No cursor/len check here.
        let pio_pos = d.u32()?;
        let pio_len = d.u32()? as usize;
        if pio_len > MAX_IDE_DATA_BUFFER_BYTES {
            return Err(SnapshotError::InvalidFieldEncoding("pio buffer too large"));
        }
        let pio_data = d.bytes_vec(pio_len)?;
        let lba = d.bool()?;
        let sector_count = d.u16()?;
        let sector_number = d.u16()?;
        let feature_error = d.u16()?;
        let cylinder_low = d.u16()?;
        let head = d.u8()?;
        let drive_head = d.u8()?;
        let status = d.u8()?;
        let sectors_per_drq = d.u16()?;
        let write_dest = d.u64()?;
        let staging_count = d.u32()?;
        let staging_pos = d.u32()?;
        let staging_len = d.u32()? as usize;
        if staging_len > MAX_IDE_DATA_BUFFER_BYTES {
            return Err(SnapshotError::InvalidFieldEncoding("staging buffer too large"));
        }
        let staging = d.bytes_vec(staging_len)?;
        if staging_count as usize > staging.len() {
            return Err(SnapshotError::InvalidFieldEncoding("staging count beyond buffer"));
        }
        if staging_pos > staging_count {
            return Err(SnapshotError::InvalidFieldEncoding("staging cursor beyond count"));
        }
        let next_status = match d.u8()? {
            0 => None,
            1 => Some(d.u8()?),
            _ => return Err(SnapshotError::InvalidFieldEncoding("next status flag")),
        };
        let prdt_addr = d.u32()?;
        let dma_status = d.u8()?;
        d.finish()?;

        Ok(Self {
            device_control,
            last_drive,
            pio_pos,
            pio_data,
            lba,
            sector_count,
            sector_number,
            feature_error,
            cylinder_low,
            head,
            drive_head,
            status,
            sectors_per_drq,
            write_dest,
            staging_count,
            staging_pos,
            staging,
            next_status,
            prdt_addr,
            dma_status,
        })
    }
}

impl IoSnapshot for IdeChannelState {
    const DEVICE_ID: [u8; 4] = *b"IDE0";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_bytes(IDE_TAG_CHANNEL, &self.encode());
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;
        let payload = r
            .bytes(IDE_TAG_CHANNEL)
            .ok_or(SnapshotError::InvalidFieldEncoding("missing channel field"))?;
        *self = Self::decode(payload)?;
        Ok(())
    }
}

/// The four byte-wise latches of the config space bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PciBusState {
    pub addr: [u8; 4],
    pub value: [u8; 4],
    pub response: [u8; 4],
    pub status: [u8; 4],
}

const PCI_TAG_LATCHES: u16 = 1;

impl PciBusState {
    fn encode(&self) -> Vec<u8> {
        Encoder::new()
            .bytes(&self.addr)
            .bytes(&self.value)
            .bytes(&self.response)
            .bytes(&self.status)
            .finish()
    }

    fn decode(bytes: &[u8]) -> SnapshotResult<Self> {
        let mut d = Decoder::new(bytes);
        let mut latch = || -> SnapshotResult<[u8; 4]> {
            let b = d.bytes(4)?;
            Ok([b[0], b[1], b[2], b[3]])
        };
        let addr = latch()?;
        let value = latch()?;
        let response = latch()?;
        let status = latch()?;
        d.finish()?;
        Ok(Self { addr, value, response, status })
    }
}

impl IoSnapshot for PciBusState {
    const DEVICE_ID: [u8; 4] = *b"PCI0";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_bytes(PCI_TAG_LATCHES, &self.encode());
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;
        let payload = r
            .bytes(PCI_TAG_LATCHES)
            .ok_or(SnapshotError::InvalidFieldEncoding("missing latch field"))?;
        *self = Self::decode(payload)?;
        Ok(())
    }
}
