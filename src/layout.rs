//! C7: the fixed superblock and the geometry computed from it at create
//! time. Region order and field order follow §4.7/§6 exactly: the header is
//! sector 0, regions are strictly consecutive, and every offset/length is
//! in 4 KiB sectors.
//!
//! The FKT's bottom level is sized against the PPRF arena region, not the
//! key table: a key-table sector's wrapping key is `PPRF.evaluate(tag)`
//! directly (§4.2), so what the FKT's top-level reseed transitively rewraps
//! on a rotation is the arena's own on-disk sectors, not the key table's.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::io::SECTOR_SIZE;
use crate::key::Key;

/// Blocks reserved for the journal region (§4.4: "fixed ≤ 64 blocks").
pub const JOURNAL_SECTORS: u64 = 64;

/// Default heuristic for ext4-like volumes (`ERASER_BYTES_PER_INODE_RATIO`).
pub const DEFAULT_BYTES_PER_INODE: u64 = 16384;

/// A file-key sector's fixed header occupies 32 bytes: `tag, magic1,
/// magic2, padding`, each a `u64`.
pub const FILE_KEY_SECTOR_HEADER_LEN: usize = 32;
pub const FILE_KEY_LEN: usize = 16;
pub const FILE_KEYS_PER_SECTOR: usize = (SECTOR_SIZE - FILE_KEY_SECTOR_HEADER_LEN) / FILE_KEY_LEN;

/// Top-level FKT sector header: `pprf_size: u32, tag_counter: u64, padding:
/// u32` (16 bytes), matching the kernel module's mutable top-FKT fields.
pub const FKT_TOP_HEADER_LEN: usize = 16;
pub const FKT_TOP_KEYS_PER_SECTOR: usize = (SECTOR_SIZE - FKT_TOP_HEADER_LEN) / FILE_KEY_LEN;
pub const FKT_BOTTOM_KEYS_PER_SECTOR: usize = SECTOR_SIZE / FILE_KEY_LEN;

/// PPRF keynode on disk is `{u32 left, u32 right, [u8;16] key}` = 24 bytes;
/// the rest of the containing sector is zero-padded.
pub const PPRF_KEYNODE_DISK_LEN: usize = 24;
pub const PPRF_KEYNODES_PER_SECTOR: usize = SECTOR_SIZE / PPRF_KEYNODE_DISK_LEN;

pub const HP_MAGIC1: u64 = 0x484f_4c45_5075_4e43; // "HOLEPuNC"
pub const HP_MAGIC2: u64 = 0x5445_4452_4f54_4142; // "TEDROTAB"

/// Geometry and immutable parameters fixed at volume creation.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Header {
    pub enc_key: Vec<u8>,
    pub enc_key_digest: [u8; 32],
    pub enc_key_salt: [u8; 32],
    pub pass_salt: [u8; 32],
    pub nv_index: u64,
    pub iv_key: Key<16>,

    pub journal_start: u64,
    pub key_table_start: u64,
    pub fkt_start: u64,
    pub pprf_start: u64,
    pub data_start: u64,
    pub data_end: u64,

    pub fkt_top_width: u64,
    pub fkt_bottom_width: u64,

    pub pprf_capacity: u32,
    pub pprf_depth: u8,
    /// The PRG's fixed per-volume nonce (§3 `PprfState::iv`); immutable
    /// alongside depth and capacity once the volume is created.
    pub pprf_iv: Key<16>,

    pub in_use: bool,
}

impl Header {
    pub fn key_table_len(&self) -> u64 {
        self.fkt_start - self.key_table_start
    }

    pub fn fkt_len(&self) -> u64 {
        self.pprf_start - self.fkt_start
    }

    pub fn pprf_len(&self) -> u64 {
        self.data_start - self.pprf_start
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        let encoded = bincode::serialize(self)?;
        if encoded.len() > buf.len() {
            return Err(Error::CorruptHeader);
        }
        buf[..encoded.len()].copy_from_slice(&encoded);
        Ok(buf)
    }

    pub fn deserialize(sector: &[u8]) -> Result<Self, Error> {
        bincode::deserialize(sector).map_err(|_| Error::CorruptHeader)
    }
}

/// Computes region placement for a fresh volume from device size and the
/// inode-count heuristic (`device_bytes / bytes_per_inode_ratio`).
pub struct Layout;

impl Layout {
    pub fn for_device(
        device_sectors: u64,
        bytes_per_inode_ratio: u64,
        pprf_depth: u8,
        refresh_interval: u32,
        key_growth_mult: u32,
    ) -> Result<(Header, u64), Error> {
        if device_sectors < JOURNAL_SECTORS + 4 {
            return Err(Error::CorruptHeader);
        }

        let device_bytes = device_sectors * SECTOR_SIZE as u64;
        let inode_count = (device_bytes / bytes_per_inode_ratio).max(1);
        let key_table_sectors = inode_count.div_ceil(FILE_KEYS_PER_SECTOR as u64).max(1);

        // pprf_capacity sized so a full refresh interval's worth of
        // punctures fits without forcing a rotation mid-interval.
        let pprf_capacity = (refresh_interval as u64)
            .saturating_mul(key_growth_mult as u64)
            .saturating_mul(pprf_depth as u64)
            .max(4) as u32;
        let pprf_sectors = (pprf_capacity as u64).div_ceil(PPRF_KEYNODES_PER_SECTOR as u64).max(1);

        let fkt_bottom_width = pprf_sectors
            .div_ceil(FKT_BOTTOM_KEYS_PER_SECTOR as u64)
            .max(1);
        let fkt_top_width = fkt_bottom_width
            .div_ceil(FKT_TOP_KEYS_PER_SECTOR as u64)
            .max(1);

        let header_start = 0u64;
        let journal_start = header_start + 1;
        let key_table_start = journal_start + JOURNAL_SECTORS;
        let fkt_start = key_table_start + key_table_sectors;
        let pprf_start = fkt_start + fkt_top_width + fkt_bottom_width;
        let data_start = pprf_start + pprf_sectors;

        if data_start >= device_sectors {
            return Err(Error::CorruptHeader);
        }

        let header = Header {
            enc_key: vec![0u8; 32],
            enc_key_digest: [0u8; 32],
            enc_key_salt: [0u8; 32],
            pass_salt: [0u8; 32],
            nv_index: 0,
            iv_key: [0u8; 16],
            journal_start,
            key_table_start,
            fkt_start,
            pprf_start,
            data_start,
            data_end: device_sectors,
            fkt_top_width,
            fkt_bottom_width,
            pprf_capacity,
            pprf_depth,
            pprf_iv: [0u8; 16],
            in_use: true,
        };

        Ok((header, inode_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_consecutive_and_ordered() {
        let (header, inode_count) =
            Layout::for_device(1 << 20, DEFAULT_BYTES_PER_INODE, 32, 64, 2).unwrap();
        assert!(inode_count > 0);
        assert_eq!(header.journal_start, 1);
        assert_eq!(header.key_table_start, header.journal_start + JOURNAL_SECTORS);
        assert!(header.fkt_start > header.key_table_start);
        assert!(header.pprf_start > header.fkt_start);
        assert!(header.data_start > header.pprf_start);
        assert!(header.data_start < header.data_end);
    }

    #[test]
    fn header_roundtrips_through_a_sector() {
        let (header, _) = Layout::for_device(1 << 16, DEFAULT_BYTES_PER_INODE, 16, 32, 2).unwrap();
        let bytes = header.serialize().unwrap();
        assert_eq!(bytes.len(), SECTOR_SIZE);
        let restored = Header::deserialize(&bytes).unwrap();
        assert_eq!(header, restored);
    }

    #[test]
    fn rejects_device_too_small_for_fixed_regions() {
        assert!(Layout::for_device(4, DEFAULT_BYTES_PER_INODE, 32, 64, 2).is_err());
    }
}
