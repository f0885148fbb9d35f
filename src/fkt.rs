//! C3: the two-level File-Key Table. Its sole purpose is to shrink the
//! atomic write boundary during a PPRF rotation: the table wraps the PPRF
//! arena's own on-disk sectors (not the key table), so reseeding just the
//! top level transitively invalidates every arena sector's wrapping key in
//! one small write, and a rotation's freshly-written arena is simply
//! encrypted under the newly reseeded chain as it goes out.

use serde::{Deserialize, Serialize};

use crate::crypter::wrap_blocks;
use crate::io::SECTOR_SIZE;
use crate::key::{Key, KeyGenerator};
use crate::layout::{FKT_BOTTOM_KEYS_PER_SECTOR, FKT_TOP_HEADER_LEN, FKT_TOP_KEYS_PER_SECTOR};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FktTopSector {
    pub pprf_size: u32,
    pub tag_counter: u64,
    pub padding: u32,
    pub entries: Vec<Key<16>>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FktBottomSector {
    pub entries: Vec<Key<16>>,
}

impl FktTopSector {
    pub fn fresh<R: KeyGenerator<16>>(pprf_size: u32, tag_counter: u64, rng: &mut R) -> Self {
        let entries = (0..FKT_TOP_KEYS_PER_SECTOR).map(|_| rng.gen_key()).collect();
        Self { pprf_size, tag_counter, padding: 0, entries }
    }

    fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.pprf_size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.tag_counter.to_le_bytes());
        buf[12..16].copy_from_slice(&self.padding.to_le_bytes());
        for (i, entry) in self.entries.iter().enumerate() {
            let off = FKT_TOP_HEADER_LEN + i * 16;
            buf[off..off + 16].copy_from_slice(entry);
        }
        buf
    }

    fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let pprf_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let tag_counter = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let padding = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let entries = (0..FKT_TOP_KEYS_PER_SECTOR)
            .map(|i| {
                let off = FKT_TOP_HEADER_LEN + i * 16;
                let mut key = [0u8; 16];
                key.copy_from_slice(&buf[off..off + 16]);
                key
            })
            .collect();
        Self { pprf_size, tag_counter, padding, entries }
    }

    /// Encrypted under the master key — the only FKT level that is.
    pub fn wrap(&self, master_key: &Key<16>) -> [u8; SECTOR_SIZE] {
        let mut buf = self.to_bytes();
        wrap_blocks(master_key, &mut buf, true);
        buf
    }

    pub fn unwrap(raw: &[u8; SECTOR_SIZE], master_key: &Key<16>) -> Self {
        let mut buf = *raw;
        wrap_blocks(master_key, &mut buf, false);
        Self::from_bytes(&buf)
    }
}

impl FktBottomSector {
    pub fn fresh<R: KeyGenerator<16>>(rng: &mut R) -> Self {
        let entries = (0..FKT_BOTTOM_KEYS_PER_SECTOR).map(|_| rng.gen_key()).collect();
        Self { entries }
    }

    fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, entry) in self.entries.iter().enumerate() {
            let off = i * 16;
            buf[off..off + 16].copy_from_slice(entry);
        }
        buf
    }

    fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let entries = (0..FKT_BOTTOM_KEYS_PER_SECTOR)
            .map(|i| {
                let off = i * 16;
                let mut key = [0u8; 16];
                key.copy_from_slice(&buf[off..off + 16]);
                key
            })
            .collect();
        Self { entries }
    }

    /// Wrapped under the owning top-level entry's key, not the master key.
    pub fn wrap(&self, wrap_key: &Key<16>) -> [u8; SECTOR_SIZE] {
        let mut buf = self.to_bytes();
        wrap_blocks(wrap_key, &mut buf, true);
        buf
    }

    pub fn unwrap(raw: &[u8; SECTOR_SIZE], wrap_key: &Key<16>) -> Self {
        let mut buf = *raw;
        wrap_blocks(wrap_key, &mut buf, false);
        Self::from_bytes(&buf)
    }
}

/// `(bottom_sector, slot_within_bottom)` for a PPRF arena sector index.
pub fn locate_bottom(pprf_sector: u64) -> (u64, usize) {
    let m = FKT_BOTTOM_KEYS_PER_SECTOR as u64;
    (pprf_sector / m, (pprf_sector % m) as usize)
}

/// `(top_sector, slot_within_top)` for a bottom-level sector index.
pub fn locate_top(bottom_sector: u64) -> (u64, usize) {
    let m = FKT_TOP_KEYS_PER_SECTOR as u64;
    (bottom_sector / m, (bottom_sector % m) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn top_sector_roundtrips_under_master_key() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let top = FktTopSector::fresh(5, 9, &mut rng);
        let master = [1u8; 16];
        let raw = top.wrap(&master);
        let restored = FktTopSector::unwrap(&raw, &master);
        assert_eq!(restored.pprf_size, 5);
        assert_eq!(restored.tag_counter, 9);
        assert_eq!(restored.entries, top.entries);
    }

    #[test]
    fn bottom_sector_roundtrips_under_entry_key() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let bottom = FktBottomSector::fresh(&mut rng);
        let wrap_key = [2u8; 16];
        let raw = bottom.wrap(&wrap_key);
        let restored = FktBottomSector::unwrap(&raw, &wrap_key);
        assert_eq!(restored.entries, bottom.entries);
    }

    #[test]
    fn locate_chains_through_both_levels() {
        let m_bottom = FKT_BOTTOM_KEYS_PER_SECTOR as u64;
        let m_top = FKT_TOP_KEYS_PER_SECTOR as u64;
        let (bottom, slot) = locate_bottom(m_bottom * 3 + 2);
        assert_eq!((bottom, slot), (3, 2));
        let (top, tslot) = locate_top(m_top * 2 + 1);
        assert_eq!((top, tslot), (2, 1));
    }
}
