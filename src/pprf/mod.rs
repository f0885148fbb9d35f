//! The puncturable-PRF GGM tree: C1. A flat, pointer-free arena of
//! [`Keynode`]s walked by the high bits of a `u64` tag. Grounded directly in
//! `find_key`/`puncture`/`evaluate` from the original PPRF implementation;
//! the child-index sentinels and the "deepest live ancestor" puncture walk
//! are carried over unchanged, re-expressed over a `Vec`-backed arena
//! instead of a raw C array with a separate growth path.

use serde::{Deserialize, Serialize};

use crate::crypter::prg_expand;
use crate::error::Error;
use crate::io::SECTOR_SIZE;
use crate::key::{Key, KeyGenerator};
use crate::layout::PPRF_KEYNODES_PER_SECTOR;

/// Child-index sentinel meaning "no further node; this node's key is live".
pub const LEAF: u32 = 0;
/// Child-index sentinel meaning "subtree irrecoverable".
pub const PUNCTURED: u32 = u32::MAX;

/// Arena growth factor applied by [`PprfState::grow`].
pub const ARENA_GROWTH_FACTOR: u32 = 4;

pub const MAX_DEPTH: u8 = 64;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Keynode {
    pub left: u32,
    pub right: u32,
    pub key: Key<16>,
}

impl Keynode {
    /// On-disk size per §6: `{u32 left, u32 right, [u8;16] key}`.
    pub const DISK_LEN: usize = 24;

    fn leaf(key: Key<16>) -> Self {
        Self { left: LEAF, right: LEAF, key }
    }

    pub fn to_disk_bytes(&self) -> [u8; Self::DISK_LEN] {
        let mut buf = [0u8; Self::DISK_LEN];
        buf[0..4].copy_from_slice(&self.left.to_le_bytes());
        buf[4..8].copy_from_slice(&self.right.to_le_bytes());
        buf[8..24].copy_from_slice(&self.key);
        buf
    }

    pub fn from_disk_bytes(buf: &[u8; Self::DISK_LEN]) -> Self {
        Self {
            left: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            right: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            key: buf[8..24].try_into().unwrap(),
        }
    }
}

/// The PPRF's full mutable state: the arena plus the bookkeeping needed to
/// bound its growth and walk tags against it.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PprfState {
    arena: Vec<Keynode>,
    capacity: u32,
    depth: u8,
    iv: Key<16>,
}

impl PprfState {
    /// One leaf at index 0 holding a fresh random 128-bit seed.
    pub fn new<R: KeyGenerator<16>>(depth: u8, iv: Key<16>, rng: &mut R) -> Self {
        assert!(depth > 0 && depth <= MAX_DEPTH);
        Self {
            arena: vec![Keynode::leaf(rng.gen_key())],
            capacity: 1,
            depth,
            iv,
        }
    }

    /// Rebuilds a state from an arena read back off disk. `capacity` and
    /// `iv` come from the header; the arena's logical size is simply its
    /// length, since the caller only passes the sectors that hold live
    /// entries (the FKT top sector's `pprf_size`, persisted alongside the
    /// arena precisely so mount knows how much of the region to read).
    pub fn from_parts(arena: Vec<Keynode>, capacity: u32, depth: u8, iv: Key<16>) -> Self {
        Self { arena, capacity, depth, iv }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn size(&self) -> u32 {
        self.arena.len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn iv(&self) -> Key<16> {
        self.iv
    }

    pub fn arena(&self) -> &[Keynode] {
        &self.arena
    }

    /// Geometric capacity growth (§4.5, factor 4). Must be called under the
    /// PPRF writer lock so no evaluator observes a half-grown arena.
    pub fn grow(&mut self) {
        self.capacity = self.capacity.saturating_mul(ARENA_GROWTH_FACTOR).max(self.capacity + 1);
    }

    fn bit(tag: u64, depth: u8) -> bool {
        tag & (1u64 << (63 - depth)) != 0
    }

    /// Shifts a counter into the tree's high bits, matching
    /// `puncture_at_tag`/`evaluate_at_tag`'s `counter << (64 - depth)` in the
    /// original PPRF source. Convenience for callers that track a plain
    /// monotonically increasing counter instead of a pre-shifted tag.
    fn counter_to_tag(&self, counter: u64) -> u64 {
        counter << (64 - self.depth as u64)
    }

    /// `evaluate`, but taking an unshifted counter.
    pub fn evaluate_counter(&self, counter: u64) -> Option<Key<16>> {
        self.evaluate(self.counter_to_tag(counter))
    }

    /// `puncture`, but taking an unshifted counter.
    pub fn puncture_counter(&mut self, counter: u64) -> Result<u32, Error> {
        self.puncture(self.counter_to_tag(counter))
    }

    /// Returns `None` iff `tag` lies below a punctured subtree.
    pub fn evaluate(&self, tag: u64) -> Option<Key<16>> {
        let mut idx = 0usize;
        let mut depth = 0u8;
        loop {
            let node = &self.arena[idx];
            if depth == self.depth {
                // A node materialized all the way to full depth carries no
                // further child bits; its own sentinel (set only by the
                // puncture that terminated here) says whether it is still
                // live.
                return if node.left == PUNCTURED { None } else { Some(node.key) };
            }
            let child = if Self::bit(tag, depth) { node.right } else { node.left };
            match child {
                LEAF => {
                    let mut key = node.key;
                    for d in depth..self.depth {
                        let halves = prg_expand(&key, &self.iv);
                        key = if Self::bit(tag, d) { halves.right } else { halves.left };
                    }
                    return Some(key);
                }
                PUNCTURED => return None,
                next => {
                    idx = next as usize;
                    depth += 1;
                }
            }
        }
    }

    /// Locates the deepest live ancestor of `tag`'s leaf, returning its
    /// arena index and depth. Shared by `evaluate`'s RAM-expansion path and
    /// `puncture`.
    fn find_live_ancestor(&self, tag: u64) -> Result<(usize, u8), Error> {
        let mut idx = 0usize;
        let mut depth = 0u8;
        loop {
            let node = &self.arena[idx];
            if depth == self.depth {
                return if node.left == PUNCTURED {
                    Err(Error::AlreadyPunctured)
                } else {
                    Ok((idx, depth))
                };
            }
            let child = if Self::bit(tag, depth) { node.right } else { node.left };
            match child {
                LEAF => return Ok((idx, depth)),
                PUNCTURED => return Err(Error::AlreadyPunctured),
                next => {
                    idx = next as usize;
                    depth += 1;
                }
            }
        }
    }

    /// Marks `tag`'s leaf irrecoverable. Returns the arena index of the
    /// ancestor whose key was consumed; newly allocated nodes occupy
    /// `[old_size, new_size)`, both observable via [`PprfState::size`]
    /// before and after the call.
    pub fn puncture(&mut self, tag: u64) -> Result<u32, Error> {
        let (idx, depth) = self.find_live_ancestor(tag)?;
        let remaining = (self.depth - depth) as u32;

        if self.size() + 2 * remaining > self.capacity {
            return Err(Error::ArenaExhausted);
        }

        let mut key = self.arena[idx].key;
        self.arena[idx].key = [0u8; 16];

        let mut cur_idx = idx;
        for d in depth..self.depth {
            let halves = prg_expand(&key, &self.iv);
            let on_path_right = Self::bit(tag, d);
            let (on_half, off_half) = if on_path_right {
                (halves.right, halves.left)
            } else {
                (halves.left, halves.right)
            };

            let off_idx = self.alloc(Keynode::leaf(off_half));
            let on_idx = self.alloc(Keynode::leaf(on_half));

            if on_path_right {
                self.arena[cur_idx].left = off_idx;
                self.arena[cur_idx].right = on_idx;
            } else {
                self.arena[cur_idx].left = on_idx;
                self.arena[cur_idx].right = off_idx;
            }

            key = on_half;
            cur_idx = on_idx as usize;
        }

        self.arena[cur_idx].left = PUNCTURED;
        self.arena[cur_idx].right = PUNCTURED;
        self.arena[cur_idx].key = [0u8; 16];

        Ok(idx as u32)
    }

    fn alloc(&mut self, node: Keynode) -> u32 {
        let idx = self.arena.len() as u32;
        self.arena.push(node);
        idx
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Arena index `idx` lives in this sector of the on-disk arena region.
    pub fn sector_of(idx: u32) -> u64 {
        idx as u64 / PPRF_KEYNODES_PER_SECTOR as u64
    }

    /// Packs one arena sector's worth of keynodes into their exact §6
    /// on-disk layout: `DISK_LEN`-byte keynodes packed tight, the remainder
    /// of the sector zero-padded. Slots at or past `size()` (allocated
    /// capacity not yet in use) are emitted as zero.
    pub fn pack_sector(&self, sector_index: u64) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        let base = sector_index as usize * PPRF_KEYNODES_PER_SECTOR;
        for slot in 0..PPRF_KEYNODES_PER_SECTOR {
            let idx = base + slot;
            if idx < self.arena.len() {
                let off = slot * Keynode::DISK_LEN;
                buf[off..off + Keynode::DISK_LEN].copy_from_slice(&self.arena[idx].to_disk_bytes());
            }
        }
        buf
    }

    /// Unpacks `size` live keynodes from a sequence of raw arena sectors
    /// (in order, starting at the region's first sector). Used at mount.
    pub fn unpack_arena(sectors: &[[u8; SECTOR_SIZE]], size: u32) -> Vec<Keynode> {
        let mut arena = Vec::with_capacity(size as usize);
        'outer: for sector in sectors {
            for slot in 0..PPRF_KEYNODES_PER_SECTOR {
                if arena.len() as u32 >= size {
                    break 'outer;
                }
                let off = slot * Keynode::DISK_LEN;
                let bytes: [u8; Keynode::DISK_LEN] = sector[off..off + Keynode::DISK_LEN].try_into().unwrap();
                arena.push(Keynode::from_disk_bytes(&bytes));
            }
        }
        arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn shift(tag: u64, depth: u8) -> u64 {
        tag << (64 - depth)
    }

    #[test]
    fn s1_depth2_zero_iv() {
        let mut state = PprfState::new(2, [0u8; 16], &mut rng());
        state.capacity = 64;
        state.puncture(shift(0b10, 2)).unwrap();

        assert!(state.evaluate(shift(0b00, 2)).is_some());
        assert!(state.evaluate(shift(0b01, 2)).is_some());
        assert!(state.evaluate(shift(0b11, 2)).is_some());
        assert!(state.evaluate(shift(0b10, 2)).is_none());
    }

    #[test]
    fn s2_repuncture_and_growth_bound() {
        let mut state = PprfState::new(2, [0u8; 16], &mut rng());
        state.capacity = 64;
        let before = state.size();

        state.puncture(shift(0b01, 2)).unwrap();
        state.puncture(shift(0b10, 2)).unwrap();
        let after = state.size();
        assert!(after - before <= 2 * 2 * 2);

        let err = state.puncture(shift(0b01, 2)).unwrap_err();
        assert!(matches!(err, Error::AlreadyPunctured));
    }

    #[test]
    fn s3_depth16_sixteen_punctures() {
        let mut state = PprfState::new(16, [0u8; 16], &mut rng());
        state.capacity = 1 << 20;

        for t in 0u64..16 {
            state.puncture(shift(t, 16)).unwrap();
        }

        let none_count = (0u64..=65535).filter(|t| state.evaluate(shift(*t, 16)).is_none()).count();
        assert_eq!(none_count, 16);
    }

    #[test]
    fn puncture_isolation() {
        let mut state = PprfState::new(8, [1u8; 16], &mut rng());
        state.capacity = 1 << 16;

        let tags: Vec<u64> = (0u64..40).map(|t| shift(t, 8)).collect();
        let before: Vec<_> = tags.iter().map(|t| state.evaluate(*t)).collect();

        state.puncture(tags[7]).unwrap();

        for (i, tag) in tags.iter().enumerate() {
            if i == 7 {
                assert!(state.evaluate(*tag).is_none());
            } else {
                assert_eq!(state.evaluate(*tag), before[i]);
            }
        }
    }

    #[test]
    fn serialize_roundtrip() {
        let mut state = PprfState::new(6, [3u8; 16], &mut rng());
        state.capacity = 1024;
        state.puncture(shift(5, 6)).unwrap();

        let bytes = state.serialize().unwrap();
        let restored = PprfState::deserialize(&bytes).unwrap();

        for t in 0u64..64 {
            assert_eq!(state.evaluate(shift(t, 6)), restored.evaluate(shift(t, 6)));
        }
    }

    #[test]
    fn arena_sector_packing_roundtrips() {
        let mut state = PprfState::new(10, [2u8; 16], &mut rng());
        state.capacity = 4096;
        for t in 0u64..5 {
            state.puncture(shift(t, 10)).unwrap();
        }

        let sector_count = (state.size() as u64).div_ceil(PPRF_KEYNODES_PER_SECTOR as u64).max(1);
        let sectors: Vec<_> = (0..sector_count).map(|s| state.pack_sector(s)).collect();
        let arena = PprfState::unpack_arena(&sectors, state.size());
        let restored = PprfState::from_parts(arena, state.capacity(), state.depth(), state.iv());

        for t in 0u64..64 {
            assert_eq!(state.evaluate(shift(t, 10)), restored.evaluate(shift(t, 10)));
        }
    }

    #[test]
    fn arena_exhausted_forces_caller_to_grow() {
        let mut state = PprfState::new(4, [0u8; 16], &mut rng());
        let err = state.puncture(shift(0, 4)).unwrap_err();
        assert!(matches!(err, Error::ArenaExhausted));
        state.grow();
        assert!(state.capacity() >= 4);
    }

    #[test]
    fn counter_api_matches_manually_shifted_tags() {
        let mut state = PprfState::new(8, [5u8; 16], &mut rng());
        state.capacity = 1 << 12;

        assert_eq!(state.evaluate_counter(3), state.evaluate(shift(3, 8)));

        state.puncture_counter(3).unwrap();
        assert!(state.evaluate_counter(3).is_none());
        assert_eq!(state.evaluate_counter(4), state.evaluate(shift(4, 8)));
    }
}
