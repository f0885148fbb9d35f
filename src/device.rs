//! The orchestration layer tying C1–C7 together into the operations a
//! block-storage layer actually calls: `create`, `open` (mount, replaying
//! any pending journal record), `lookup`, `rekey`, `unlink`, and the two
//! rotations. Nothing here is itself a numbered component — it is the
//! wiring between them, the same role `dm-holepunch-main.c`'s
//! request-handling path plays over its own structures.
//!
//! Key-table sectors are wrapped directly by `PPRF.evaluate(tag)`. The FKT
//! instead wraps the PPRF arena's own on-disk sectors: a PPRF rotation
//! reseeds the FKT top level, which transitively changes every arena
//! sector's wrapping key in one small write, and the freshly-generated
//! arena is simply persisted under that fresh chain as it is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rand::RngCore;

use crate::anchor::Anchor;
use crate::cache::{CacheEntry, Evictor, MapCache, SectorStatus};
use crate::config::VolumeConfig;
use crate::crypter::{derive_sector_iv, AesCtrCrypter, StatefulCrypter};
use crate::error::Error;
use crate::fkt::{self, FktBottomSector, FktTopSector};
use crate::hasher::{Hasher, Sha3_256};
use crate::io::{BlockDevice, SECTOR_SIZE};
use crate::journal::{Journal, JournalRecord, RecoveryAction};
use crate::key::{Key, KeyGenerator};
use crate::keytable::{self, FileKeySector};
use crate::layout::{Header, Layout, PPRF_KEYNODES_PER_SECTOR};
use crate::pprf::PprfState;
use crate::rotation::RotationController;
use crate::secret::Secret;

/// One-shot rotation payloads (`new_master_enc`, `new_pprf_enc`) are each
/// encrypted under a key used for nothing else in that payload's lifetime,
/// so a fixed per-purpose IV is safe — distinct constants just keep the
/// two kinds of blob out of each other's keystream.
const MASTER_ROT_BLOB_IV: [u8; 16] = [0u8; 16];
const PPRF_ROT_BLOB_IV: [u8; 16] = [1u8; 16];

fn encrypt_blob(key: &Key<16>, iv: &[u8; 16], plaintext: Vec<u8>) -> Vec<u8> {
    let mut buf = plaintext;
    AesCtrCrypter.apply_keystream(key, iv, &mut buf).expect("aes-ctr is infallible");
    buf
}

fn decrypt_blob(key: &Key<16>, iv: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    let mut buf = ciphertext.to_vec();
    AesCtrCrypter.apply_keystream(key, iv, &mut buf).expect("aes-ctr is infallible");
    buf
}

fn encrypt_pprf_blob(master: &Key<16>, pprf: &PprfState) -> Result<Vec<u8>, Error> {
    Ok(encrypt_blob(master, &PPRF_ROT_BLOB_IV, pprf.serialize()?))
}

fn decrypt_pprf_blob(master: &Key<16>, bytes: &[u8]) -> Result<PprfState, Error> {
    PprfState::deserialize(&decrypt_blob(master, &PPRF_ROT_BLOB_IV, bytes))
}

fn read_fkt_top<D: BlockDevice>(header: &Header, device: &mut D, master: &Key<16>, top_idx: u64) -> Result<FktTopSector, Error> {
    let mut raw = [0u8; SECTOR_SIZE];
    device.read_sector(header.fkt_start + top_idx, &mut raw)?;
    Ok(FktTopSector::unwrap(&raw, master))
}

fn write_fkt_top<D: BlockDevice>(
    header: &Header,
    device: &mut D,
    master: &Key<16>,
    top_idx: u64,
    sector: &FktTopSector,
) -> Result<(), Error> {
    let raw = sector.wrap(master);
    device.write_sector(header.fkt_start + top_idx, &raw)?;
    Ok(())
}

/// Reads the bottom sector owning PPRF arena sector `pprf_sector_idx`,
/// returning it alongside the wrap key extracted from its owning top entry
/// (the same key arena-sector encryption uses).
fn read_fkt_bottom<D: BlockDevice>(
    header: &Header,
    device: &mut D,
    master: &Key<16>,
    bottom_idx: u64,
) -> Result<FktBottomSector, Error> {
    let (top_idx, slot) = fkt::locate_top(bottom_idx);
    let top = read_fkt_top(header, device, master, top_idx)?;
    let wrap_key = top.entries[slot];
    let mut raw = [0u8; SECTOR_SIZE];
    device.read_sector(header.fkt_start + header.fkt_top_width + bottom_idx, &mut raw)?;
    Ok(FktBottomSector::unwrap(&raw, &wrap_key))
}

fn write_fkt_bottom<D: BlockDevice>(
    header: &Header,
    device: &mut D,
    master: &Key<16>,
    bottom_idx: u64,
    sector: &FktBottomSector,
) -> Result<(), Error> {
    let (top_idx, slot) = fkt::locate_top(bottom_idx);
    let top = read_fkt_top(header, device, master, top_idx)?;
    let wrap_key = top.entries[slot];
    let raw = sector.wrap(&wrap_key);
    device.write_sector(header.fkt_start + header.fkt_top_width + bottom_idx, &raw)?;
    Ok(())
}

/// The wrap key a PPRF arena sector is encrypted under: its owning FKT
/// bottom sector's entry.
fn arena_wrap_key<D: BlockDevice>(header: &Header, device: &mut D, master: &Key<16>, sector_idx: u64) -> Result<Key<16>, Error> {
    let (bottom_idx, slot) = fkt::locate_bottom(sector_idx);
    let bottom = read_fkt_bottom(header, device, master, bottom_idx)?;
    Ok(bottom.entries[slot])
}

fn read_arena_sector<D: BlockDevice>(header: &Header, device: &mut D, master: &Key<16>, sector_idx: u64) -> Result<[u8; SECTOR_SIZE], Error> {
    let wrap_key = arena_wrap_key(header, device, master, sector_idx)?;
    let mut raw = [0u8; SECTOR_SIZE];
    device.read_sector(header.pprf_start + sector_idx, &mut raw)?;
    let iv = derive_sector_iv(&header.iv_key, header.pprf_start + sector_idx);
    AesCtrCrypter.apply_keystream(&wrap_key, &iv, &mut raw).expect("aes-ctr is infallible");
    Ok(raw)
}

fn write_arena_sector<D: BlockDevice>(
    header: &Header,
    device: &mut D,
    master: &Key<16>,
    sector_idx: u64,
    plain: &[u8; SECTOR_SIZE],
) -> Result<(), Error> {
    let wrap_key = arena_wrap_key(header, device, master, sector_idx)?;
    let mut buf = *plain;
    let iv = derive_sector_iv(&header.iv_key, header.pprf_start + sector_idx);
    AesCtrCrypter.apply_keystream(&wrap_key, &iv, &mut buf).expect("aes-ctr is infallible");
    device.write_sector(header.pprf_start + sector_idx, &buf)?;
    Ok(())
}

/// Loads the live PPRF state from disk: `pprf_size` comes from FKT top
/// sector 0, the arena's bytes from `pprf_start.. + ceil(size / N)`.
fn load_pprf<D: BlockDevice>(header: &Header, device: &mut D, master: &Key<16>) -> Result<PprfState, Error> {
    let top0 = read_fkt_top(header, device, master, 0)?;
    let sector_count = (top0.pprf_size as u64).div_ceil(PPRF_KEYNODES_PER_SECTOR as u64).max(1);
    let mut sectors = Vec::with_capacity(sector_count as usize);
    for s in 0..sector_count {
        sectors.push(read_arena_sector(header, device, master, s)?);
    }
    let arena = PprfState::unpack_arena(&sectors, top0.pprf_size);
    Ok(PprfState::from_parts(arena, header.pprf_capacity, header.pprf_depth, header.pprf_iv))
}

fn persist_pprf<D: BlockDevice>(header: &Header, device: &mut D, master: &Key<16>, pprf: &PprfState) -> Result<(), Error> {
    let sector_count = (pprf.size() as u64).div_ceil(PPRF_KEYNODES_PER_SECTOR as u64).max(1);
    for s in 0..sector_count {
        let plain = pprf.pack_sector(s);
        write_arena_sector(header, device, master, s, &plain)?;
    }
    let mut top0 = read_fkt_top(header, device, master, 0)?;
    top0.pprf_size = pprf.size();
    write_fkt_top(header, device, master, 0, &top0)
}

fn tag_for_sector(depth: u8, sector_idx: u64) -> u64 {
    sector_idx << (64 - depth as u64)
}

/// Exclusive, borrowed access to a volume's device and master key used only
/// during [`Volume::open`]'s recovery pass, before anything is shared behind
/// the locks `Volume` itself uses for live operation.
struct MountState<'a, D: BlockDevice> {
    header: &'a Header,
    device: &'a mut D,
    master: Key<16>,
}

impl<D: BlockDevice> RecoveryAction for MountState<'_, D> {
    fn master_key_hash(&self) -> [u8; 32] {
        Sha3_256::digest(&self.master)
    }

    fn install_master(&mut self, new_master_enc: &[u8]) -> Result<(), Error> {
        let decrypted = decrypt_blob(&self.master, &MASTER_ROT_BLOB_IV, new_master_enc);
        let mut new_master = [0u8; 16];
        new_master.copy_from_slice(&decrypted[..16]);

        for top_idx in 0..self.header.fkt_top_width {
            let top = read_fkt_top(self.header, self.device, &self.master, top_idx)?;
            write_fkt_top(self.header, self.device, &new_master, top_idx, &top)?;
        }

        self.master = new_master;
        Ok(())
    }

    fn rewrap_key_table(&mut self, new_pprf_enc: &[u8], reset_magic: bool) -> Result<(), Error> {
        let new_pprf = decrypt_pprf_blob(&self.master, new_pprf_enc)?;
        let old_pprf = load_pprf(self.header, self.device, &self.master)?;

        for sector_idx in 0..self.header.key_table_len() {
            let addr = self.header.key_table_start + sector_idx;
            let mut raw = [0u8; SECTOR_SIZE];
            self.device.read_sector(addr, &mut raw)?;
            let old_tag = u64::from_le_bytes(raw[0..8].try_into().unwrap());
            // Every sector gets a fresh tag keyed to its own physical index,
            // the same convention `Volume::create` seeds the table with, so
            // a post-rotation walk is idempotent under repeated replay.
            let new_tag = tag_for_sector(self.header.pprf_depth, sector_idx);

            let already_migrated = match new_pprf.evaluate(new_tag) {
                Some(wrap_key) => keytable::decrypt_sector(&raw, &wrap_key, &self.header.iv_key)?.is_valid(),
                None => false,
            };
            if already_migrated && !reset_magic {
                continue;
            }

            let old_wrap = old_pprf.evaluate(old_tag).ok_or(Error::JournalReplayFailure)?;
            let mut sector = keytable::decrypt_sector(&raw, &old_wrap, &self.header.iv_key)?;
            if !sector.is_valid() && !reset_magic {
                return Err(Error::JournalReplayFailure);
            }
            sector.tag = new_tag;

            let new_wrap = new_pprf.evaluate(new_tag).ok_or(Error::JournalReplayFailure)?;
            let out = keytable::encrypt_sector(&sector, &new_wrap, &self.header.iv_key);
            self.device.write_sector(addr, &out)?;
        }
        Ok(())
    }

    fn reseed_fkt(&mut self) -> Result<(), Error> {
        let mut rng = rand::thread_rng();
        let top0 = read_fkt_top(self.header, self.device, &self.master, 0)?;
        let pprf_sector_count = self.header.fkt_len() - self.header.fkt_top_width;

        let mut tops: Vec<FktTopSector> = (0..self.header.fkt_top_width)
            .map(|_| FktTopSector::fresh(top0.pprf_size, top0.tag_counter, &mut rng))
            .collect();
        for bottom_idx in 0..pprf_sector_count {
            let bottom = FktBottomSector::fresh(&mut rng);
            let (top_idx, slot) = fkt::locate_top(bottom_idx);
            let wrap_key = tops[top_idx as usize].entries[slot];
            let raw = bottom.wrap(&wrap_key);
            self.device
                .write_sector(self.header.fkt_start + self.header.fkt_top_width + bottom_idx, &raw)?;
        }
        for (i, top) in tops.drain(..).enumerate() {
            write_fkt_top(self.header, self.device, &self.master, i as u64, &top)?;
        }
        Ok(())
    }

    fn install_pprf(&mut self, new_pprf_enc: &[u8]) -> Result<(), Error> {
        let pprf = decrypt_pprf_blob(&self.master, new_pprf_enc)?;
        persist_pprf(self.header, self.device, &self.master, &pprf)
    }

    fn reset_tag_counters(&mut self) -> Result<(), Error> {
        let mut top0 = read_fkt_top(self.header, self.device, &self.master, 0)?;
        // `rewrap_key_table` just reassigned every sector a tag equal to its
        // own index (0..key_table_len), the same span `Volume::create`
        // seeds the table with; the counter for the *next* tag `unlink`
        // hands out has to start past that whole span, not at a shifted
        // on-disk tag value left over from before the rotation.
        top0.tag_counter = self.header.key_table_len();
        write_fkt_top(self.header, self.device, &self.master, 0, &top0)
    }

    fn schedule_master_rot(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn write_block(&mut self, addr: u64, data: &[u8; SECTOR_SIZE]) -> Result<(), Error> {
        self.device.write_sector(addr, data)?;
        Ok(())
    }
}

/// An open, mounted volume. Cheap to share: every live method takes `&self`
/// and synchronizes internally (§5 — a `pprf_sem`-style `RwLock` guarding
/// the arena, a single journal mutex serializing commits, per-bucket cache
/// mutexes, a single background evictor, and an in-flight job counter so
/// `close` can observe quiescence).
pub struct Volume<D: BlockDevice, An: Anchor> {
    header: Header,
    journal: Mutex<Journal<D>>,
    pprf: RwLock<PprfState>,
    master: RwLock<Secret<Key<16>>>,
    anchor: Mutex<An>,
    anchor_slot: u64,
    cache: Arc<MapCache>,
    evictor: Evictor,
    rotation: Mutex<RotationController>,
    in_flight: AtomicU64,
}

struct InFlightGuard<'a>(&'a AtomicU64);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<D: BlockDevice, An: Anchor> Volume<D, An> {
    /// Formats a fresh volume directly: unlike a later `PPRF_ROT`/`PPRF_INIT`
    /// replay, there is no prior on-disk state to stay crash-consistent
    /// against, so create writes the key table, FKT, and PPRF arena once,
    /// then commits the header with `in_use` set.
    pub fn create<R: RngCore>(
        mut device: D,
        device_sectors: u64,
        cfg: &VolumeConfig,
        owner_auth: &Secret<Vec<u8>>,
        anchor_slot: u64,
        mut anchor: An,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let (mut header, _inode_count) = Layout::for_device(
            device_sectors,
            cfg.bytes_per_inode_ratio,
            cfg.pprf_depth,
            cfg.refresh_interval,
            cfg.key_growth_mult,
        )?;

        header.iv_key = rng.gen_key();
        header.pprf_iv = rng.gen_key();
        let master_key: Key<16> = rng.gen_key();

        anchor.define_slot(anchor_slot, owner_auth)?;
        let mut slot = [0u8; 32];
        slot[..16].copy_from_slice(&master_key);
        anchor.write_slot(anchor_slot, &slot)?;

        // `PprfState::new` always starts a fresh tree at capacity 1; the
        // region `Layout` already reserved on disk is sized for
        // `header.pprf_capacity`, so the in-memory tree is built straight
        // at that capacity rather than left to grow into it one puncture
        // at a time (growth isn't backed by any extra on-disk space here).
        let seed = PprfState::new(header.pprf_depth, header.pprf_iv, rng);
        let mut pprf = PprfState::from_parts(seed.arena().to_vec(), header.pprf_capacity, header.pprf_depth, header.pprf_iv);

        let key_table_sectors = header.key_table_len();
        for sector_idx in 0..key_table_sectors {
            let tag = tag_for_sector(header.pprf_depth, sector_idx);
            let sector = FileKeySector::fresh(tag, rng);
            let wrap_key = pprf.evaluate(tag).expect("freshly seeded tag cannot be punctured");
            let raw = keytable::encrypt_sector(&sector, &wrap_key, &header.iv_key);
            device.write_sector(header.key_table_start + sector_idx, &raw)?;
        }

        let pprf_sector_count = header.fkt_len() - header.fkt_top_width;
        let mut tops: Vec<FktTopSector> = (0..header.fkt_top_width)
            .map(|_| FktTopSector::fresh(pprf.size(), key_table_sectors, rng))
            .collect();
        for bottom_idx in 0..pprf_sector_count {
            let bottom = FktBottomSector::fresh(rng);
            let (top_idx, slot_idx) = fkt::locate_top(bottom_idx);
            let wrap_key = tops[top_idx as usize].entries[slot_idx];
            let raw = bottom.wrap(&wrap_key);
            device.write_sector(header.fkt_start + header.fkt_top_width + bottom_idx, &raw)?;
        }
        for (i, top) in tops.drain(..).enumerate() {
            write_fkt_top(&header, &mut device, &master_key, i as u64, &top)?;
        }

        persist_pprf(&header, &mut device, &master_key, &pprf)?;

        header.in_use = true;
        let header_bytes = header.serialize()?;
        let mut header_sector = [0u8; SECTOR_SIZE];
        header_sector.copy_from_slice(&header_bytes);
        device.write_sector(0, &header_sector)?;

        let mut journal = Journal::new(header.journal_start, device);
        journal.clear()?;

        let cache = Arc::new(MapCache::new(cfg.map_cache_capacity_per_bucket));
        let evictor = Evictor::spawn(Arc::clone(&cache), cfg.map_cache_capacity_per_bucket, Duration::from_secs(30));

        Ok(Self {
            header,
            journal: Mutex::new(journal),
            pprf: RwLock::new(pprf),
            master: RwLock::new(Secret::new(master_key)),
            anchor: Mutex::new(anchor),
            anchor_slot,
            cache,
            evictor,
            rotation: Mutex::new(RotationController::new(cfg.refresh_interval)),
            in_flight: AtomicU64::new(0),
        })
    }

    /// Mounts an existing volume: reads the header, unwraps the master key
    /// via `anchor`, replays any pending journal record, then reads the
    /// (possibly just-installed) PPRF arena back into memory.
    pub fn open(mut device: D, owner_auth: &Secret<Vec<u8>>, anchor_slot: u64, mut anchor: An, cfg: &VolumeConfig) -> Result<Self, Error> {
        let mut header_sector = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut header_sector)?;
        let header = Header::deserialize(&header_sector)?;
        if !header.in_use {
            return Err(Error::CorruptHeader);
        }

        anchor.define_slot(anchor_slot, owner_auth)?;
        let slot = anchor.read_slot(anchor_slot)?;
        let mut master_key = [0u8; 16];
        master_key.copy_from_slice(&slot[..16]);

        let mut journal = Journal::new(header.journal_start, device);
        let pending = journal.read_record()?;

        if !matches!(pending, JournalRecord::None) {
            let mut mount = MountState { header: &header, device: journal.device_mut(), master: master_key };
            crate::journal::replay(&pending, &mut mount)?;
            master_key = mount.master;
            journal.clear()?;
        }

        let pprf = load_pprf(&header, journal.device_mut(), &master_key)?;

        let cache = Arc::new(MapCache::new(cfg.map_cache_capacity_per_bucket));
        let evictor = Evictor::spawn(Arc::clone(&cache), cfg.map_cache_capacity_per_bucket, Duration::from_secs(30));

        Ok(Self {
            header,
            journal: Mutex::new(journal),
            pprf: RwLock::new(pprf),
            master: RwLock::new(Secret::new(master_key)),
            anchor: Mutex::new(anchor),
            anchor_slot,
            cache,
            evictor,
            rotation: Mutex::new(RotationController::new(cfg.refresh_interval)),
            in_flight: AtomicU64::new(0),
        })
    }

    fn begin_io(&self) -> InFlightGuard<'_> {
        InFlightGuard::enter(&self.in_flight)
    }

    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Reads a key-table sector off disk and decrypts it under
    /// `PPRF.evaluate(tag)`, the cleartext tag at the front of the sector.
    fn load_key_sector(&self, sector_idx: u64) -> Result<FileKeySector, Error> {
        let mut journal = self.journal.lock().unwrap();
        let mut raw = [0u8; SECTOR_SIZE];
        journal.device_mut().read_sector(self.header.key_table_start + sector_idx, &mut raw)?;
        drop(journal);

        let tag = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let wrap_key = self.pprf.read().unwrap().evaluate(tag).ok_or(Error::MissingKey(sector_idx))?;
        let sector = keytable::decrypt_sector(&raw, &wrap_key, &self.header.iv_key)?;
        if !sector.is_valid() {
            return Err(Error::CorruptHeader);
        }
        Ok(sector)
    }

    /// Resolves an inode's `(key, iv)`, going to the map cache first (§5).
    pub fn lookup(&self, inode: u64) -> Result<(Key<16>, Key<16>), Error> {
        let _job = self.begin_io();
        if let Some(entry) = self.cache.get(inode) {
            return Ok((entry.key, entry.iv));
        }

        let (sector_idx, slot) = keytable::locate(inode);
        let sector = self.load_key_sector(sector_idx)?;
        let key = sector.entries[slot].key;
        let iv = derive_sector_iv(&self.header.iv_key, inode);
        self.cache.insert(inode, CacheEntry { key, iv, status: SectorStatus::Clean });
        Ok((key, iv))
    }

    /// Replaces an inode's key in place, leaving its tag (and every other
    /// inode sharing its sector) untouched. Journaled as a single-block
    /// `Generic` record.
    pub fn rekey<R: RngCore>(&self, inode: u64, rng: &mut R) -> Result<(), Error> {
        let _job = self.begin_io();
        let (sector_idx, slot) = keytable::locate(inode);
        let mut sector = self.load_key_sector(sector_idx)?;
        let new_key: Key<16> = rng.gen_key();
        sector.entries[slot].key = new_key;

        let wrap_key = self.pprf.read().unwrap().evaluate(sector.tag).ok_or(Error::MissingKey(sector_idx))?;
        let raw = keytable::encrypt_sector(&sector, &wrap_key, &self.header.iv_key);
        let addr = self.header.key_table_start + sector_idx;

        self.commit(JournalRecord::Generic { blocks: vec![(addr, raw)] })?;

        let iv = derive_sector_iv(&self.header.iv_key, inode);
        self.cache.insert(inode, CacheEntry { key: new_key, iv, status: SectorStatus::Clean });
        Ok(())
    }

    /// Rekeys the inode, allocates a fresh tag for its sector, encrypts the
    /// sector under `PPRF.evaluate(new_tag)`, then punctures the old tag —
    /// all three tag-dependent writes committed in one `PprfPunct` record
    /// (§4.2: "the two tag-dependent steps are journaled together").
    pub fn unlink<R: RngCore>(&self, inode: u64, rng: &mut R) -> Result<(), Error> {
        let _job = self.begin_io();
        let (sector_idx, slot) = keytable::locate(inode);
        let mut sector = self.load_key_sector(sector_idx)?;
        let old_tag = sector.tag;

        sector.entries[slot].key = rng.gen_key();

        let (top0_addr, mut top0) = {
            let mut journal = self.journal.lock().unwrap();
            let master = **self.master.read().unwrap();
            let top0 = read_fkt_top(&self.header, journal.device_mut(), &master, 0)?;
            (self.header.fkt_start, top0)
        };
        let new_tag_counter = top0.tag_counter + 1;
        let new_tag = new_tag_counter << (64 - self.header.pprf_depth as u64);
        sector.tag = new_tag;

        let old_size = self.pprf.read().unwrap().size();

        let puncture_result = self.pprf.write().unwrap().puncture(old_tag);
        let ancestor_idx = match puncture_result {
            Ok(idx) => idx,
            Err(Error::AlreadyPunctured) => return Ok(()),
            Err(Error::ArenaExhausted) => {
                self.rotate_pprf(rng)?;
                return self.unlink(inode, rng);
            }
            Err(e) => return Err(e),
        };

        let new_wrap = self.pprf.read().unwrap().evaluate(new_tag).expect("freshly allocated tag cannot be punctured yet");
        let new_kt_raw = keytable::encrypt_sector(&sector, &new_wrap, &self.header.iv_key);
        let kt_addr = self.header.key_table_start + sector_idx;

        top0.tag_counter = new_tag_counter;
        top0.pprf_size = self.pprf.read().unwrap().size();

        let master = **self.master.read().unwrap();
        let mut pprf_blocks = Vec::new();
        {
            let mut journal = self.journal.lock().unwrap();
            let pprf_guard = self.pprf.read().unwrap();
            let mut touched = std::collections::BTreeSet::new();
            touched.insert(PprfState::sector_of(ancestor_idx));
            for idx in old_size..pprf_guard.size() {
                touched.insert(PprfState::sector_of(idx));
            }
            for s in touched {
                let plain = pprf_guard.pack_sector(s);
                let wrap_key = arena_wrap_key(&self.header, journal.device_mut(), &master, s)?;
                let mut buf = plain;
                let iv = derive_sector_iv(&self.header.iv_key, self.header.pprf_start + s);
                AesCtrCrypter.apply_keystream(&wrap_key, &iv, &mut buf).expect("aes-ctr is infallible");
                pprf_blocks.push((self.header.pprf_start + s, buf));
            }
        }

        let fkt_top_raw = top0.wrap(&master);

        self.commit(JournalRecord::PprfPunct {
            pprf_blocks,
            fkt_top: (top0_addr, fkt_top_raw),
            key_table_block: Some((kt_addr, new_kt_raw)),
        })?;

        let iv = derive_sector_iv(&self.header.iv_key, inode);
        self.cache.insert(inode, CacheEntry { key: sector.entries[slot].key, iv, status: SectorStatus::Clean });

        let interval_elapsed = self.rotation.lock().unwrap().record_puncture();
        let arena_tight = RotationController::arena_under_pressure(&self.pprf.read().unwrap());
        if interval_elapsed || arena_tight {
            self.rotate_pprf(rng)?;
        }

        Ok(())
    }

    /// Generates a fresh depth-matched PPRF (a single random leaf), rewraps
    /// every key-table sector's existing tag under it, reseeds the FKT, and
    /// installs the new arena — all via one journaled `PprfRot` record so a
    /// crash mid-rotation resumes exactly where it left off on the next
    /// mount.
    pub fn rotate_pprf<R: RngCore>(&self, rng: &mut R) -> Result<(), Error> {
        let _job = self.begin_io();
        let master = **self.master.read().unwrap();
        // `PprfState::new` always starts a fresh tree at capacity 1; size it
        // into the region `Layout` reserved on disk, exactly as `create`
        // does, rather than leaving the live tree unable to absorb a single
        // puncture before reporting `ArenaExhausted`.
        let seed = PprfState::new(self.header.pprf_depth, self.header.pprf_iv, rng);
        let fresh = PprfState::from_parts(seed.arena().to_vec(), self.header.pprf_capacity, self.header.pprf_depth, self.header.pprf_iv);
        let new_pprf_enc = encrypt_pprf_blob(&master, &fresh)?;

        {
            let mut journal = self.journal.lock().unwrap();
            journal.write_record(&JournalRecord::PprfRot { new_pprf_enc: new_pprf_enc.clone() })?;
            let mut mount = MountState { header: &self.header, device: journal.device_mut(), master };
            crate::journal::replay(&JournalRecord::PprfRot { new_pprf_enc }, &mut mount)?;
            journal.clear()?;
        }

        *self.pprf.write().unwrap() = fresh;
        self.rotation.lock().unwrap().reset();
        Ok(())
    }

    /// Generates a fresh master key, encrypts it under the running one, and
    /// commits through `MasterRot` — which rewraps the FKT top sectors and
    /// swaps the in-memory master key as one replay pass.
    pub fn rotate_master<R: RngCore>(&self, rng: &mut R) -> Result<(), Error> {
        let _job = self.begin_io();
        let old_master = **self.master.read().unwrap();
        let old_master_hash = Sha3_256::digest(&old_master);
        let new_master: Key<16> = rng.gen_key();
        let new_master_enc = encrypt_blob(&old_master, &MASTER_ROT_BLOB_IV, new_master.to_vec());

        {
            let mut journal = self.journal.lock().unwrap();
            journal.write_record(&JournalRecord::MasterRot { new_master_enc: new_master_enc.clone(), old_master_hash })?;
            let mut mount = MountState { header: &self.header, device: journal.device_mut(), master: old_master };
            crate::journal::replay(&JournalRecord::MasterRot { new_master_enc, old_master_hash }, &mut mount)?;
            journal.clear()?;
        }

        *self.master.write().unwrap() = Secret::new(new_master);

        let mut anchor = self.anchor.lock().unwrap();
        let mut slot = [0u8; 32];
        slot[..16].copy_from_slice(&new_master);
        anchor.write_slot(self.anchor_slot, &slot)?;
        Ok(())
    }

    fn commit(&self, record: JournalRecord) -> Result<(), Error> {
        let mut journal = self.journal.lock().unwrap();
        journal.write_record(&record)?;
        for (addr, data) in record_blocks(&record) {
            journal.device_mut().write_sector(addr, &data)?;
        }
        journal.clear()
    }

    /// Blocks until every in-flight operation observed at call time has
    /// finished, then drops the background evictor.
    pub fn close(self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::thread::yield_now();
        }
    }
}

/// Extracts `(addr, data)` pairs from a record this module commits
/// directly (outside the `PprfRot`/`MasterRot`/`PprfInit` replay paths,
/// which are applied via [`MountState`] instead).
fn record_blocks(record: &JournalRecord) -> Vec<(u64, [u8; SECTOR_SIZE])> {
    match record {
        JournalRecord::Generic { blocks } => blocks.clone(),
        JournalRecord::PprfPunct { pprf_blocks, fkt_top, key_table_block } => {
            let mut out = pprf_blocks.clone();
            out.push(*fkt_top);
            if let Some(block) = key_table_block {
                out.push(*block);
            }
            out
        }
        _ => Vec::new(),
    }
}
