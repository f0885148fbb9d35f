//! Full-stack scenarios against a real temp-file-backed device: the kind
//! of exercise a block-storage layer driving this crate would run, not
//! just the unit-level round-trips each module already covers.

use std::fs::OpenOptions;
use std::path::Path;

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use pprfvault::anchor::FileAnchor;
use pprfvault::config::VolumeConfig;
use pprfvault::device::Volume;
use pprfvault::error::Error;
use pprfvault::io::SECTOR_SIZE;
use pprfvault::secret::Secret;

const DEVICE_SECTORS: u64 = 1 << 14;

fn cfg() -> VolumeConfig {
    VolumeConfig {
        bytes_per_inode_ratio: 16384,
        pprf_depth: 8,
        refresh_interval: 3,
        key_growth_mult: 2,
        map_cache_capacity_per_bucket: 8,
    }
}

fn owner() -> Secret<Vec<u8>> {
    Secret::new(b"owner-auth".to_vec())
}

fn open_existing(path: &Path) -> std::fs::File {
    OpenOptions::new().read(true).write(true).open(path).unwrap()
}

fn create_backing(path: &Path) -> std::fs::File {
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path).unwrap();
    file.set_len(DEVICE_SECTORS * SECTOR_SIZE as u64).unwrap();
    file
}

#[test]
fn lookup_is_stable_across_calls_and_cache_hits() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    let file = create_backing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let volume = Volume::create(file, DEVICE_SECTORS, &cfg(), &owner(), 0, anchor, &mut rng).unwrap();

    let first = volume.lookup(5).unwrap();
    let second = volume.lookup(5).unwrap(); // served from the map cache
    assert_eq!(first, second);

    let other = volume.lookup(6).unwrap();
    assert_ne!(first, other);

    volume.close();
}

#[test]
fn rekey_changes_the_key_without_touching_the_tag() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    let file = create_backing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let volume = Volume::create(file, DEVICE_SECTORS, &cfg(), &owner(), 0, anchor, &mut rng).unwrap();

    let before = volume.lookup(10).unwrap();
    volume.rekey(10, &mut rng).unwrap();
    let after = volume.lookup(10).unwrap();

    assert_ne!(before.0, after.0, "rekey must produce a fresh content key");
    assert_eq!(before.1, after.1, "the per-inode IV is independent of the key-table wrap key");

    volume.close();
}

#[test]
fn unlink_forgets_the_old_key_and_reopening_preserves_the_new_one() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    let file = create_backing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let volume = Volume::create(file, DEVICE_SECTORS, &cfg(), &owner(), 0, anchor, &mut rng).unwrap();

    let before = volume.lookup(42).unwrap();
    volume.unlink(42, &mut rng).unwrap();
    let after = volume.lookup(42).unwrap();
    assert_ne!(before, after);
    volume.close();

    // Remount from scratch: the new key must be exactly what unlink wrote,
    // not an artifact of the in-memory cache.
    let file = open_existing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let reopened = Volume::open(file, &owner(), 0, anchor, &cfg()).unwrap();
    let reread = reopened.lookup(42).unwrap();
    assert_eq!(after, reread);
    reopened.close();
}

#[test]
fn repeated_unlinks_trigger_an_automatic_pprf_rotation_and_stay_correct() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");
    let mut rng = ChaCha8Rng::seed_from_u64(4);

    let file = create_backing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let volume = Volume::create(file, DEVICE_SECTORS, &cfg(), &owner(), 0, anchor, &mut rng).unwrap();

    // refresh_interval is 3, so this run crosses at least one rotation.
    let mut last = Vec::new();
    for inode in 0..10u64 {
        volume.unlink(inode, &mut rng).unwrap();
        last.push(volume.lookup(inode).unwrap());
    }
    volume.close();

    let file = open_existing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let reopened = Volume::open(file, &owner(), 0, anchor, &cfg()).unwrap();
    for (inode, expected) in last.into_iter().enumerate() {
        assert_eq!(reopened.lookup(inode as u64).unwrap(), expected);
    }
    reopened.close();
}

#[test]
fn master_rotation_survives_a_remount_through_the_anchor() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    let file = create_backing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let volume = Volume::create(file, DEVICE_SECTORS, &cfg(), &owner(), 0, anchor, &mut rng).unwrap();

    let before = volume.lookup(1).unwrap();
    volume.rotate_master(&mut rng).unwrap();
    let after = volume.lookup(1).unwrap();
    assert_eq!(before, after, "master rotation must not change file-content keys");
    volume.close();

    let file = open_existing(&device_path);
    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let reopened = Volume::open(file, &owner(), 0, anchor, &cfg()).unwrap();
    assert_eq!(reopened.lookup(1).unwrap(), before);
    reopened.rekey(2, &mut rng).unwrap(); // still writable under the new master
    reopened.close();
}

#[test]
fn open_rejects_a_device_that_was_never_formatted() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("vault.img");
    let anchor_path = dir.path().join("vault.anchor");

    let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&device_path).unwrap();
    file.set_len(DEVICE_SECTORS * SECTOR_SIZE as u64).unwrap();

    let anchor = FileAnchor::open(&anchor_path).unwrap();
    let err = Volume::open(file, &owner(), 0, anchor, &cfg()).unwrap_err();
    assert!(matches!(err, Error::CorruptHeader));
}
