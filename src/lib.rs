//! A puncturable-PRF key hierarchy for per-file secure deletion on block
//! storage: evaluating a file's key costs one PRF walk, forgetting it
//! costs one puncture, and both are cheap enough to run on every unlink.
//!
//! The module layout follows the system it replaces component for
//! component:
//!
//! - [`pprf`] — C1, the GGM-tree puncturable PRF itself.
//! - [`keytable`] — C2, the per-inode file-key sectors the PRF wraps.
//! - [`fkt`] — C3, the two-level table that lets a rotation rewrap the
//!   PPRF arena's own on-disk sectors in one small write.
//! - [`journal`] — C4, the fixed write-ahead region and its replay rules.
//! - [`rotation`] — C5, the refresh-interval and arena-pressure policies
//!   that decide *whether* to rotate.
//! - [`anchor`] — C6, the root-of-trust interface the master key is
//!   sealed behind.
//! - [`layout`] — C7, the on-disk superblock and region geometry.
//! - [`device`] — the orchestration layer wiring all of the above into
//!   `Volume::{create, open, lookup, rekey, unlink, rotate_pprf,
//!   rotate_master}`.
//!
//! [`cache`], [`config`], [`registry`], [`crypter`], [`key`], [`secret`],
//! [`hasher`], [`io`], and [`error`] are the ambient stack: the map
//! cache, on-disk/TOML configuration, the open-volume table, the block
//! ciphers and PRG, key material types, zeroizing secrets, the hash
//! abstraction, sector I/O, and the crate's error type.

pub mod anchor;
pub mod cache;
pub mod config;
pub mod crypter;
pub mod device;
pub mod error;
pub mod fkt;
pub mod hasher;
pub mod io;
pub mod journal;
pub mod key;
pub mod keytable;
pub mod layout;
pub mod pprf;
pub mod registry;
pub mod rotation;
pub mod secret;

pub use device::Volume;
pub use error::{Error, Result};
