//! C2: per-inode file-key sectors. A sector packs [`FILE_KEYS_PER_SECTOR`]
//! inode keys under one PPRF-derived wrapping key; unlinking any one inode
//! rotates the whole sector's tag so all prior ciphertext for every inode
//! it holds stops decrypting under the new wrapping key (§4.2's unlink
//! rewraps the sector, not just the entry).

use serde::{Deserialize, Serialize};

use crate::crypter::{derive_sector_iv, AesCtrCrypter, StatefulCrypter};
use crate::error::Error;
use crate::io::SECTOR_SIZE;
use crate::key::Key;
use crate::layout::{FILE_KEYS_PER_SECTOR, FILE_KEY_SECTOR_HEADER_LEN, HP_MAGIC1, HP_MAGIC2};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct FileKey {
    pub key: Key<16>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FileKeySector {
    pub tag: u64,
    pub magic1: u64,
    pub magic2: u64,
    pub padding: u64,
    pub entries: Vec<FileKey>,
}

impl FileKeySector {
    pub fn fresh<R: crate::key::KeyGenerator<16>>(tag: u64, rng: &mut R) -> Self {
        let entries = (0..FILE_KEYS_PER_SECTOR)
            .map(|_| FileKey { key: rng.gen_key() })
            .collect();
        Self { tag, magic1: HP_MAGIC1, magic2: HP_MAGIC2, padding: 0, entries }
    }

    pub fn is_valid(&self) -> bool {
        self.magic1 == HP_MAGIC1 && self.magic2 == HP_MAGIC2
    }

    /// Packs the sector to its exact on-disk layout: `{tag, magic1, magic2,
    /// padding}` (32 bytes) then `entries`. The cleartext-header convention
    /// (first AES block unencrypted) is handled by the caller, which
    /// encrypts only `buf[16..]`.
    pub fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..8].copy_from_slice(&self.tag.to_le_bytes());
        buf[8..16].copy_from_slice(&self.magic1.to_le_bytes());
        buf[16..24].copy_from_slice(&self.magic2.to_le_bytes());
        buf[24..32].copy_from_slice(&self.padding.to_le_bytes());
        for (i, entry) in self.entries.iter().enumerate() {
            let off = FILE_KEY_SECTOR_HEADER_LEN + i * 16;
            buf[off..off + 16].copy_from_slice(&entry.key);
        }
        buf
    }

    pub fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let tag = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let magic1 = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let magic2 = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let padding = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let entries = (0..FILE_KEYS_PER_SECTOR)
            .map(|i| {
                let off = FILE_KEY_SECTOR_HEADER_LEN + i * 16;
                let mut key = [0u8; 16];
                key.copy_from_slice(&buf[off..off + 16]);
                FileKey { key }
            })
            .collect();
        Self { tag, magic1, magic2, padding, entries }
    }
}

/// `sector = inode / N`, `slot = inode mod N`.
pub fn locate(inode: u64) -> (u64, usize) {
    (inode / FILE_KEYS_PER_SECTOR as u64, (inode % FILE_KEYS_PER_SECTOR as u64) as usize)
}

/// Encrypts everything but the first AES block (the cleartext `tag` +
/// `magic1` pair, which must be readable before the sector's wrapping key
/// is even known).
pub fn encrypt_sector(sector: &FileKeySector, wrap_key: &Key<16>, iv_key: &Key<16>) -> [u8; SECTOR_SIZE] {
    let mut buf = sector.to_bytes();
    let iv = derive_sector_iv(iv_key, sector.tag);
    AesCtrCrypter.apply_keystream(wrap_key, &iv, &mut buf[16..]).expect("aes-ctr is infallible");
    buf
}

pub fn decrypt_sector(raw: &[u8; SECTOR_SIZE], wrap_key: &Key<16>, iv_key: &Key<16>) -> Result<FileKeySector, Error> {
    let mut buf = *raw;
    let tag = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let iv = derive_sector_iv(iv_key, tag);
    AesCtrCrypter.apply_keystream(wrap_key, &iv, &mut buf[16..]).expect("aes-ctr is infallible");
    Ok(FileKeySector::from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn locate_matches_sector_and_slot() {
        let n = FILE_KEYS_PER_SECTOR as u64;
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(n - 1), (0, (n - 1) as usize));
        assert_eq!(locate(n), (1, 0));
        assert_eq!(locate(n + 5), (1, 5));
    }

    #[test]
    fn encrypt_decrypt_roundtrip_and_tag_stays_clear() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sector = FileKeySector::fresh(42, &mut rng);
        let wrap_key = [5u8; 16];
        let iv_key = [6u8; 16];

        let raw = encrypt_sector(&sector, &wrap_key, &iv_key);
        assert_eq!(u64::from_le_bytes(raw[0..8].try_into().unwrap()), 42);

        let restored = decrypt_sector(&raw, &wrap_key, &iv_key).unwrap();
        assert!(restored.is_valid());
        assert_eq!(restored.entries, sector.entries);
    }

    #[test]
    fn wrong_wrap_key_fails_magic_check() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let sector = FileKeySector::fresh(7, &mut rng);
        let raw = encrypt_sector(&sector, &[1u8; 16], &[2u8; 16]);
        let restored = decrypt_sector(&raw, &[9u8; 16], &[2u8; 16]).unwrap();
        assert!(!restored.is_valid());
    }
}
