//! AES-ECB wrapping for the File-Key Table's 32-byte subkey boundary: each
//! wrapped entry is exactly two AES blocks, ECB because FKT entries are
//! independently addressable fixed-size keys rather than a byte stream.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::key::Key;

/// Encrypts (or decrypts) a buffer in place as independent AES blocks under
/// `key` (ECB: no chaining between blocks). `buf.len()` must be a multiple
/// of 16.
pub fn wrap_blocks(key: &Key<16>, buf: &mut [u8], encrypt: bool) {
    debug_assert_eq!(buf.len() % 16, 0);
    let cipher = Aes128::new(key.into());
    for block in buf.chunks_exact_mut(16) {
        let block_ref = aes::Block::from_mut_slice(block);
        if encrypt {
            cipher.encrypt_block(block_ref);
        } else {
            cipher.decrypt_block(block_ref);
        }
    }
}

/// Encrypts (or decrypts) a 32-byte buffer in place as two independent AES
/// blocks under `key` — the FKT's subkey-boundary wrapping unit.
pub fn wrap_block_pair(key: &Key<16>, block: &mut [u8; 32], encrypt: bool) {
    wrap_blocks(key, block, encrypt);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [9u8; 16];
        let mut buf = [3u8; 32];
        let plain = buf;
        wrap_block_pair(&key, &mut buf, true);
        assert_ne!(buf, plain);
        wrap_block_pair(&key, &mut buf, false);
        assert_eq!(buf, plain);
    }
}
