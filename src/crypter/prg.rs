//! The GGM tree's length-doubling PRG: AES-CTR encrypting a fixed 32-byte
//! input block under a node's 16-byte key and the volume's fixed PRG IV.
//! Grounded in `prg_from_aes_ctr` from the original PPRF source, which
//! produces a 32-byte buffer by AES-CTR-encrypting a constant plaintext and
//! treats the two halves as the node's left/right children.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::key::Key;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Fixed plaintext the PRG expands; any constant works since only the
/// keystream derived from `(key, iv)` matters for pseudorandomness.
const PRG_INPUT: [u8; 32] = [0xA5; 32];

pub struct PrgHalves {
    pub left: [u8; 16],
    pub right: [u8; 16],
}

/// `G: 16B -> 32B`. `iv` is the volume-wide fixed PRG nonce (`PprfState::iv`).
pub fn prg_expand(key: &Key<16>, iv: &[u8; 16]) -> PrgHalves {
    let mut buf = PRG_INPUT;
    let mut cipher = Aes128Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(&mut buf);

    let mut left = [0u8; 16];
    let mut right = [0u8; 16];
    left.copy_from_slice(&buf[..16]);
    right.copy_from_slice(&buf[16..]);
    PrgHalves { left, right }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let key = [7u8; 16];
        let iv = [0u8; 16];
        let a = prg_expand(&key, &iv);
        let b = prg_expand(&key, &iv);
        assert_eq!(a.left, b.left);
        assert_eq!(a.right, b.right);
        assert_ne!(a.left, a.right);
    }

    #[test]
    fn iv_changes_output() {
        let key = [7u8; 16];
        let a = prg_expand(&key, &[0u8; 16]);
        let b = prg_expand(&key, &[1u8; 16]);
        assert_ne!(a.left, b.left);
    }
}
