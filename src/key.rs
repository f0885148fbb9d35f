//! Fixed-size key material and the generators that produce it.

use rand::RngCore;

/// A raw key of `N` bytes. `N` is 16 for every key this crate handles —
/// PPRF node keys, AES-CTR keys, and FKT wrapping keys are all single AES
/// blocks.
pub type Key<const N: usize> = [u8; N];

/// Produces fresh, uniformly random key material.
pub trait KeyGenerator<const N: usize> {
    fn gen_key(&mut self) -> Key<N>;
}

impl<R: RngCore, const N: usize> KeyGenerator<N> for R {
    fn gen_key(&mut self) -> Key<N> {
        let mut buf = [0u8; N];
        self.fill_bytes(&mut buf);
        buf
    }
}
