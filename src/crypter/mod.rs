//! Stateless block-cipher operations the rest of the crate is built over:
//! the length-doubling PRG behind the PPRF, a general AES-CTR stream used to
//! encrypt key-table and journal sectors, and the AES-ECB wrapping step the
//! File-Key Table uses on its 32-byte subkey boundary.

mod ecb;
mod ivgen;
mod prg;
mod stream;

pub use ecb::{wrap_block_pair, wrap_blocks};
pub use ivgen::derive_sector_iv;
pub use prg::{prg_expand, PrgHalves};
pub use stream::AesCtrCrypter;

use crate::key::Key;

/// A stateful (key, IV)-parameterized cipher over a byte buffer in place.
/// AES-CTR is its own inverse, so one method serves both directions.
pub trait StatefulCrypter<const N: usize> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn apply_keystream(&self, key: &Key<N>, iv: &[u8; N], buf: &mut [u8]) -> Result<(), Self::Error>;
}
