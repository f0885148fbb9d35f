use sha3::{Digest, Sha3_256 as Sha3_256Impl};

use super::Hasher;

pub const SHA3_256_MD_SIZE: usize = 32;

pub struct Sha3_256(Sha3_256Impl);

impl Hasher<SHA3_256_MD_SIZE> for Sha3_256 {
    fn new() -> Self {
        Self(Sha3_256Impl::new())
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self) -> [u8; SHA3_256_MD_SIZE] {
        self.0.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(Sha3_256::digest(b"abcd"), Sha3_256::digest(b"abcd"));
        assert_ne!(Sha3_256::digest(b"abcd"), Sha3_256::digest(b"abcde"));
    }
}
