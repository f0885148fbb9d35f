//! General-purpose AES-CTR stream cipher used to encrypt key-table, FKT,
//! and journal sectors under their respective wrapping keys.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use std::convert::Infallible;

use super::StatefulCrypter;
use crate::key::Key;

type Aes128Ctr = Ctr128BE<Aes128>;

#[derive(Default, Clone, Copy)]
pub struct AesCtrCrypter;

impl StatefulCrypter<16> for AesCtrCrypter {
    type Error = Infallible;

    fn apply_keystream(&self, key: &Key<16>, iv: &[u8; 16], buf: &mut [u8]) -> Result<(), Self::Error> {
        let mut cipher = Aes128Ctr::new(key.into(), iv.into());
        cipher.apply_keystream(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let crypter = AesCtrCrypter;
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let mut buf = b"hello sector data adjusted".to_vec();
        let plain = buf.clone();
        crypter.apply_keystream(&key, &iv, &mut buf).unwrap();
        assert_ne!(buf, plain);
        crypter.apply_keystream(&key, &iv, &mut buf).unwrap();
        assert_eq!(buf, plain);
    }
}
