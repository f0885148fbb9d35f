//! Hash function abstraction used to digest and verify the master key
//! before an `AnchorUnavailable`/`WrongPassword` decision is made.

mod sha3impl;

pub use sha3impl::Sha3_256;

pub trait Hasher<const N: usize> {
    fn new() -> Self;
    fn update(&mut self, data: &[u8]);
    fn finish(self) -> [u8; N];

    fn digest(data: &[u8]) -> [u8; N]
    where
        Self: Sized,
    {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finish()
    }
}
