use std::io;

use super::{BlockDevice, SECTOR_SIZE};

/// Counts sector reads/writes performed through an inner [`BlockDevice`].
/// Same delegate-and-count shape as a counting I/O wrapper, narrowed to
/// whole-sector operations since that is the only I/O surface this crate
/// drives.
pub struct StatIo<T> {
    inner: T,
    read_count: u64,
    write_count: u64,
}

impl<T> StatIo<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, read_count: 0, write_count: 0 }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }
}

impl<T: BlockDevice> BlockDevice for StatIo<T> {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        self.inner.read_sector(sector, buf)?;
        self.read_count += 1;
        Ok(())
    }

    fn write_sector(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        self.inner.write_sector(sector, buf)?;
        self.write_count += 1;
        Ok(())
    }
}
