//! C6: the root-of-trust anchor. The sealed-hardware transport itself is
//! an external collaborator (§1); this crate only fixes the interface and
//! ships a file-backed test double standing in for it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::secret::Secret;

pub trait Anchor {
    fn read_slot(&mut self, index: u64) -> Result<[u8; 32], Error>;
    fn write_slot(&mut self, index: u64, data: &[u8; 32]) -> Result<(), Error>;
    fn define_slot(&mut self, index: u64, owner_auth: &Secret<Vec<u8>>) -> Result<(), Error>;
}

#[derive(Default, Serialize, Deserialize)]
struct FileAnchorContents {
    slots: HashMap<u64, [u8; 32]>,
}

/// Persists slots to a plain file under `owner_auth` gating. Stands in for
/// sealed NVRAM in tests and the demo binary; never use outside those.
pub struct FileAnchor {
    path: PathBuf,
    owner_auth: Option<Secret<Vec<u8>>>,
    contents: FileAnchorContents,
}

impl FileAnchor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let contents = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)?
        } else {
            FileAnchorContents::default()
        };
        Ok(Self { path, owner_auth: None, contents })
    }

    fn persist(&self) -> Result<(), Error> {
        let bytes = bincode::serialize(&self.contents)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn check_auth(&self) -> Result<(), Error> {
        if self.owner_auth.is_some() {
            Ok(())
        } else {
            Err(Error::AnchorUnavailable)
        }
    }
}

impl Anchor for FileAnchor {
    fn read_slot(&mut self, index: u64) -> Result<[u8; 32], Error> {
        self.contents.slots.get(&index).copied().ok_or(Error::AnchorUnavailable)
    }

    fn write_slot(&mut self, index: u64, data: &[u8; 32]) -> Result<(), Error> {
        self.check_auth()?;
        self.contents.slots.insert(index, *data);
        self.persist()
    }

    fn define_slot(&mut self, index: u64, owner_auth: &Secret<Vec<u8>>) -> Result<(), Error> {
        self.owner_auth = Some(owner_auth.clone());
        self.contents.slots.entry(index).or_insert([0u8; 32]);
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_requires_owner_auth() {
        let dir = tempdir().unwrap();
        let mut anchor = FileAnchor::open(dir.path().join("anchor")).unwrap();
        let err = anchor.write_slot(0, &[1u8; 32]).unwrap_err();
        assert!(matches!(err, Error::AnchorUnavailable));
    }

    #[test]
    fn roundtrips_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anchor");
        let mut anchor = FileAnchor::open(&path).unwrap();
        anchor.define_slot(3, &Secret::new(b"owner".to_vec())).unwrap();
        anchor.write_slot(3, &[5u8; 32]).unwrap();

        let mut reopened = FileAnchor::open(&path).unwrap();
        assert_eq!(reopened.read_slot(3).unwrap(), [5u8; 32]);
    }
}
