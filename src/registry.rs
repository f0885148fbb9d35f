//! The in-process table of open volumes (design note 9): "the process-wide
//! list of open volumes and the registry text file are re-architected as a
//! device registry object created at start, destroyed at end, with explicit
//! handles — never as ambient singletons." The out-of-scope CLI owns the
//! on-disk registry text file; this module only fixes the record shape
//! (`name real_device virtual_device`, §6) and an in-memory table an
//! embedding application can use instead of a global.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: String,
    pub real_device: String,
    pub virtual_device: String,
}

impl fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.real_device, self.virtual_device)
    }
}

impl FromStr for RegistryEntry {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or(Error::CorruptHeader)?;
        let real_device = parts.next().ok_or(Error::CorruptHeader)?;
        let virtual_device = parts.next().ok_or(Error::CorruptHeader)?;
        Ok(Self {
            name: name.to_string(),
            real_device: real_device.to_string(),
            virtual_device: virtual_device.to_string(),
        })
    }
}

/// An explicit, ownable table of open volumes, keyed by instance name.
/// Created at process start and dropped at exit rather than held in a
/// global — the out-of-scope CLI is free to serialize it to its own text
/// file via `to_text`/`parse_text`, but nothing here reaches for ambient
/// state to do so.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_text(text: &str) -> Result<Self, Error> {
        let mut registry = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry = RegistryEntry::from_str(line)?;
            registry.entries.insert(entry.name.clone(), entry);
        }
        Ok(registry)
    }

    pub fn to_text(&self) -> String {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| format!("{}\n", self.entries[name]))
            .collect()
    }

    pub fn register(&mut self, entry: RegistryEntry) -> Result<(), Error> {
        if self.entries.contains_key(&entry.name) {
            return Err(Error::CorruptHeader);
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<RegistryEntry> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_text() {
        let mut registry = Registry::new();
        registry
            .register(RegistryEntry {
                name: "vault0".into(),
                real_device: "/dev/sdb1".into(),
                virtual_device: "/dev/mapper/vault0".into(),
            })
            .unwrap();

        let text = registry.to_text();
        let restored = Registry::parse_text(&text).unwrap();
        assert_eq!(restored.get("vault0"), registry.get("vault0"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = Registry::new();
        let entry = RegistryEntry { name: "a".into(), real_device: "b".into(), virtual_device: "c".into() };
        registry.register(entry.clone()).unwrap();
        assert!(registry.register(entry).is_err());
    }

    #[test]
    fn unregister_removes_entry() {
        let mut registry = Registry::new();
        registry
            .register(RegistryEntry { name: "a".into(), real_device: "b".into(), virtual_device: "c".into() })
            .unwrap();
        assert!(registry.unregister("a").is_some());
        assert!(registry.get("a").is_none());
    }
}
