//! Volume-creation parameters loaded from a TOML file via the `config`
//! crate. The out-of-scope CLI would load one of these and hand it to
//! [`crate::layout::Layout::for_device`] / [`crate::device::Volume::create`].

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::layout::DEFAULT_BYTES_PER_INODE;
use crate::rotation::KEY_GROWTH_MULT;

/// `HOLEPUNCH_REFRESH_INTERVAL` in the original — punctures between forced
/// PPRF rotations.
pub const DEFAULT_REFRESH_INTERVAL: u32 = 64;
pub const DEFAULT_PPRF_DEPTH: u8 = 32;
pub const DEFAULT_MAP_CACHE_CAPACITY_PER_BUCKET: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub bytes_per_inode_ratio: u64,
    pub pprf_depth: u8,
    pub refresh_interval: u32,
    pub key_growth_mult: u32,
    pub map_cache_capacity_per_bucket: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            bytes_per_inode_ratio: DEFAULT_BYTES_PER_INODE,
            pprf_depth: DEFAULT_PPRF_DEPTH,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            key_growth_mult: KEY_GROWTH_MULT,
            map_cache_capacity_per_bucket: DEFAULT_MAP_CACHE_CAPACITY_PER_BUCKET,
        }
    }
}

impl VolumeConfig {
    /// Loads overrides from `path` (TOML); a missing file is not an error,
    /// matching `config`'s optional-source convention. Fields absent from
    /// the file fall back to `Default` via `#[serde(default)]`.
    pub fn load(path: &str) -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .build()
            .map_err(|_| Error::CorruptHeader)?;

        settings.try_deserialize().map_err(|_| Error::CorruptHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = VolumeConfig::default();
        assert_eq!(cfg.refresh_interval, DEFAULT_REFRESH_INTERVAL);
        assert_eq!(cfg.key_growth_mult, KEY_GROWTH_MULT);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = VolumeConfig::load("/nonexistent/path/does-not-exist").unwrap();
        assert_eq!(cfg.pprf_depth, DEFAULT_PPRF_DEPTH);
    }
}
