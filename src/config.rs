//! Allocator tuning.
//!
//! Both knobs can be set from the environment for the process-wide instance:
//! - `BLOCKALLOC_MIN_BLOCK_SIZE`: smallest payload a block can have (default 16).
//! - `BLOCKALLOC_RETAINED_REGIONS`: how many regions are kept mapped before a
//!   fully free one is handed back to the OS (default 1024).

use std::env;

use crate::utils::{WORD_SIZE, align};

pub const DEFAULT_MIN_BLOCK_SIZE: usize = 16;
pub const DEFAULT_RETAINED_REGIONS: usize = 1024;

pub const MIN_BLOCK_SIZE_ENV: &str = "BLOCKALLOC_MIN_BLOCK_SIZE";
pub const RETAINED_REGIONS_ENV: &str = "BLOCKALLOC_RETAINED_REGIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Requests are rounded up to at least this many payload bytes, and a split
    /// only happens when the leftover can hold a header plus this many bytes.
    pub min_block_size: usize,
    /// A fully free region is unmapped only while more than this many regions
    /// are live. Below it the region stays around as reusable free space.
    pub retained_regions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
            retained_regions: DEFAULT_RETAINED_REGIONS,
        }
    }
}

impl Config {
    /// Defaults overridden by whatever parses in the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<usize>().ok());

        let mut config = Self::default();
        if let Some(size) = parse(MIN_BLOCK_SIZE_ENV) {
            config = config.with_min_block_size(size);
        }
        if let Some(regions) = parse(RETAINED_REGIONS_ENV) {
            config = config.with_retained_regions(regions);
        }
        config
    }

    /// Sets the minimum block size, rounded up to a whole machine word.
    #[must_use]
    pub fn with_min_block_size(mut self, size: usize) -> Self {
        self.min_block_size = align(size.clamp(WORD_SIZE, usize::MAX / 2), WORD_SIZE);
        self
    }

    #[must_use]
    pub fn with_retained_regions(mut self, regions: usize) -> Self {
        self.retained_regions = regions;
        self
    }
}
