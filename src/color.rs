//! Stable color ids for titles, series names and type names

use std::hash::Hasher;

/// Number of distinct color ids handed out
pub const COLOR_PALETTE_SIZE: u32 = 30;

/// Map a string to a color id in `0..COLOR_PALETTE_SIZE`
///
/// FNV-1a keeps the mapping stable across runs and platforms, so the same
/// title gets the same color in every trace.
pub fn color_id_for(name: &str) -> u32 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(name.as_bytes());
    (hasher.finish() % u64::from(COLOR_PALETTE_SIZE)) as u32
}
