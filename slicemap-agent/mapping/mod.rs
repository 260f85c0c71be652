//! Line-to-tile discovery
//!
//! [`engine::MappingEngine`] probes one cache line at a time and decides
//! ownership with [`evaluate::evaluate`]. Complete per-page results are
//! [`SliceMap`]s, persisted by [`cache::MappingCache`] and summed per tile by
//! [`aggregate::TileLineTally`].

pub mod aggregate;
pub mod cache;
pub mod engine;
pub mod evaluate;
pub mod order;

pub use aggregate::TileLineTally;
pub use cache::MappingCache;
pub use engine::{MappingEngine, ProbeState, ProbeStats};
pub use evaluate::{evaluate, ProbeOutcome, RejectReason, Verdict, OWNERSHIP_RATIO};
pub use order::PageOrder;

use crate::common::hugepage::{CACHE_LINE_SIZE, HUGE_PAGE_SIZE};

/// Cache lines in one 2MiB page
pub const LINES_PER_PAGE: usize = HUGE_PAGE_SIZE / CACHE_LINE_SIZE;

/// Marker for a line whose owner is not known yet
pub const UNMAPPED: i8 = -1;

/// Owning tile of every cache line of one 2MiB page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceMap {
    paddr: u64,
    lines: Vec<i8>,
}

impl SliceMap {
    pub fn new(paddr: u64) -> Self {
        Self {
            paddr,
            lines: vec![UNMAPPED; LINES_PER_PAGE],
        }
    }

    /// Wrap a persisted body, `None` unless it is exactly one page of entries
    pub fn from_bytes(paddr: u64, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != LINES_PER_PAGE {
            return None;
        }
        Some(Self {
            paddr,
            lines: bytes.iter().map(|&b| b as i8).collect(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.lines.iter().map(|&l| l as u8).collect()
    }

    pub fn paddr(&self) -> u64 {
        self.paddr
    }

    pub fn set(&mut self, line: usize, tile: usize) {
        self.lines[line] = i8::try_from(tile).unwrap_or(UNMAPPED);
    }

    /// Raw entry, `UNMAPPED` or a tile number
    pub fn get(&self, line: usize) -> i8 {
        self.lines[line]
    }

    pub fn lines(&self) -> &[i8] {
        &self.lines
    }

    pub fn unmapped_lines(&self) -> usize {
        self.lines.iter().filter(|&&l| l == UNMAPPED).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unmapped_lines() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_geometry() {
        assert_eq!(LINES_PER_PAGE, 32768);
    }

    #[test]
    fn test_new_map_is_unmapped() {
        let map = SliceMap::new(0x4000_0000);
        assert_eq!(map.unmapped_lines(), LINES_PER_PAGE);
        assert!(!map.is_complete());
        assert_eq!(map.get(100), UNMAPPED);
    }

    #[test]
    fn test_set_and_complete() {
        let mut map = SliceMap::new(0x20_0000);
        for line in 0..LINES_PER_PAGE {
            map.set(line, line % 28);
        }
        assert!(map.is_complete());
        assert_eq!(map.get(29), 1);
        assert_eq!(map.to_bytes()[27], 27);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(SliceMap::from_bytes(0, &[0u8; 100]).is_none());
        let map = SliceMap::from_bytes(0, &[0xffu8; LINES_PER_PAGE]).unwrap();
        assert_eq!(map.get(0), UNMAPPED);
    }
}
