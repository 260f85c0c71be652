// Per-tile line counts over a set of slice maps

use crate::mapping::SliceMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLineTally {
    counts: Vec<u64>,
    unattributed: u64,
}

impl TileLineTally {
    pub fn new(tile_count: usize) -> Self {
        Self {
            counts: vec![0; tile_count],
            unattributed: 0,
        }
    }

    /// Count the first `lines` entries of a map
    ///
    /// Entries outside the tile range (possible in loaded files) are kept
    /// apart instead of being indexed.
    pub fn add_lines(&mut self, map: &SliceMap, lines: usize) {
        for &entry in map.lines().iter().take(lines) {
            match usize::try_from(entry).ok().and_then(|t| self.counts.get_mut(t)) {
                Some(count) => *count += 1,
                None => self.unattributed += 1,
            }
        }
    }

    pub fn add_page(&mut self, map: &SliceMap) {
        self.add_lines(map, map.lines().len());
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn unattributed(&self) -> u64 {
        self.unattributed
    }

    /// Lines attributed to a tile
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Log the tally and compare it with the expected number of lines
    ///
    /// A mismatch is reported with a single warning and never fails the run.
    pub fn reconcile(&self, expected: u64) -> bool {
        tracing::info!(
            "LINES_BY_CHA {}",
            self.counts
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );
        tracing::info!(
            "Accounted for {} lines, expected {} lines",
            self.total(),
            expected
        );

        let matches = self.total() == expected;
        if !matches {
            tracing::warn!(
                "Tally mismatch: {} lines attributed, {} unattributed, {} expected",
                self.total(),
                self.unattributed,
                expected
            );
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::LINES_PER_PAGE;

    fn striped_map(tiles: usize) -> SliceMap {
        let mut map = SliceMap::new(0x20_0000);
        for line in 0..LINES_PER_PAGE {
            map.set(line, line % tiles);
        }
        map
    }

    #[test]
    fn test_full_and_partial_pages() {
        let mut tally = TileLineTally::new(4);
        tally.add_page(&striped_map(4));
        tally.add_lines(&striped_map(4), 6);

        assert_eq!(tally.counts(), &[8194, 8194, 8193, 8193]);
        assert_eq!(tally.total(), LINES_PER_PAGE as u64 + 6);
        assert!(tally.reconcile(LINES_PER_PAGE as u64 + 6));
    }

    #[test]
    fn test_out_of_range_entries_unattributed() {
        let mut bytes = vec![1u8; LINES_PER_PAGE];
        bytes[0] = 0xff;
        bytes[1] = 9;
        let map = SliceMap::from_bytes(0x20_0000, &bytes).unwrap();

        let mut tally = TileLineTally::new(4);
        tally.add_page(&map);

        assert_eq!(tally.unattributed(), 2);
        assert_eq!(tally.counts()[1], LINES_PER_PAGE as u64 - 2);
        assert!(!tally.reconcile(LINES_PER_PAGE as u64));
    }

    #[test]
    fn test_empty_tally_reconciles_to_zero() {
        let tally = TileLineTally::new(28);
        assert!(tally.reconcile(0));
        assert!(!tally.reconcile(1));
    }
}
