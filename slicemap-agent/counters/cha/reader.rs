// Raw CHA counter reads and wraparound-aware deltas

use slicemap_raw::COUNTERS_PER_TILE;

use crate::common::arch::HardwareProfile;
use crate::common::msr::RegisterChannel;
use crate::error::{Result, SliceMapError};

/// Difference of two counter readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub value: u64,
    /// The counter passed through zero between the two readings
    pub wrapped: bool,
}

/// `end - start` modulo the counter width
///
/// Both readings are masked to `width_bits` first. A single wrap is assumed
/// when `end < start`.
pub fn corrected_delta(end: u64, start: u64, width_bits: u32) -> CounterDelta {
    let mask = if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    };
    let end = end & mask;
    let start = start & mask;

    CounterDelta {
        value: end.wrapping_sub(start) & mask,
        wrapped: end < start,
    }
}

pub struct CounterReader<'a> {
    profile: &'a HardwareProfile,
    channel: &'a dyn RegisterChannel,
}

impl<'a> CounterReader<'a> {
    pub fn new(profile: &'a HardwareProfile, channel: &'a dyn RegisterChannel) -> Self {
        Self { profile, channel }
    }

    /// Uncorrected value of one counter
    pub fn read_counter(&self, tile: usize, counter: usize) -> Result<u64> {
        if tile >= self.profile.tile_count {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "tile {tile} outside 0..{}",
                self.profile.tile_count
            )));
        }
        if counter >= COUNTERS_PER_TILE {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "counter {counter} outside 0..{COUNTERS_PER_TILE}"
            )));
        }
        self.channel
            .read(self.profile.counter_address(tile, counter))
    }

    /// Read `counter` of every tile into `out`, reusing its allocation
    pub fn snapshot(&self, counter: usize, out: &mut Vec<u64>) -> Result<()> {
        out.clear();
        for tile in 0..self.profile.tile_count {
            out.push(self.read_counter(tile, counter)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::SimulatedUncore;

    #[test]
    fn test_delta_without_wrap() {
        assert_eq!(
            corrected_delta(1500, 500, 48),
            CounterDelta {
                value: 1000,
                wrapped: false
            }
        );
        assert_eq!(corrected_delta(7, 7, 48).value, 0);
    }

    #[test]
    fn test_delta_across_wrap() {
        let start = (1u64 << 48) - 5;
        assert_eq!(
            corrected_delta(3, start, 48),
            CounterDelta {
                value: 8,
                wrapped: true
            }
        );
    }

    #[test]
    fn test_delta_ignores_bits_above_width() {
        let delta = corrected_delta((1 << 50) | 10, 4, 48);
        assert_eq!(delta.value, 6);
        assert!(!delta.wrapped);
        assert_eq!(corrected_delta(1, u64::MAX, 64).value, 2);
    }

    fn xorshift(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    #[test]
    fn test_delta_random_pairs() {
        let mask = (1u64 << 48) - 1;
        let mut state = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..100_000 {
            let a = xorshift(&mut state) & mask;
            let b = xorshift(&mut state) & mask;
            let (start, end) = (a.min(b), a.max(b));

            let forward = corrected_delta(end, start, 48);
            assert_eq!(forward.value, end - start);
            assert!(!forward.wrapped);

            let reversed = corrected_delta(start, end, 48);
            if start != end {
                assert_eq!(reversed.value, (start + (1 << 48)) - end);
                assert!(reversed.wrapped);
            }
        }
    }

    #[test]
    fn test_read_counter_bounds() {
        let uncore = SimulatedUncore::new(4, |_, _| 0);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let reader = CounterReader::new(&profile, &channel);

        uncore.set_register(profile.counter_address(3, 2), 42);
        assert_eq!(reader.read_counter(3, 2).unwrap(), 42);
        assert!(reader.read_counter(4, 0).is_err());
        assert!(reader.read_counter(0, 4).is_err());
    }

    #[test]
    fn test_snapshot_reuses_buffer() {
        let uncore = SimulatedUncore::new(3, |_, _| 0);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let reader = CounterReader::new(&profile, &channel);
        for tile in 0..3 {
            uncore.set_register(profile.counter_address(tile, 1), 10 * tile as u64);
        }

        let mut buffer = vec![99; 8];
        reader.snapshot(1, &mut buffer).unwrap();
        assert_eq!(buffer, vec![0, 10, 20]);
    }
}
