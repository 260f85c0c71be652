// Probe state machine: snapshot, stress, snapshot, evaluate, retry or back off

use std::collections::HashMap;

use crate::common::arch::HardwareProfile;
use crate::common::hugepage::LineStressor;
use crate::common::msr::RegisterChannel;
use crate::config::RetryPolicy;
use crate::counters::cha::{corrected_delta, CounterReader};
use crate::error::{Result, SliceMapError};
use crate::mapping::evaluate::{evaluate, RejectReason, Verdict};
use crate::mapping::{SliceMap, LINES_PER_PAGE};

const PROGRESS_INTERVAL: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Snapshot0,
    Stress,
    Snapshot1,
    Evaluate,
    Accept(usize),
    Retry,
    Backoff,
    Fatal,
}

/// Counts accumulated over every line probed by one engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeStats {
    pub lines_mapped: u64,
    pub attempts: u64,
    pub rejections: HashMap<&'static str, u64>,
    pub backoffs: u64,
    pub counter_wraps: u64,
}

impl ProbeStats {
    pub fn rejected(&self) -> u64 {
        self.rejections.values().sum()
    }

    fn record_rejection(&mut self, reason: RejectReason) {
        *self.rejections.entry(reason.label()).or_insert(0) += 1;
    }
}

/// Finds the owning tile of cache lines on the socket of the core under test
pub struct MappingEngine<'a> {
    profile: &'a HardwareProfile,
    reader: CounterReader<'a>,
    probe_counter: usize,
    repetitions: u32,
    retry: RetryPolicy,
    before: Vec<u64>,
    after: Vec<u64>,
    deltas: Vec<u64>,
    state: ProbeState,
    stats: ProbeStats,
}

impl<'a> MappingEngine<'a> {
    pub fn new(
        profile: &'a HardwareProfile,
        channel: &'a dyn RegisterChannel,
        probe_counter: usize,
        repetitions: u32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        retry.validate()?;
        if repetitions == 0 {
            return Err(SliceMapError::InvalidConfiguration(
                "repetitions must be positive".to_string(),
            ));
        }

        let tiles = profile.tile_count;
        Ok(Self {
            profile,
            reader: CounterReader::new(profile, channel),
            probe_counter,
            repetitions,
            retry,
            before: Vec::with_capacity(tiles),
            after: Vec::with_capacity(tiles),
            deltas: Vec::with_capacity(tiles),
            state: ProbeState::Idle,
            stats: ProbeStats::default(),
        })
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    /// Owning tile of one line, retrying noisy probes within the retry policy
    pub fn map_line(
        &mut self,
        stressor: &mut dyn LineStressor,
        page: usize,
        line: usize,
        paddr: u64,
    ) -> Result<usize> {
        let mut attempts: u32 = 0;
        let mut backoffs: u32 = 0;
        self.state = ProbeState::Idle;

        loop {
            self.state = match self.state {
                ProbeState::Idle | ProbeState::Retry => ProbeState::Snapshot0,
                ProbeState::Snapshot0 => {
                    self.reader.snapshot(self.probe_counter, &mut self.before)?;
                    ProbeState::Stress
                }
                ProbeState::Stress => {
                    stressor.stress(page, line, self.repetitions)?;
                    ProbeState::Snapshot1
                }
                ProbeState::Snapshot1 => {
                    self.reader.snapshot(self.probe_counter, &mut self.after)?;
                    ProbeState::Evaluate
                }
                ProbeState::Evaluate => {
                    attempts += 1;
                    self.stats.attempts += 1;
                    self.compute_deltas(paddr, line);

                    let outcome = evaluate(&self.deltas, self.repetitions);
                    tracing::debug!(
                        "line {} attempt {}: peak {:.3} floor {:.3} noise {:.3}",
                        line,
                        attempts,
                        outcome.peak_ratio,
                        outcome.floor_ratio,
                        outcome.noise_ratio
                    );

                    match outcome.verdict {
                        Verdict::Accept(tile) => ProbeState::Accept(tile),
                        Verdict::Reject(reason) => {
                            self.stats.record_rejection(reason);
                            tracing::debug!(
                                "Rejected probe of line {} page 0x{:012x} ({:?}): max {} min {} avg {:.1} deltas {:?}",
                                line,
                                paddr,
                                reason,
                                outcome.max_delta,
                                outcome.min_delta,
                                outcome.adjusted_avg,
                                self.deltas
                            );

                            if attempts % self.retry.tries_per_backoff != 0 {
                                ProbeState::Retry
                            } else if backoffs + 1 >= self.retry.max_backoffs {
                                ProbeState::Fatal
                            } else {
                                ProbeState::Backoff
                            }
                        }
                    }
                }
                ProbeState::Backoff => {
                    backoffs += 1;
                    self.stats.backoffs += 1;
                    tracing::warn!(
                        "No good result for line {} of page 0x{:012x} after {} tries, backing off for {:?}",
                        line,
                        paddr,
                        attempts,
                        self.retry.backoff
                    );
                    std::thread::sleep(self.retry.backoff);
                    ProbeState::Snapshot0
                }
                ProbeState::Accept(tile) => {
                    self.stats.lines_mapped += 1;
                    return Ok(tile);
                }
                ProbeState::Fatal => {
                    return Err(SliceMapError::ProbeExhausted {
                        paddr,
                        line,
                        attempts,
                        backoffs,
                    });
                }
            };
        }
    }

    /// Map every line of one page
    pub fn map_page(
        &mut self,
        stressor: &mut dyn LineStressor,
        page: usize,
        paddr: u64,
    ) -> Result<SliceMap> {
        let mut map = SliceMap::new(paddr);
        let attempts_before = self.stats.attempts;

        for line in 0..LINES_PER_PAGE {
            let tile = self.map_line(stressor, page, line, paddr)?;
            map.set(line, tile);

            if (line + 1) % PROGRESS_INTERVAL == 0 {
                tracing::debug!(
                    "page 0x{:012x}: {}/{} lines mapped",
                    paddr,
                    line + 1,
                    LINES_PER_PAGE
                );
            }
        }

        tracing::info!(
            "Mapped page {} (0x{:012x}) in {} tries",
            page,
            paddr,
            self.stats.attempts - attempts_before
        );
        Ok(map)
    }

    fn compute_deltas(&mut self, paddr: u64, line: usize) {
        self.deltas.clear();
        for (tile, (&end, &start)) in self.after.iter().zip(&self.before).enumerate() {
            let delta = corrected_delta(end, start, self.profile.counter_width_bits);
            if delta.wrapped {
                self.stats.counter_wraps += 1;
                tracing::debug!(
                    "Counter of tile {} wrapped while probing line {} of page 0x{:012x}",
                    tile,
                    line,
                    paddr
                );
            }
            self.deltas.push(delta.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::SimulatedUncore;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_map_line_finds_owner() {
        let mut uncore = SimulatedUncore::new(4, |_, line| line % 4);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let mut engine =
            MappingEngine::new(&profile, &channel, 0, 1000, fast_retry()).unwrap();

        assert_eq!(engine.map_line(&mut uncore, 0, 6, 0x20_0000).unwrap(), 2);
        assert_eq!(engine.state(), ProbeState::Accept(2));
        assert_eq!(engine.stats().attempts, 1);
        assert_eq!(engine.stats().lines_mapped, 1);
    }

    #[test]
    fn test_retry_after_ambiguous_probe() {
        let mut uncore = SimulatedUncore::new(4, |_, _| 3);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let mut engine =
            MappingEngine::new(&profile, &channel, 1, 1000, fast_retry()).unwrap();

        uncore.make_ambiguous(2);
        assert_eq!(engine.map_line(&mut uncore, 0, 0, 0x20_0000).unwrap(), 3);
        assert_eq!(engine.stats().attempts, 3);
        assert_eq!(engine.stats().rejected(), 2);
        assert_eq!(engine.stats().rejections.get("multiple_owners"), Some(&2));
        assert_eq!(engine.stats().backoffs, 0);
    }

    #[test]
    fn test_backoff_every_hundred_failures() {
        let mut uncore = SimulatedUncore::new(4, |_, _| 1);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let mut engine =
            MappingEngine::new(&profile, &channel, 0, 1000, fast_retry()).unwrap();

        uncore.make_ambiguous(250);
        assert_eq!(engine.map_line(&mut uncore, 0, 0, 0x20_0000).unwrap(), 1);
        assert_eq!(engine.stats().attempts, 251);
        assert_eq!(engine.stats().backoffs, 2);
    }

    #[test]
    fn test_exhaustion_after_thousand_attempts() {
        let mut uncore = SimulatedUncore::new(4, |_, _| 0);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let mut engine =
            MappingEngine::new(&profile, &channel, 0, 1000, fast_retry()).unwrap();

        uncore.make_ambiguous(u64::MAX);
        let err = engine.map_line(&mut uncore, 0, 9, 0x40_0000).unwrap_err();
        assert!(matches!(
            err,
            SliceMapError::ProbeExhausted {
                paddr: 0x40_0000,
                line: 9,
                attempts: 1000,
                backoffs: 9,
            }
        ));
        assert_eq!(err.exit_code(), 101);
        assert_eq!(uncore.stress_calls(), 1000);
        assert_eq!(engine.stats().backoffs, 9);
        assert_eq!(engine.state(), ProbeState::Fatal);
    }

    #[test]
    fn test_exhaustion_reports_sleeps_taken() {
        let mut uncore = SimulatedUncore::new(4, |_, _| 0);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let retry = RetryPolicy {
            tries_per_backoff: 2,
            max_backoffs: 3,
            backoff: Duration::ZERO,
        };
        let mut engine = MappingEngine::new(&profile, &channel, 0, 1000, retry).unwrap();

        uncore.make_ambiguous(u64::MAX);
        let err = engine.map_line(&mut uncore, 0, 0, 0x20_0000).unwrap_err();
        assert!(matches!(
            err,
            SliceMapError::ProbeExhausted {
                attempts: 6,
                backoffs: 2,
                ..
            }
        ));
        assert_eq!(engine.stats().backoffs, 2);
        assert!(err.to_string().contains("after 6 tries and 2 backoffs"));
    }

    #[test]
    fn test_new_rejects_empty_retry_policy() {
        let uncore = SimulatedUncore::new(4, |_, _| 0);
        let profile = uncore.profile();
        let channel = uncore.channel();

        for retry in [
            RetryPolicy {
                tries_per_backoff: 0,
                ..fast_retry()
            },
            RetryPolicy {
                max_backoffs: 0,
                ..fast_retry()
            },
        ] {
            assert!(matches!(
                MappingEngine::new(&profile, &channel, 0, 1000, retry),
                Err(SliceMapError::InvalidConfiguration(_))
            ));
        }
        assert!(MappingEngine::new(&profile, &channel, 0, 0, fast_retry()).is_err());
    }

    #[test]
    fn test_wrapped_counter_still_measured() {
        let mut uncore = SimulatedUncore::new(4, |_, _| 2);
        let profile = uncore.profile();
        let channel = uncore.channel();
        uncore.set_register(profile.counter_address(2, 0), (1 << 48) - 5);
        let mut engine =
            MappingEngine::new(&profile, &channel, 0, 1000, fast_retry()).unwrap();

        assert_eq!(engine.map_line(&mut uncore, 0, 0, 0x20_0000).unwrap(), 2);
        assert_eq!(engine.stats().counter_wraps, 1);
    }

    #[test]
    fn test_map_page_is_complete() {
        let mut uncore = SimulatedUncore::new(6, |_, line| (line / 3) % 6);
        let profile = uncore.profile();
        let channel = uncore.channel();
        let mut engine =
            MappingEngine::new(&profile, &channel, 0, 100, fast_retry()).unwrap();

        let map = engine.map_page(&mut uncore, 0, 0x20_0000).unwrap();
        assert!(map.is_complete());
        assert_eq!(map.get(0), 0);
        assert_eq!(map.get(4), 1);
        assert_eq!(map.get(LINES_PER_PAGE - 1), (((LINES_PER_PAGE - 1) / 3) % 6) as i8);
        assert_eq!(engine.stats().lines_mapped, LINES_PER_PAGE as u64);
    }
}
