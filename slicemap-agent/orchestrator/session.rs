// Mapping run: program counters, walk pages, resolve each map, tally and report

use std::collections::BTreeMap;

use crate::common::{
    AffinityGuard, HardwareProfile, HugePageRegion, LineStressor, PageInfoProvider,
    SocketChannels,
};
use crate::config::{MappingConfig, TallyScope, Topology};
use crate::counters::cha::CounterProgrammer;
use crate::error::{Result, SliceMapError};
use crate::mapping::{
    MappingCache, MappingEngine, PageOrder, ProbeStats, SliceMap, TileLineTally, LINES_PER_PAGE,
};
use crate::prom::SliceMapExporter;

const PAGE_TABLE_COLUMNS: usize = 8;

#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Pages computed by probing during this run
    pub pages_mapped: u64,
    /// Pages loaded from mapping files
    pub pages_cached: u64,
    pub stats: ProbeStats,
    pub tally: TileLineTally,
    /// Tally matched the expected line count
    pub reconciled: bool,
}

pub struct MappingSession {
    config: MappingConfig,
    profile: HardwareProfile,
    channels: SocketChannels,
    socket: u32,
    cache: MappingCache,
    exporter: SliceMapExporter,
}

impl MappingSession {
    /// `socket` is the package of the core under test; its channel drives the probes
    pub fn new(
        config: MappingConfig,
        profile: HardwareProfile,
        channels: SocketChannels,
        socket: u32,
    ) -> Result<Self> {
        config.validate()?;
        channels.get(socket)?;

        let cache = MappingCache::new(config.cache_dir.clone());
        let exporter = SliceMapExporter::new(profile.tile_count)?;

        Ok(Self {
            config,
            profile,
            channels,
            socket,
            cache,
            exporter,
        })
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn exporter(&self) -> &SliceMapExporter {
        &self.exporter
    }

    /// Program every tile of every socket, then enable the uncore counters
    pub fn program_counters(&self) -> Result<()> {
        let programmer = CounterProgrammer::new(&self.profile);
        for (socket, channel) in self.channels.iter() {
            programmer.program(channel, socket, &self.profile.default_event_select)?;
        }
        for (socket, channel) in self.channels.iter() {
            programmer.global_enable(channel, socket)?;
        }
        Ok(())
    }

    pub fn run<M: LineStressor + PageInfoProvider>(&self, memory: &mut M) -> Result<RunSummary> {
        if memory.page_count() < self.config.num_pages {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "{} pages configured, only {} available",
                self.config.num_pages,
                memory.page_count()
            )));
        }
        self.log_page_table(&*memory);

        let channel = self.channels.get(self.socket)?;
        let mut engine = MappingEngine::new(
            &self.profile,
            channel,
            self.config.probe_counter,
            self.config.repetitions,
            self.config.retry,
        )?;

        let prefix_pages = match self.config.tally_scope {
            TallyScope::NewlyMapped => 0,
            TallyScope::Prefix {
                pages,
                trailing_lines,
            } => pages + usize::from(trailing_lines > 0),
        };

        let mut tally = TileLineTally::new(self.profile.tile_count);
        let mut retained: BTreeMap<usize, SliceMap> = BTreeMap::new();
        let mut pages_mapped = 0u64;
        let mut pages_cached = 0u64;

        for page in PageOrder::new(self.config.page_stride, self.config.num_pages) {
            let (map, computed) = self.resolve_page(&mut engine, memory, page)?;
            if computed {
                pages_mapped += 1;
                if self.config.tally_scope == TallyScope::NewlyMapped {
                    tally.add_page(&map);
                }
            } else {
                pages_cached += 1;
            }
            if page < prefix_pages {
                retained.insert(page, map);
            }
            if pages_mapped >= self.config.pages_to_map as u64 {
                break;
            }
        }
        tracing::info!("{} new 2MiB pages have been mapped", pages_mapped);

        let expected = match self.config.tally_scope {
            TallyScope::NewlyMapped => pages_mapped * LINES_PER_PAGE as u64,
            TallyScope::Prefix {
                pages,
                trailing_lines,
            } => {
                for page in 0..prefix_pages {
                    let map = match retained.remove(&page) {
                        Some(map) => map,
                        None => {
                            let (map, computed) = self.resolve_page(&mut engine, memory, page)?;
                            if computed {
                                pages_mapped += 1;
                            } else {
                                pages_cached += 1;
                            }
                            map
                        }
                    };
                    let lines = if page < pages {
                        LINES_PER_PAGE
                    } else {
                        trailing_lines
                    };
                    tally.add_lines(&map, lines);
                }
                (pages * LINES_PER_PAGE + trailing_lines) as u64
            }
        };

        let stats = engine.stats().clone();
        let lines_probed = stats.lines_mapped.max(1);
        tracing::info!(
            "L3 mapping complete in {} tries for {} cache lines, ratio {:.4}",
            stats.attempts,
            stats.lines_mapped,
            stats.attempts as f64 / lines_probed as f64
        );
        let reconciled = tally.reconcile(expected);

        self.exporter.record_probe_stats(&stats);
        self.exporter.record_pages(pages_mapped, pages_cached);
        self.exporter.record_tally(&tally);
        if let Some(path) = &self.config.metrics_file {
            self.exporter.write_textfile(path)?;
        }

        Ok(RunSummary {
            pages_mapped,
            pages_cached,
            stats,
            tally,
            reconciled,
        })
    }

    /// Load a page's map, or probe it and persist the result
    fn resolve_page<M: LineStressor + PageInfoProvider>(
        &self,
        engine: &mut MappingEngine<'_>,
        memory: &mut M,
        page: usize,
    ) -> Result<(SliceMap, bool)> {
        let paddr = memory.physical_base(page);
        if let Some(map) = self.cache.load(paddr)? {
            tracing::info!("Page {} (0x{:012x}) already mapped", page, paddr);
            return Ok((map, false));
        }

        let map = engine.map_page(memory, page, paddr)?;
        self.cache.store(&map)?;
        Ok((map, true))
    }

    fn log_page_table(&self, memory: &impl PageInfoProvider) {
        let pages: Vec<u64> = (0..self.config.num_pages)
            .map(|page| memory.physical_base(page))
            .collect();
        tracing::info!("PAGE_ADDRESSES for {} 2MiB pages", pages.len());
        for (row, chunk) in pages.chunks(PAGE_TABLE_COLUMNS).enumerate() {
            tracing::info!(
                "PAGE_ADDRESSES {:5} {}",
                row * PAGE_TABLE_COLUMNS,
                chunk
                    .iter()
                    .map(|paddr| format!("0x{paddr:012x}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
        }
    }
}

/// Run a mapping pass on the processor this process is running on
pub fn launch(config: MappingConfig) -> Result<RunSummary> {
    config.validate()?;

    let mut profile = HardwareProfile::detected()?.clone();
    if let Some(tiles) = config.tile_count {
        profile = profile.with_tile_count(tiles)?;
    }

    let topology = Topology::detect();
    let core = match config.core {
        Some(core) => core,
        None => topology
            .socket_ids()
            .first()
            .and_then(|&socket| topology.representative_cpu(socket))
            .unwrap_or(0),
    };
    let socket = topology.socket_containing(core).ok_or_else(|| {
        SliceMapError::InvalidConfiguration(format!("core {core} is not online"))
    })?;
    tracing::info!(
        "Mapping with core {} on socket {} ({} tiles, probe counter {})",
        core,
        socket,
        profile.tile_count,
        config.probe_counter
    );

    let channels = SocketChannels::open(&topology)?;
    let session = MappingSession::new(config, profile, channels, socket)?;
    session.program_counters()?;

    let _pinned = AffinityGuard::pin(core)?;
    let mut region = HugePageRegion::allocate(session.config().num_pages)?;
    session.run(&mut region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::SimulatedUncore;
    use crate::config::RetryPolicy;
    use std::path::Path;
    use std::time::Duration;

    fn test_config(dir: &Path, num_pages: usize, pages_to_map: usize) -> MappingConfig {
        MappingConfig {
            num_pages,
            pages_to_map,
            page_stride: 1,
            cache_dir: dir.to_path_buf(),
            repetitions: 100,
            retry: RetryPolicy {
                backoff: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn session(config: MappingConfig, uncore: &SimulatedUncore) -> MappingSession {
        let mut channels = SocketChannels::default();
        channels.insert(0, Box::new(uncore.channel()));
        MappingSession::new(config, uncore.profile(), channels, 0).unwrap()
    }

    fn owner(page: usize, line: usize) -> usize {
        (page + line / 2) % 4
    }

    #[test]
    fn test_maps_then_reloads_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(2);

        let first = session(test_config(dir.path(), 2, 2), &uncore)
            .run(&mut uncore)
            .unwrap();
        assert_eq!(first.pages_mapped, 2);
        assert_eq!(first.pages_cached, 0);
        assert!(first.reconciled);
        assert_eq!(first.tally.total(), 2 * LINES_PER_PAGE as u64);
        assert_eq!(first.tally.counts(), &[16384; 4]);

        let cache = MappingCache::new(dir.path());
        let map = cache.load(uncore.physical_base(1)).unwrap().unwrap();
        assert_eq!(map.get(4), owner(1, 4) as i8);

        let probes = uncore.stress_calls();
        let second = session(test_config(dir.path(), 2, 2), &uncore)
            .run(&mut uncore)
            .unwrap();
        assert_eq!(second.pages_mapped, 0);
        assert_eq!(second.pages_cached, 2);
        assert_eq!(second.stats.attempts, 0);
        assert_eq!(uncore.stress_calls(), probes);
        assert!(second.reconciled);
    }

    #[test]
    fn test_walk_stops_after_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(3);
        let config = MappingConfig {
            page_stride: 2,
            ..test_config(dir.path(), 3, 1)
        };

        let summary = session(config.clone(), &uncore).run(&mut uncore).unwrap();
        assert_eq!(summary.pages_mapped, 1);
        let cache = MappingCache::new(dir.path());
        assert!(cache.path_for(uncore.physical_base(0)).exists());
        assert!(!cache.path_for(uncore.physical_base(2)).exists());

        // order 0, 2, 1: page 0 is loaded, page 2 is next
        let summary = session(config, &uncore).run(&mut uncore).unwrap();
        assert_eq!(summary.pages_cached, 1);
        assert_eq!(summary.pages_mapped, 1);
        assert!(cache.path_for(uncore.physical_base(2)).exists());
        assert!(!cache.path_for(uncore.physical_base(1)).exists());
    }

    #[test]
    fn test_prefix_scope_resolves_unvisited_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(3);
        let config = MappingConfig {
            page_stride: 2,
            tally_scope: TallyScope::Prefix {
                pages: 1,
                trailing_lines: 10,
            },
            ..test_config(dir.path(), 3, 1)
        };

        let summary = session(config, &uncore).run(&mut uncore).unwrap();
        // page 0 from the walk, page 1 resolved for the trailing lines
        assert_eq!(summary.pages_mapped, 2);
        assert_eq!(summary.tally.total(), LINES_PER_PAGE as u64 + 10);
        assert!(summary.reconciled);
        assert_eq!(summary.tally.counts()[1], 8192 + 4);
    }

    #[test]
    fn test_corrupt_mapping_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(1);
        let cache = MappingCache::new(dir.path());
        std::fs::write(cache.path_for(uncore.physical_base(0)), b"short").unwrap();

        let err = session(test_config(dir.path(), 1, 1), &uncore)
            .run(&mut uncore)
            .unwrap_err();
        assert!(matches!(err, SliceMapError::CacheIntegrity { actual: 5, .. }));
        assert_eq!(uncore.stress_calls(), 0);
    }

    #[test]
    fn test_too_few_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(1);
        let err = session(test_config(dir.path(), 2, 1), &uncore)
            .run(&mut uncore)
            .unwrap_err();
        assert!(matches!(err, SliceMapError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_program_counters_all_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let local = SimulatedUncore::new(2, owner);
        let remote = SimulatedUncore::new(2, owner);
        let mut channels = SocketChannels::default();
        channels.insert(0, Box::new(local.channel()));
        channels.insert(1, Box::new(remote.channel()));

        let session = MappingSession::new(
            test_config(dir.path(), 1, 1),
            local.profile(),
            channels,
            1,
        )
        .unwrap();
        session.program_counters().unwrap();

        for uncore in [&local, &remote] {
            assert_eq!(uncore.register(0xE01), 0x0040_0334);
            assert_eq!(uncore.register(0x700), 1 << 61);
        }
    }

    #[test]
    fn test_missing_socket_channel_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uncore = SimulatedUncore::new(2, owner);
        let result = MappingSession::new(
            test_config(dir.path(), 1, 1),
            uncore.profile(),
            SocketChannels::default(),
            0,
        );
        assert!(matches!(result, Err(SliceMapError::MsrError(_))));
    }

    #[test]
    fn test_metrics_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = dir.path().join("slicemap.prom");
        let mut uncore = SimulatedUncore::new(4, owner).with_pages(1);
        let config = MappingConfig {
            metrics_file: Some(metrics.clone()),
            ..test_config(dir.path(), 1, 1)
        };

        session(config, &uncore).run(&mut uncore).unwrap();
        let text = std::fs::read_to_string(metrics).unwrap();
        assert!(text.contains("slicemap_pages_mapped_total 1"));
        assert!(text.contains("slicemap_lines_by_tile{tile=\"3\"} 8192"));
    }
}
