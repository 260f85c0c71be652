// Run statistics and per-tile tally exported in Prometheus text format

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::mapping::{ProbeStats, RejectReason, TileLineTally};
use crate::metric_enum;

metric_enum! {
    pub enum SliceMapMetric {
        LinesByTile => ("slicemap_lines_by_tile", "Cache lines attributed to each CHA tile"),
        ProbeAttempts => ("slicemap_probe_attempts_total", "Probe attempts issued"),
        ProbeRejections => ("slicemap_probe_rejections_total", "Probes rejected, by reason"),
        ProbeBackoffs => ("slicemap_probe_backoffs_total", "Backoff sleeps taken by the probe loop"),
        CounterWraps => ("slicemap_counter_wraps_total", "Counter deltas corrected for wraparound"),
        PagesMapped => ("slicemap_pages_mapped_total", "Pages computed during this run"),
        PagesCached => ("slicemap_pages_cached_total", "Pages loaded from mapping files"),
        LinesUnattributed => ("slicemap_lines_unattributed", "Tallied entries outside the tile range"),
    }
}

pub struct SliceMapExporter {
    registry: Arc<Registry>,
    lines_by_tile: Vec<Gauge>,
    rejections: HashMap<&'static str, IntCounter>,
    attempts: IntCounter,
    backoffs: IntCounter,
    wraps: IntCounter,
    pages_mapped: IntCounter,
    pages_cached: IntCounter,
    unattributed: IntGauge,
}

impl SliceMapExporter {
    pub fn new(tile_count: usize) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let opts = |metric: SliceMapMetric| Opts::new(metric.name(), metric.help());

        let mut lines_by_tile = Vec::with_capacity(tile_count);
        for tile in 0..tile_count {
            let gauge = Gauge::with_opts(
                opts(SliceMapMetric::LinesByTile).const_label("tile", tile.to_string()),
            )?;
            registry.register(Box::new(gauge.clone()))?;
            lines_by_tile.push(gauge);
        }

        let mut rejections = HashMap::new();
        for reason in [
            RejectReason::GoodnessGate,
            RejectReason::NoOwner,
            RejectReason::MultipleOwners(2),
        ] {
            let counter = IntCounter::with_opts(
                opts(SliceMapMetric::ProbeRejections).const_label("reason", reason.label()),
            )?;
            registry.register(Box::new(counter.clone()))?;
            rejections.insert(reason.label(), counter);
        }

        let counter = |metric: SliceMapMetric| -> Result<IntCounter> {
            let counter = IntCounter::with_opts(opts(metric))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };
        let attempts = counter(SliceMapMetric::ProbeAttempts)?;
        let backoffs = counter(SliceMapMetric::ProbeBackoffs)?;
        let wraps = counter(SliceMapMetric::CounterWraps)?;
        let pages_mapped = counter(SliceMapMetric::PagesMapped)?;
        let pages_cached = counter(SliceMapMetric::PagesCached)?;

        let unattributed = IntGauge::with_opts(opts(SliceMapMetric::LinesUnattributed))?;
        registry.register(Box::new(unattributed.clone()))?;

        tracing::debug!(
            "Registered {} slicemap metric families for {} tiles",
            SliceMapMetric::all().len(),
            tile_count
        );

        Ok(Self {
            registry,
            lines_by_tile,
            rejections,
            attempts,
            backoffs,
            wraps,
            pages_mapped,
            pages_cached,
            unattributed,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn record_probe_stats(&self, stats: &ProbeStats) {
        self.attempts.inc_by(stats.attempts);
        self.backoffs.inc_by(stats.backoffs);
        self.wraps.inc_by(stats.counter_wraps);
        for (reason, &count) in &stats.rejections {
            if let Some(counter) = self.rejections.get(reason) {
                counter.inc_by(count);
            }
        }
    }

    pub fn record_pages(&self, mapped: u64, cached: u64) {
        self.pages_mapped.inc_by(mapped);
        self.pages_cached.inc_by(cached);
    }

    pub fn record_tally(&self, tally: &TileLineTally) {
        for (gauge, &count) in self.lines_by_tile.iter().zip(tally.counts()) {
            gauge.set(count as f64);
        }
        self.unattributed.set(tally.unattributed() as i64);
    }

    /// Text exposition of everything recorded so far
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()?)?;
        tracing::info!("Wrote metrics to {}", path.display());
        Ok(())
    }
}
