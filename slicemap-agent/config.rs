use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SliceMapError};
use crate::mapping::order::is_coprime;
use crate::mapping::LINES_PER_PAGE;

/// Which pages the per-tile tally covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyScope {
    /// Only pages computed (not loaded) during this run
    NewlyMapped,
    /// The first `pages` pages by index plus the first `trailing_lines` lines of the next one
    Prefix { pages: usize, trailing_lines: usize },
}

/// Bounded retry policy of the probe loop
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Failed attempts between two backoffs
    pub tries_per_backoff: u32,
    /// Backoffs after which the line is declared unmappable
    pub max_backoffs: u32,
    /// Sleep taken at each backoff
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Upper bound on probe attempts for one line
    pub fn max_attempts(&self) -> u32 {
        self.tries_per_backoff * self.max_backoffs
    }

    pub fn validate(&self) -> Result<()> {
        if self.tries_per_backoff == 0 || self.max_backoffs == 0 {
            return Err(SliceMapError::InvalidConfiguration(
                "retry policy must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries_per_backoff: 100,
            max_backoffs: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MappingConfig {
    /// Number of 2MiB pages allocated
    pub num_pages: usize,
    /// Stop after this many pages have been newly computed
    pub pages_to_map: usize,
    /// Multiplicative stride of the page visitation order
    pub page_stride: usize,
    /// Directory holding `PADDR_0x*.map` files
    pub cache_dir: PathBuf,
    /// Load/flush repetitions per probe
    pub repetitions: u32,
    /// CHA counter index observed by the probe
    pub probe_counter: usize,
    /// Tiles per socket, when the SKU has fewer than the generation maximum
    pub tile_count: Option<usize>,
    /// Logical CPU that runs the probes
    pub core: Option<u32>,
    pub tally_scope: TallyScope,
    pub retry: RetryPolicy,
    /// Prometheus text file written at the end of the run
    pub metrics_file: Option<PathBuf>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            num_pages: 2048,
            pages_to_map: 16,
            page_stride: 797,
            cache_dir: PathBuf::from("."),
            repetitions: 1000,
            probe_counter: 0,
            tile_count: None,
            core: None,
            tally_scope: TallyScope::NewlyMapped,
            retry: RetryPolicy::default(),
            metrics_file: None,
        }
    }
}

impl MappingConfig {
    /// Reject settings that would make the run meaningless before any register access
    pub fn validate(&self) -> Result<()> {
        if self.num_pages == 0 {
            return Err(SliceMapError::InvalidConfiguration(
                "page count must be positive".to_string(),
            ));
        }
        if self.pages_to_map == 0 {
            return Err(SliceMapError::InvalidConfiguration(
                "number of pages to map must be positive".to_string(),
            ));
        }
        if !is_coprime(self.page_stride, self.num_pages) {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "page stride {} is not coprime with page count {}",
                self.page_stride, self.num_pages
            )));
        }
        if self.repetitions == 0 {
            return Err(SliceMapError::InvalidConfiguration(
                "repetitions must be positive".to_string(),
            ));
        }
        if self.probe_counter >= slicemap_raw::COUNTERS_PER_TILE {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "probe counter {} out of range 0..{}",
                self.probe_counter,
                slicemap_raw::COUNTERS_PER_TILE
            )));
        }
        self.retry.validate()?;
        if let TallyScope::Prefix {
            pages,
            trailing_lines,
        } = self.tally_scope
        {
            if trailing_lines >= LINES_PER_PAGE {
                return Err(SliceMapError::InvalidConfiguration(format!(
                    "trailing lines {trailing_lines} must be below {LINES_PER_PAGE}"
                )));
            }
            let needed = pages + usize::from(trailing_lines > 0);
            if needed > self.num_pages {
                return Err(SliceMapError::InvalidConfiguration(format!(
                    "validation prefix needs {needed} pages, only {} allocated",
                    self.num_pages
                )));
            }
        }
        Ok(())
    }
}

/// Socket layout of the machine as seen through sysfs
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Socket id -> online CPUs in that socket, ascending
    pub sockets: BTreeMap<u32, Vec<u32>>,
}

impl Topology {
    /// Detect online CPUs and group them by physical package
    pub fn detect() -> Self {
        let cpus = Self::detect_online_cpus();
        let mut sockets: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        for cpu in cpus {
            let socket = Self::socket_of(cpu).unwrap_or_else(|| {
                tracing::warn!("No package id for CPU {}, assuming socket 0", cpu);
                0
            });
            sockets.entry(socket).or_default().push(cpu);
        }

        tracing::info!(
            "Detected {} sockets: {:?}",
            sockets.len(),
            sockets.keys().collect::<Vec<_>>()
        );

        Self { sockets }
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }

    /// Physical package of one CPU
    pub fn socket_of(cpu: u32) -> Option<u32> {
        let path = format!("/sys/devices/system/cpu/cpu{cpu}/topology/physical_package_id");
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// CPU whose MSR device serves as the privileged channel of a socket
    pub fn representative_cpu(&self, socket: u32) -> Option<u32> {
        self.sockets
            .get(&socket)
            .and_then(|cpus| cpus.first().copied())
    }

    pub fn socket_ids(&self) -> Vec<u32> {
        self.sockets.keys().copied().collect()
    }

    pub fn socket_containing(&self, cpu: u32) -> Option<u32> {
        self.sockets
            .iter()
            .find(|(_, cpus)| cpus.contains(&cpu))
            .map(|(&socket, _)| socket)
    }
}

/// Parse CPU list like "0-3,8-11" into Vec<u32>
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.trim().parse().ok()?;
            let end: u32 = end.trim().parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Some(cpus)
}
