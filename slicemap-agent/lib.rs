// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod mapping;
pub mod orchestrator;
pub mod prom;

pub use config::{MappingConfig, RetryPolicy, TallyScope, Topology};
pub use error::{Result, SliceMapError};
pub use mapping::{MappingCache, MappingEngine, SliceMap, TileLineTally};
pub use orchestrator::{launch, MappingSession, RunSummary};
pub use prom::SliceMapExporter;
