pub mod session;

pub use session::{launch, MappingSession, RunSummary};
