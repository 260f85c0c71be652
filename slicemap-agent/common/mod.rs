pub mod affinity;
pub mod arch;
pub mod cpuid;
pub mod hugepage;
pub mod msr;

#[cfg(test)]
pub(crate) mod sim;

pub use affinity::AffinityGuard;
pub use arch::{HardwareProfile, ProcessorModel};
pub use hugepage::{HugePageRegion, LineStressor, PageInfoProvider};
pub use msr::{MsrHandle, RegisterChannel, SocketChannels};
