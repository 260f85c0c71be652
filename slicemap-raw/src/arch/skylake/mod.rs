//! Intel Skylake-SP (Skylake Server) and Cascade Lake-SP register definitions
//!
//! ## Uncore Units
//!
//! - **CHA** (Caching/Home Agent) - LLC slice and snoop filter
//!
//! ## References
//!
//! - Intel® Xeon® Processor Scalable Family Specification Update
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B

pub mod cha;
