//! Intel Ice Lake-SP (3rd generation Xeon Scalable) register definitions
//!
//! ## Uncore Units
//!
//! - **CHA** (Caching/Home Agent) - LLC slice and snoop filter

pub mod cha;
