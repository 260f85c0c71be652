//! Intel Sapphire Rapids (4th generation Xeon Scalable, Xeon CPU Max) register definitions
//!
//! ## Uncore Units
//!
//! - **CHA** (Caching/Home Agent) - LLC slice and snoop filter

pub mod cha;
