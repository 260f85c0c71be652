//! # slicemap-raw
//!
//! CHA (Caching/Home Agent) register addressing for Intel Xeon L3 slice mapping.
//!
//! This crate provides type-safe abstractions over MSR (Model-Specific Register)
//! access and the per-generation CHA register layouts needed to program and read
//! one uncore counter per tile, for Skylake-SP (Cascade Lake), Ice Lake-SP and
//! Sapphire Rapids.
//!
//! Every supported generation is built in; one [`AddressingScheme`] is chosen
//! at runtime from the CPUID signature.
//!
//! ## Usage
//!
//! ```ignore
//! use slicemap_raw::{AddressingScheme, open_msr, read_msr};
//!
//! let scheme = AddressingScheme::IceLake;
//! let mut dev = open_msr(0)?;
//!
//! // Counter 1 of tile 20 lives past the first forward correction
//! let value = read_msr(&mut dev, 0, scheme.counter_value(20, 1))?;
//! ```

pub mod arch;
pub mod msr;
pub mod register;

// Re-export for convenience
pub use arch::{AddressingScheme, FilterWrite, COUNTERS_PER_TILE};
pub use msr::{open_msr, read_msr, write_msr, MsrError, Result};
pub use register::{Register, RegisterLayout};
