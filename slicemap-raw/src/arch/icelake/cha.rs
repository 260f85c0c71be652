//! CHA register definitions for Ice Lake-SP
//!
//! Each CHA owns a block of 14 MSRs (11 used): unit control at offset 0x00,
//! CTL0-3 at 0x01-0x04, one filter at 0x05, status at 0x07 and CTR0-3 at
//! 0x08-0x0B. The blocks are not laid out linearly in the MSR space:
//!
//! | CHAs  | Block base                      |
//! |-------|---------------------------------|
//! | 0-17  | `0xE00 + 0x0E * cha`            |
//! | 18-33 | `0xE00 + 0x0E + 0x0E * cha`     |
//! | 34-39 | `0xE00 - 0x47C + 0x0E * cha`    |
//!
//! The single filter register is interpreted per event and is left alone;
//! `REQUESTS.READS` needs no filtering.

use crate::arch::skylake::cha::ChaCounterControl;
use crate::register::RegisterLayout;

/// Number of CHA units in Ice Lake-SP (up to 40, varies by SKU)
pub const CHA_COUNT: usize = 40;

/// Bit width of CHA counters
pub const COUNTER_WIDTH_BITS: u32 = 48;

/// Stride between CHA box MSR addresses
pub const CHA_BOX_STRIDE: u64 = 0x0E;

/// MSR addresses for CHA units
pub mod msr {
    use super::CHA_BOX_STRIDE;

    /// Unit control of CHA 0
    pub const CHA_UNIT_BOX_CTL_BASE: u64 = 0xE00;

    /// Forward correction for CHAs 18-33
    pub const FORWARD_SKIP: u64 = 0x0E;

    /// Backward correction for CHAs 34-39
    pub const BACKWARD_SKIP: u64 = 0x47C;

    /// First CHA past the forward correction
    pub const FORWARD_FROM: usize = 18;

    /// First CHA past the backward correction
    pub const BACKWARD_FROM: usize = 34;

    /// Offset of CTL0 inside a CHA block
    pub const CTL0_OFFSET: u64 = 0x01;

    /// Offset of CTR0 inside a CHA block
    pub const CTR0_OFFSET: u64 = 0x08;

    /// Base (unit control) MSR of a CHA block
    pub const fn box_ctl(cha_index: usize) -> u64 {
        let base = if cha_index >= BACKWARD_FROM {
            CHA_UNIT_BOX_CTL_BASE - BACKWARD_SKIP
        } else if cha_index >= FORWARD_FROM {
            CHA_UNIT_BOX_CTL_BASE + FORWARD_SKIP
        } else {
            CHA_UNIT_BOX_CTL_BASE
        };
        base + CHA_BOX_STRIDE * cha_index as u64
    }

    /// Get counter control MSR address
    pub const fn counter_ctl(cha_index: usize, counter_num: usize) -> u64 {
        box_ctl(cha_index) + CTL0_OFFSET + counter_num as u64
    }

    /// Get counter value MSR address
    pub const fn counter_value(cha_index: usize, counter_num: usize) -> u64 {
        box_ctl(cha_index) + CTR0_OFFSET + counter_num as u64
    }
}

/// Uncore-wide control registers (U-box), same addresses as Skylake-SP
pub mod global {
    pub use crate::arch::skylake::cha::global::*;
}

/// CHA Unit Box Control Register layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaBoxControl {
    /// Reset all control registers (bit 0)
    pub reset_control: bool,
    /// Reset all counters to 0 (bit 1)
    pub reset_counters: bool,
    /// Freeze all counters in this CHA unit (bit 8)
    pub freeze: bool,
}

impl RegisterLayout for ChaBoxControl {
    fn to_msr_value(&self) -> u64 {
        (if self.reset_control { 1 << 0 } else { 0 })
            | (if self.reset_counters { 1 << 1 } else { 0 })
            | (if self.freeze { 1 << 8 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            reset_control: (value & (1 << 0)) != 0,
            reset_counters: (value & (1 << 1)) != 0,
            freeze: (value & (1 << 8)) != 0,
        }
    }
}

/// Value written to the unit control before programming: clear the counters
pub fn clear_counters() -> u64 {
    ChaBoxControl {
        reset_counters: true,
        ..Default::default()
    }
    .to_msr_value()
}

/// CHA event codes
pub mod events {
    /// Requests to the home agent
    pub const REQUESTS: u8 = 0x50;

    /// Umask of `REQUESTS` for reads (local and remote)
    pub const REQUESTS_READS: u8 = 0x03;
}

/// `REQUESTS.READS`, enabled: reads that miss the SF and LLC and go to the HA
pub fn default_event_select() -> u64 {
    ChaCounterControl {
        event_select: events::REQUESTS,
        unit_mask: events::REQUESTS_READS,
        enable: true,
        ..Default::default()
    }
    .to_msr_value()
}
