//! CHA register definitions for Sapphire Rapids
//!
//! CHA blocks start at 0x2000 with a stride of 0x10. Inside a block the
//! counter controls start at offset 0x02 and the counters at offset 0x08.
//! Sapphire Rapids reserves bit 22 of the counter control (enable on older
//! generations); it must be written as zero.

use crate::arch::skylake::cha::ChaCounterControl;
use crate::register::RegisterLayout;

/// Number of CHA units in Sapphire Rapids (up to 60, varies by SKU)
pub const CHA_COUNT: usize = 60;

/// Bit width of CHA counters
pub const COUNTER_WIDTH_BITS: u32 = 48;

/// Stride between CHA box MSR addresses
pub const CHA_BOX_STRIDE: u64 = 0x10;

/// MSR addresses for CHA units
pub mod msr {
    use super::CHA_BOX_STRIDE;

    /// Unit control of CHA 0
    pub const CHA_UNIT_BOX_CTL_BASE: u64 = 0x2000;

    /// Counter control 0 of CHA 0
    pub const CHA_UNIT_CTL0_BASE: u64 = 0x2002;

    /// Counter 0 of CHA 0
    pub const CHA_UNIT_CTR0_BASE: u64 = 0x2008;

    /// Get box control MSR address for a specific CHA
    pub const fn box_ctl(cha_index: usize) -> u64 {
        CHA_UNIT_BOX_CTL_BASE + (cha_index as u64 * CHA_BOX_STRIDE)
    }

    /// Get counter control MSR address
    pub const fn counter_ctl(cha_index: usize, counter_num: usize) -> u64 {
        CHA_UNIT_CTL0_BASE + (cha_index as u64 * CHA_BOX_STRIDE) + counter_num as u64
    }

    /// Get counter value MSR address
    pub const fn counter_value(cha_index: usize, counter_num: usize) -> u64 {
        CHA_UNIT_CTR0_BASE + (cha_index as u64 * CHA_BOX_STRIDE) + counter_num as u64
    }
}

/// Uncore-wide control registers
pub mod global {
    /// Uncore PMON global control
    pub const U_MSR_PMON_GLOBAL_CTL: u64 = 0x2FF0;

    /// Global control with the freeze-all bit cleared
    pub const UNFREEZE_ALL: u64 = 0;

    /// U-box fixed (clock) counter control
    pub const U_MSR_PMON_FIXED_CTL: u64 = 0x2FDE;

    /// Enable bit of the fixed counter control
    pub const FIXED_ENABLE: u64 = 1 << 22;
}

/// CHA event codes
pub mod events {
    /// Requests to the home agent
    pub const REQUESTS: u8 = 0x50;

    /// Umask of `REQUESTS` for reads
    pub const REQUESTS_READS: u8 = 0x03;
}

/// `REQUESTS.READS` without the (reserved) enable bit
pub fn default_event_select() -> u64 {
    ChaCounterControl {
        event_select: events::REQUESTS,
        unit_mask: events::REQUESTS_READS,
        enable: false,
        ..Default::default()
    }
    .to_msr_value()
}
