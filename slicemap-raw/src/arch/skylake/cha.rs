//! CHA (Caching/Home Agent) register definitions for Skylake-SP
//!
//! The CHA unit manages one L3 slice and its snoop filter. Each CHA unit has
//! 4 programmable performance counters, a unit control register and two
//! filter registers. `LLC_LOOKUP` counts nothing unless filter0 selects the
//! line states to match, so slice mapping on this generation always writes
//! both filters.
//!
//! Cascade Lake-SP shares the CPUID signature and the layout.
//!
//! ## References
//!
//! - Intel® Xeon® Processor Scalable Memory Family Uncore Performance Monitoring Reference Manual

use crate::register::{Register, RegisterLayout};

/// Number of CHA units in Skylake-SP (up to 28, varies by SKU)
pub const CHA_COUNT: usize = 28;

/// Bit width of CHA counters
pub const COUNTER_WIDTH_BITS: u32 = 48;

/// Stride between CHA box MSR addresses
pub const CHA_BOX_STRIDE: u64 = 0x10;

/// MSR addresses for CHA units
pub mod msr {
    use super::CHA_BOX_STRIDE;

    /// CHA Unit Box Control base address
    pub const CHA_UNIT_BOX_CTL_BASE: u64 = 0xE00;

    /// CHA Unit Counter Control 0 base address
    pub const CHA_UNIT_CTL0_BASE: u64 = 0xE01;

    /// CHA Unit Filter 0 base address
    pub const CHA_UNIT_FILTER0_BASE: u64 = 0xE05;

    /// CHA Unit Filter 1 base address
    pub const CHA_UNIT_FILTER1_BASE: u64 = 0xE06;

    /// CHA Unit Counter 0 base address
    pub const CHA_UNIT_CTR0_BASE: u64 = 0xE08;

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

    /// Get filter 0 MSR address
    pub const fn filter0(cha_index: usize) -> u64 {
        CHA_UNIT_FILTER0_BASE + (cha_index as u64 * CHA_BOX_STRIDE)
    }

    /// Get filter 1 MSR address
    pub const fn filter1(cha_index: usize) -> u64 {
        CHA_UNIT_FILTER1_BASE + (cha_index as u64 * CHA_BOX_STRIDE)
    }
}

/// Uncore-wide control registers (U-box)
pub mod global {
    /// Uncore PMON global control
    pub const U_MSR_PMON_GLOBAL_CTL: u64 = 0x700;

    /// Unfreeze all uncore counters
    pub const UNFREEZE_ALL: u64 = 1 << 61;

    /// Uncore fixed (clock) counter control
    pub const U_MSR_PMON_FIXED_CTL: u64 = 0x703;

    /// Enable bit of the fixed counter control
    pub const FIXED_ENABLE: u64 = 1 << 22;
}

/// CHA Unit Counter Control Register layout
///
/// Shared by every generation handled here; Ice Lake-SP adds the extended
/// umask in the upper half and Sapphire Rapids reserves the enable bit.
///
/// ## Register Format
///
/// | Bits   | Field               | Description                          |
/// |--------|---------------------|--------------------------------------|
/// | 0-7    | event_select        | Event code to count                  |
/// | 8-15   | unit_mask           | Event sub-select (umask)             |
/// | 17     | reset               | Reset counter                        |
/// | 18     | edge_detect         | Count rising edges vs level          |
/// | 22     | enable              | Enable counter                       |
/// | 23     | invert              | Invert threshold comparison          |
/// | 24-31  | threshold           | Threshold for filtering              |
/// | 32-57  | unit_mask_ext       | Extended umask (Ice Lake-SP onward)  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaCounterControl {
    /// Event select code (bits 0-7)
    pub event_select: u8,

    /// Unit mask / event sub-select (bits 8-15)
    pub unit_mask: u8,

    /// Edge detection mode (bit 18)
    pub edge_detect: bool,

    /// Enable counter (bit 22)
    pub enable: bool,

    /// Invert threshold comparison (bit 23)
    pub invert: bool,

    /// Threshold value (bits 24-31)
    pub threshold: u8,

    /// Extended unit mask (bits 32-57, 26 bits)
    pub unit_mask_ext: u32,
}

impl RegisterLayout for ChaCounterControl {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.unit_mask as u64) << 8)
            | (if self.edge_detect { 1 << 18 } else { 0 })
            | (if self.enable { 1 << 22 } else { 0 })
            | (if self.invert { 1 << 23 } else { 0 })
            | ((self.threshold as u64) << 24)
            | ((self.unit_mask_ext as u64 & 0x3FF_FFFF) << 32)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            unit_mask: ((value >> 8) & 0xFF) as u8,
            edge_detect: (value & (1 << 18)) != 0,
            enable: (value & (1 << 22)) != 0,
            invert: (value & (1 << 23)) != 0,
            threshold: ((value >> 24) & 0xFF) as u8,
            unit_mask_ext: ((value >> 32) & 0x3FF_FFFF) as u32,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.unit_mask_ext > 0x3FF_FFFF {
            return Err("Extended umask must fit in 26 bits");
        }
        Ok(())
    }
}

/// CHA Unit Filter 0 Register layout
///
/// Selects the cache line states `LLC_LOOKUP` matches on, plus an optional
/// thread ID.
///
/// ## Register Format
///
/// | Bits   | Field  | Description                     |
/// |--------|--------|---------------------------------|
/// | 0-8    | tid    | Thread ID filter                |
/// | 17-26  | state  | LLC / snoop filter state mask   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaFilter0 {
    /// Thread ID filter (bits 0-8)
    pub tid: u16,

    /// State mask (bits 17-26), see [`states`]
    pub state: u16,
}

impl ChaFilter0 {
    /// All LLC states (F, M, E, S, I) and no snoop filter states
    pub fn llc_fmesi() -> Self {
        Self {
            tid: 0,
            state: states::F | states::M | states::E | states::S | states::I,
        }
    }
}

impl RegisterLayout for ChaFilter0 {
    fn to_msr_value(&self) -> u64 {
        (self.tid as u64 & 0x1FF) | ((self.state as u64 & 0x3FF) << 17)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            tid: (value & 0x1FF) as u16,
            state: ((value >> 17) & 0x3FF) as u16,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.tid > 0x1FF {
            return Err("TID must be <= 0x1FF (9 bits)");
        }
        if self.state > 0x3FF {
            return Err("State mask must fit in 10 bits");
        }
        Ok(())
    }
}

/// CHA Unit Filter 1 Register layout
///
/// Locality, memory type and opcode filtering.
///
/// ## Register Format
///
/// | Bits   | Field         | Description                     |
/// |--------|---------------|---------------------------------|
/// | 0      | remote        | Remote node requests            |
/// | 1      | local         | Local node requests             |
/// | 3      | all_opcodes   | Match all opcodes               |
/// | 4      | near_memory   | Near memory requests            |
/// | 5      | not_near_mem  | Non-near memory requests        |
/// | 9-18   | opcode0       | Opcode match 0                  |
/// | 19-28  | opcode1       | Opcode match 1                  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaFilter1 {
    pub remote: bool,
    pub local: bool,
    pub all_opcodes: bool,
    pub near_memory: bool,
    pub not_near_memory: bool,
    pub opcode0: u16,
    pub opcode1: u16,
}

impl ChaFilter1 {
    /// No filtering: local and remote, near and non-near memory, all opcodes
    pub fn all_traffic() -> Self {
        Self {
            remote: true,
            local: true,
            all_opcodes: true,
            near_memory: true,
            not_near_memory: true,
            ..Default::default()
        }
    }
}

impl RegisterLayout for ChaFilter1 {
    fn to_msr_value(&self) -> u64 {
        (if self.remote { 1 << 0 } else { 0 })
            | (if self.local { 1 << 1 } else { 0 })
            | (if self.all_opcodes { 1 << 3 } else { 0 })
            | (if self.near_memory { 1 << 4 } else { 0 })
            | (if self.not_near_memory { 1 << 5 } else { 0 })
            | ((self.opcode0 as u64 & 0x3FF) << 9)
            | ((self.opcode1 as u64 & 0x3FF) << 19)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            remote: (value & (1 << 0)) != 0,
            local: (value & (1 << 1)) != 0,
            all_opcodes: (value & (1 << 3)) != 0,
            near_memory: (value & (1 << 4)) != 0,
            not_near_memory: (value & (1 << 5)) != 0,
            opcode0: ((value >> 9) & 0x3FF) as u16,
            opcode1: ((value >> 19) & 0x3FF) as u16,
        }
    }
}

/// Filter registers to write for one CHA before `LLC_LOOKUP` is meaningful
pub fn filter_registers(cha_index: usize) -> (Register<ChaFilter0>, Register<ChaFilter1>) {
    (
        Register::new(msr::filter0(cha_index), ChaFilter0::llc_fmesi()),
        Register::new(msr::filter1(cha_index), ChaFilter1::all_traffic()),
    )
}

/// CHA event codes
pub mod events {
    /// LLC and snoop filter lookups
    pub const LLC_LOOKUP: u8 = 0x34;

    /// Umask of `LLC_LOOKUP` for data reads
    pub const LLC_LOOKUP_DATA_READ: u8 = 0x03;
}

/// Line states for the filter0 state field (relative to bit 17)
pub mod states {
    /// Invalid (LLC miss)
    pub const I: u16 = 0x01;

    /// Snoop Filter Shared
    pub const SF_S: u16 = 0x02;

    /// Snoop Filter Exclusive
    pub const SF_E: u16 = 0x04;

    /// Snoop Filter HitMe
    pub const SF_H: u16 = 0x08;

    /// Shared
    pub const S: u16 = 0x10;

    /// Exclusive
    pub const E: u16 = 0x20;

    /// Modified
    pub const M: u16 = 0x40;

    /// Forward
    pub const F: u16 = 0x80;
}

/// `LLC_LOOKUP.DATA_READ`, enabled
pub fn default_event_select() -> u64 {
    ChaCounterControl {
        event_select: events::LLC_LOOKUP,
        unit_mask: events::LLC_LOOKUP_DATA_READ,
        enable: true,
        ..Default::default()
    }
    .to_msr_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cha_counter_control_round_trip() {
        let ctrl = ChaCounterControl {
            event_select: 0x34,
            unit_mask: 0xFF,
            enable: true,
            unit_mask_ext: 0x1BC1,
            ..Default::default()
        };

        let value = ctrl.to_msr_value();
        assert_eq!(value, 0x0000_1bc1_0040_ff34);
        assert_eq!(ChaCounterControl::from_msr_value(value), ctrl);
    }

    #[test]
    fn test_default_event_select() {
        assert_eq!(default_event_select(), 0x0040_0334);
    }

    #[test]
    fn test_filter_values() {
        let (f0, f1) = filter_registers(0);
        assert_eq!(f0.to_msr_value(), 0x01e2_0000);
        assert_eq!(f1.to_msr_value(), 0x03b);
        assert!(f0.validate().is_ok());
    }

    #[test]
    fn test_filter0_validation() {
        let filter = ChaFilter0 {
            tid: 0x200,
            state: 0,
        };
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_cha_msr_addresses() {
        assert_eq!(msr::box_ctl(0), 0xE00);
        assert_eq!(msr::box_ctl(1), 0xE10);
        assert_eq!(msr::counter_ctl(0, 0), 0xE01);
        assert_eq!(msr::counter_ctl(0, 3), 0xE04);
        assert_eq!(msr::counter_value(0, 0), 0xE08);
        assert_eq!(msr::counter_value(27, 3), 0xE08 + 27 * 0x10 + 3);
        assert_eq!(msr::filter0(0), 0xE05);
        assert_eq!(msr::filter1(0), 0xE06);
    }
}
