//! Architecture-specific register definitions
//!
//! Each Intel Xeon generation places its CHA register blocks differently.
//! [`AddressingScheme`] is the closed set of supported layouts; all
//! generation-specific address arithmetic lives behind it so callers never
//! branch on the processor model.
//!
//! ## Supported Architectures
//!
//! - **Skylake-SP / Cascade Lake-SP** - linear blocks, needs filter registers
//! - **Ice Lake-SP** - 14-MSR blocks with forward/backward corrections
//! - **Sapphire Rapids** - linear blocks at 0x2000

pub mod icelake;
pub mod sapphirerapids;
pub mod skylake;

/// Number of programmable counters per CHA unit
pub const COUNTERS_PER_TILE: usize = 4;

/// One register write needed to make the programmed event meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterWrite {
    pub address: u64,
    pub value: u64,
}

/// CHA register layout of one processor generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingScheme {
    SkylakeServer,
    IceLake,
    SapphireRapids,
}

impl AddressingScheme {
    pub fn name(&self) -> &'static str {
        match self {
            AddressingScheme::SkylakeServer => "SKX",
            AddressingScheme::IceLake => "ICX",
            AddressingScheme::SapphireRapids => "SPR",
        }
    }

    /// Largest number of CHAs per socket the layout covers
    pub fn max_tiles(&self) -> usize {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::CHA_COUNT,
            AddressingScheme::IceLake => icelake::cha::CHA_COUNT,
            AddressingScheme::SapphireRapids => sapphirerapids::cha::CHA_COUNT,
        }
    }

    pub fn counter_width_bits(&self) -> u32 {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::COUNTER_WIDTH_BITS,
            AddressingScheme::IceLake => icelake::cha::COUNTER_WIDTH_BITS,
            AddressingScheme::SapphireRapids => sapphirerapids::cha::COUNTER_WIDTH_BITS,
        }
    }

    /// Unit (box) control register of a tile
    pub fn unit_ctl(&self, tile: usize) -> u64 {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::msr::box_ctl(tile),
            AddressingScheme::IceLake => icelake::cha::msr::box_ctl(tile),
            AddressingScheme::SapphireRapids => sapphirerapids::cha::msr::box_ctl(tile),
        }
    }

    /// Event-select (counter control) register of a tile's counter
    pub fn counter_ctl(&self, tile: usize, counter: usize) -> u64 {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::msr::counter_ctl(tile, counter),
            AddressingScheme::IceLake => icelake::cha::msr::counter_ctl(tile, counter),
            AddressingScheme::SapphireRapids => {
                sapphirerapids::cha::msr::counter_ctl(tile, counter)
            }
        }
    }

    /// Counter value register of a tile's counter
    pub fn counter_value(&self, tile: usize, counter: usize) -> u64 {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::msr::counter_value(tile, counter),
            AddressingScheme::IceLake => icelake::cha::msr::counter_value(tile, counter),
            AddressingScheme::SapphireRapids => {
                sapphirerapids::cha::msr::counter_value(tile, counter)
            }
        }
    }

    /// Clear-counters write issued before programming, where the layout wants one
    pub fn clear_counters(&self, tile: usize) -> Option<FilterWrite> {
        match self {
            AddressingScheme::IceLake => Some(FilterWrite {
                address: self.unit_ctl(tile),
                value: icelake::cha::clear_counters(),
            }),
            AddressingScheme::SkylakeServer | AddressingScheme::SapphireRapids => None,
        }
    }

    /// Filter writes required for the default event to count anything
    pub fn filters(&self, tile: usize) -> Vec<FilterWrite> {
        match self {
            AddressingScheme::SkylakeServer => {
                let (filter0, filter1) = skylake::cha::filter_registers(tile);
                vec![filter0.write(), filter1.write()]
            }
            AddressingScheme::IceLake | AddressingScheme::SapphireRapids => Vec::new(),
        }
    }

    /// Read-intensity event used to localize line ownership
    pub fn default_event_select(&self) -> u64 {
        match self {
            AddressingScheme::SkylakeServer => skylake::cha::default_event_select(),
            AddressingScheme::IceLake => icelake::cha::default_event_select(),
            AddressingScheme::SapphireRapids => sapphirerapids::cha::default_event_select(),
        }
    }

    /// Global unfreeze write: (U_MSR_PMON_GLOBAL_CTL, value)
    pub fn global_unfreeze(&self) -> FilterWrite {
        match self {
            AddressingScheme::SkylakeServer | AddressingScheme::IceLake => FilterWrite {
                address: skylake::cha::global::U_MSR_PMON_GLOBAL_CTL,
                value: skylake::cha::global::UNFREEZE_ALL,
            },
            AddressingScheme::SapphireRapids => FilterWrite {
                address: sapphirerapids::cha::global::U_MSR_PMON_GLOBAL_CTL,
                value: sapphirerapids::cha::global::UNFREEZE_ALL,
            },
        }
    }

    /// Uncore fixed clock counter enable: (U_MSR_PMON_FIXED_CTL, value)
    pub fn fixed_counter_enable(&self) -> FilterWrite {
        match self {
            AddressingScheme::SkylakeServer | AddressingScheme::IceLake => FilterWrite {
                address: icelake::cha::global::U_MSR_PMON_FIXED_CTL,
                value: icelake::cha::global::FIXED_ENABLE,
            },
            AddressingScheme::SapphireRapids => FilterWrite {
                address: sapphirerapids::cha::global::U_MSR_PMON_FIXED_CTL,
                value: sapphirerapids::cha::global::FIXED_ENABLE,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [AddressingScheme; 3] = [
        AddressingScheme::SkylakeServer,
        AddressingScheme::IceLake,
        AddressingScheme::SapphireRapids,
    ];

    #[test]
    fn test_counter_addresses_distinct_per_scheme() {
        for scheme in ALL {
            let mut seen = HashSet::new();
            for tile in 0..scheme.max_tiles() {
                for counter in 0..COUNTERS_PER_TILE {
                    assert!(
                        seen.insert(scheme.counter_value(tile, counter)),
                        "{} tile {tile} counter {counter} collides",
                        scheme.name()
                    );
                    assert!(seen.insert(scheme.counter_ctl(tile, counter)));
                }
            }
        }
    }

    #[test]
    fn test_scheme_specific_writes() {
        assert!(AddressingScheme::IceLake.clear_counters(0).is_some());
        assert!(AddressingScheme::SkylakeServer.clear_counters(0).is_none());
        assert_eq!(AddressingScheme::SkylakeServer.filters(2).len(), 2);
        assert!(AddressingScheme::IceLake.filters(2).is_empty());
        assert!(AddressingScheme::SapphireRapids.filters(2).is_empty());
    }

    #[test]
    fn test_global_controls() {
        let unfreeze = AddressingScheme::IceLake.global_unfreeze();
        assert_eq!(unfreeze.address, 0x700);
        assert_eq!(unfreeze.value, 1 << 61);
        let fixed = AddressingScheme::SkylakeServer.fixed_counter_enable();
        assert_eq!(fixed.address, 0x703);
        assert_eq!(fixed.value, 0x0040_0000);
        assert_eq!(AddressingScheme::SapphireRapids.global_unfreeze().address, 0x2FF0);
    }

    #[test]
    fn test_widths() {
        for scheme in ALL {
            assert_eq!(scheme.counter_width_bits(), 48);
        }
    }
}
