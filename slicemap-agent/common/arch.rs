// Processor identification and CHA hardware profile resolution

use once_cell::sync::{Lazy, OnceCell};
use slicemap_raw::{AddressingScheme, FilterWrite, COUNTERS_PER_TILE};

use crate::common::cpuid;
use crate::enum_with_data;
use crate::error::{Result, SliceMapError};

enum_with_data! {
    pub enum ProcessorModel: u32 {
        HaswellEp => ("Haswell EP", 0x0003_06f0),
        SkylakeServer => ("Skylake Xeon/Cascade Lake Xeon", 0x0005_0650),
        IceLakeServer => ("Ice Lake Xeon", 0x0006_06a0),
        SapphireRapids => ("Sapphire Rapids Xeon", 0x0008_06f0),
    }
    impl signature -> u32
}

impl ProcessorModel {
    pub fn from_signature(signature: u32) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|model| model.signature() == signature)
    }

    /// CHA register layout, `None` for recognised but unsupported models
    pub fn addressing_scheme(&self) -> Option<AddressingScheme> {
        match self {
            ProcessorModel::HaswellEp => None,
            ProcessorModel::SkylakeServer => Some(AddressingScheme::SkylakeServer),
            ProcessorModel::IceLakeServer => Some(AddressingScheme::IceLake),
            ProcessorModel::SapphireRapids => Some(AddressingScheme::SapphireRapids),
        }
    }
}

pub static CPU_SIGNATURE: Lazy<u32> = Lazy::new(cpuid::signature);

static DETECTED_PROFILE: OnceCell<HardwareProfile> = OnceCell::new();

/// Everything the counter paths need to know about the running processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareProfile {
    pub signature: u32,
    pub model: ProcessorModel,
    pub scheme: AddressingScheme,
    pub tile_count: usize,
    pub counter_width_bits: u32,
    pub default_event_select: [u64; COUNTERS_PER_TILE],
}

impl HardwareProfile {
    /// Map a normalized signature to its profile
    ///
    /// Unknown and unsupported signatures fail here, before any MSR is touched.
    pub fn resolve(signature: u32) -> Result<Self> {
        let model = ProcessorModel::from_signature(signature).ok_or(
            SliceMapError::UnsupportedProcessor {
                signature,
                model: "unknown model",
            },
        )?;

        let scheme = model
            .addressing_scheme()
            .ok_or(SliceMapError::UnsupportedProcessor {
                signature,
                model: model.name(),
            })?;

        tracing::info!(
            "CPUID Signature 0x{:x} identified as {}",
            signature,
            model.name()
        );

        Ok(Self {
            signature,
            model,
            scheme,
            tile_count: scheme.max_tiles(),
            counter_width_bits: scheme.counter_width_bits(),
            default_event_select: [scheme.default_event_select(); COUNTERS_PER_TILE],
        })
    }

    /// Profile of the processor this process runs on, resolved once
    pub fn detected() -> Result<&'static HardwareProfile> {
        DETECTED_PROFILE.get_or_try_init(|| Self::resolve(*CPU_SIGNATURE))
    }

    /// Restrict the tile range for SKUs with fewer CHAs than the layout maximum
    pub fn with_tile_count(mut self, tile_count: usize) -> Result<Self> {
        if tile_count == 0 || tile_count > self.scheme.max_tiles() {
            return Err(SliceMapError::InvalidConfiguration(format!(
                "{} supports 1..={} tiles per socket, got {}",
                self.model.name(),
                self.scheme.max_tiles(),
                tile_count
            )));
        }
        self.tile_count = tile_count;
        Ok(self)
    }

    /// Counter value register of (tile, counter)
    pub fn counter_address(&self, tile: usize, counter: usize) -> u64 {
        self.scheme.counter_value(tile, counter)
    }

    /// Event-select register of (tile, counter)
    pub fn control_address(&self, tile: usize, counter: usize) -> u64 {
        self.scheme.counter_ctl(tile, counter)
    }

    pub fn clear_register(&self, tile: usize) -> Option<FilterWrite> {
        self.scheme.clear_counters(tile)
    }

    pub fn filter_registers(&self, tile: usize) -> Vec<FilterWrite> {
        self.scheme.filters(tile)
    }
}
