// CHA counter programming: event selects, clears, filters and the uncore global enable

use slicemap_raw::COUNTERS_PER_TILE;

use crate::common::arch::HardwareProfile;
use crate::common::msr::RegisterChannel;
use crate::error::Result;

pub struct CounterProgrammer<'a> {
    profile: &'a HardwareProfile,
}

impl<'a> CounterProgrammer<'a> {
    pub fn new(profile: &'a HardwareProfile) -> Self {
        Self { profile }
    }

    /// Program every tile of one socket with the given event selects
    ///
    /// Writing the same values twice leaves the hardware in the same state.
    pub fn program(
        &self,
        channel: &dyn RegisterChannel,
        socket: u32,
        event_select: &[u64; COUNTERS_PER_TILE],
    ) -> Result<()> {
        for tile in 0..self.profile.tile_count {
            if let Some(clear) = self.profile.clear_register(tile) {
                channel.write(clear.address, clear.value)?;
            }

            for (counter, &value) in event_select.iter().enumerate() {
                channel.write(self.profile.control_address(tile, counter), value)?;
            }

            for filter in self.profile.filter_registers(tile) {
                channel.write(filter.address, filter.value)?;
            }
        }

        tracing::info!(
            "Programmed {} CHA units on socket {} with event selects [{}]",
            self.profile.tile_count,
            socket,
            event_select
                .iter()
                .map(|v| format!("0x{v:08x}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        for filter in self.profile.filter_registers(0) {
            tracing::info!(
                "Socket {} filter MSR 0x{:x} offset programmed to 0x{:x}",
                socket,
                filter.address - self.profile.scheme.unit_ctl(0),
                filter.value
            );
        }

        Ok(())
    }

    /// Unfreeze the uncore counters and enable the fixed clock counter of one socket
    pub fn global_enable(&self, channel: &dyn RegisterChannel, socket: u32) -> Result<()> {
        let unfreeze = self.profile.scheme.global_unfreeze();
        let fixed = self.profile.scheme.fixed_counter_enable();

        channel.write(unfreeze.address, unfreeze.value)?;
        channel.write(fixed.address, fixed.value)?;

        tracing::info!(
            "Socket {} uncore enabled: MSR 0x{:x} <- 0x{:x}, MSR 0x{:x} <- 0x{:x}",
            socket,
            unfreeze.address,
            unfreeze.value,
            fixed.address,
            fixed.value
        );
        Ok(())
    }
}
