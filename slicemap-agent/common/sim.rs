// In-memory uncore used by unit tests in place of /dev/cpu/N/msr and huge pages

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use slicemap_raw::COUNTERS_PER_TILE;

use crate::common::arch::HardwareProfile;
use crate::common::hugepage::{LineStressor, PageInfoProvider, HUGE_PAGE_SIZE};
use crate::common::msr::RegisterChannel;
use crate::error::Result;

const SKX_SIGNATURE: u32 = 0x0005_0650;
const FIRST_PHYSICAL_BASE: u64 = 0x1_0000_0000;

type OwnerFn = dyn Fn(usize, usize) -> usize;

struct SimState {
    profile: HardwareProfile,
    registers: HashMap<u64, u64>,
    writes: Vec<(u64, u64)>,
    owner: Box<OwnerFn>,
    page_count: usize,
    /// Stress calls still to be answered with a second tile as loud as the owner
    ambiguous_stresses: u64,
    stress_calls: u64,
}

/// Skylake-layout uncore where each stressed line bumps its owner's counters
///
/// Clones share state, so a test can keep one handle while the session
/// owns the channel and the stressor.
#[derive(Clone)]
pub struct SimulatedUncore {
    state: Rc<RefCell<SimState>>,
}

pub struct SimulatedChannel {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedUncore {
    pub fn new(tile_count: usize, owner: impl Fn(usize, usize) -> usize + 'static) -> Self {
        let profile = HardwareProfile::resolve(SKX_SIGNATURE)
            .and_then(|p| p.with_tile_count(tile_count))
            .expect("simulated tile count within SKX range");
        Self {
            state: Rc::new(RefCell::new(SimState {
                profile,
                registers: HashMap::new(),
                writes: Vec::new(),
                owner: Box::new(owner),
                page_count: 4,
                ambiguous_stresses: 0,
                stress_calls: 0,
            })),
        }
    }

    pub fn with_pages(self, page_count: usize) -> Self {
        self.state.borrow_mut().page_count = page_count;
        self
    }

    pub fn profile(&self) -> HardwareProfile {
        self.state.borrow().profile.clone()
    }

    pub fn channel(&self) -> SimulatedChannel {
        SimulatedChannel {
            state: Rc::clone(&self.state),
        }
    }

    /// Make the next `count` probes see two tiles at full rate
    pub fn make_ambiguous(&self, count: u64) {
        self.state.borrow_mut().ambiguous_stresses = count;
    }

    pub fn set_register(&self, addr: u64, value: u64) {
        self.state.borrow_mut().registers.insert(addr, value);
    }

    pub fn register(&self, addr: u64) -> u64 {
        self.state.borrow().registers.get(&addr).copied().unwrap_or(0)
    }

    /// Every register write in issue order
    pub fn writes(&self) -> Vec<(u64, u64)> {
        self.state.borrow().writes.clone()
    }

    pub fn stress_calls(&self) -> u64 {
        self.state.borrow().stress_calls
    }
}

impl SimState {
    fn bump_tile(&mut self, tile: usize, amount: u64) {
        let mask = (1u64 << self.profile.counter_width_bits) - 1;
        for counter in 0..COUNTERS_PER_TILE {
            let addr = self.profile.counter_address(tile, counter);
            let value = self.registers.entry(addr).or_insert(0);
            *value = value.wrapping_add(amount) & mask;
        }
    }
}

impl RegisterChannel for SimulatedChannel {
    fn read(&self, addr: u64) -> Result<u64> {
        Ok(self
            .state
            .borrow()
            .registers
            .get(&addr)
            .copied()
            .unwrap_or(0))
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.registers.insert(addr, value);
        state.writes.push((addr, value));
        Ok(())
    }
}

impl LineStressor for SimulatedUncore {
    fn stress(&mut self, page: usize, line: usize, repetitions: u32) -> Result<f64> {
        let mut state = self.state.borrow_mut();
        state.stress_calls += 1;

        let tile_count = state.profile.tile_count;
        let owner = (state.owner)(page, line) % tile_count;
        state.bump_tile(owner, u64::from(repetitions));

        // Background traffic on every other tile
        for tile in (0..tile_count).filter(|&t| t != owner) {
            state.bump_tile(tile, (tile as u64 + line as u64) % 3);
        }

        if state.ambiguous_stresses > 0 {
            state.ambiguous_stresses -= 1;
            let rival = (owner + 1) % tile_count;
            state.bump_tile(rival, u64::from(repetitions));
        }

        Ok(f64::from(repetitions))
    }
}

impl PageInfoProvider for SimulatedUncore {
    fn page_count(&self) -> usize {
        self.state.borrow().page_count
    }

    fn physical_base(&self, page: usize) -> u64 {
        FIRST_PHYSICAL_BASE + (page * HUGE_PAGE_SIZE) as u64
    }
}
