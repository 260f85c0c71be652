use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{Result, SliceMapError};

/// Pins the calling thread to one CPU until dropped
///
/// The probe loop must issue its loads and flushes from a single core so that
/// every request enters the mesh from the same stop.
pub struct AffinityGuard {
    old_affinity: CpuSet,
    cpu: u32,
}

impl AffinityGuard {
    pub fn pin(cpu: u32) -> Result<Self> {
        let old_affinity = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| SliceMapError::AffinityError(format!("Failed to get affinity: {e}")))?;

        let mut new_affinity = CpuSet::new();
        new_affinity.set(cpu as usize).map_err(|e| {
            SliceMapError::AffinityError(format!("Failed to set CPU {cpu} in set: {e}"))
        })?;

        sched_setaffinity(Pid::from_raw(0), &new_affinity).map_err(|e| {
            SliceMapError::AffinityError(format!("Failed to set affinity to CPU {cpu}: {e}"))
        })?;

        tracing::info!("Pinned core under test to CPU {}", cpu);

        Ok(Self { old_affinity, cpu })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        let _ = sched_setaffinity(Pid::from_raw(0), &self.old_affinity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_guard_restores() {
        let before = sched_getaffinity(Pid::from_raw(0)).unwrap();
        if let Ok(guard) = AffinityGuard::pin(0) {
            assert_eq!(guard.cpu(), 0);
        }
        let after = sched_getaffinity(Pid::from_raw(0)).unwrap();
        for cpu in 0..CpuSet::count() {
            assert_eq!(before.is_set(cpu).unwrap(), after.is_set(cpu).unwrap());
        }
    }

    #[test]
    fn test_out_of_range_cpu_rejected() {
        let result = AffinityGuard::pin(u32::MAX);
        assert!(matches!(result, Err(SliceMapError::AffinityError(_))));
    }
}
