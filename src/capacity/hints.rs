//! Hint derivation
//!
//! Hints are always recomputed from a complete snapshot: pod totals minus
//! what the currently discovered machines consume. They are never patched
//! incrementally after a compose or decompose.

use super::remote::iscsi_totals;
use crate::domain::{DiscoveredMachine, Hints, VolumeGroup};

/// Pod totals a hint computation starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodTotals {
    pub cores: u64,
    pub cpu_speed: u64,
    pub memory: u64,
    pub local_storage: u64,
    pub local_disks: Option<u64>,
}

/// Derives [`Hints`] from totals and the machines consuming them
#[derive(Debug, Clone, Default)]
pub struct CapacityCalculator {
    cpu_speed_ceiling: Option<u64>,
    iscsi: bool,
}

impl CapacityCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cpu speed ceiling, which otherwise equals the pod speed
    pub fn with_cpu_speed_ceiling(mut self, speed: u64) -> Self {
        self.cpu_speed_ceiling = Some(speed);
        self
    }

    /// Report iSCSI headroom from the volume groups
    pub fn with_iscsi(mut self) -> Self {
        self.iscsi = true;
        self
    }

    pub fn hints(
        &self,
        totals: &PodTotals,
        machines: &[DiscoveredMachine],
        volume_groups: &[VolumeGroup],
    ) -> Hints {
        let used_cores: u64 = machines.iter().map(|m| m.cores).sum();
        let used_memory: u64 = machines.iter().map(|m| m.memory).sum();
        let used_storage: u64 = machines.iter().map(|m| m.local_storage()).sum();
        let used_disks: u64 = machines.iter().map(|m| m.local_disks()).sum();

        Hints {
            cores: totals.cores as i64 - used_cores as i64,
            cpu_speed: self.cpu_speed_ceiling.unwrap_or(totals.cpu_speed),
            memory: totals.memory as i64 - used_memory as i64,
            local_storage: totals.local_storage as i64 - used_storage as i64,
            local_disks: totals
                .local_disks
                .map(|disks| disks as i64 - used_disks as i64),
            iscsi_storage: self
                .iscsi
                .then(|| iscsi_totals(volume_groups).1 as i64),
        }
    }
}
