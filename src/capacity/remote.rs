//! Remote (iSCSI) storage accounting
//!
//! A volume group's raw capacity is split between leaf volumes. Volumes
//! without a consumer (no target, or only targets nobody uses) hold clone
//! sources and are not usable headroom. Volumes behind an in-use target are
//! allocations. The master volume of a group is the one with the lowest
//! numeric id.

use crate::domain::{LogicalVolume, VolumeGroup};
use serde::Serialize;

/// Derived capacity of one volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeGroupCapacity {
    pub group_id: String,
    /// Usable bytes once idle volumes are excluded
    pub total: u64,
    /// Usable bytes not yet allocated
    pub available: u64,
    /// Clone source for new volumes
    pub master: Option<LogicalVolume>,
}

impl VolumeGroupCapacity {
    pub fn from_group(group: &VolumeGroup) -> Self {
        let idle: u64 = group
            .logical_volumes
            .iter()
            .filter(|lv| !lv.is_consumed())
            .map(|lv| lv.capacity)
            .sum();
        let allocated: u64 = group
            .logical_volumes
            .iter()
            .filter(|lv| lv.is_consumed())
            .map(|lv| lv.capacity)
            .sum();
        let total = group.capacity.saturating_sub(idle);

        Self {
            group_id: group.id.clone(),
            total,
            available: total.saturating_sub(allocated),
            master: master_volume(group).cloned(),
        }
    }
}

/// The volume with the lowest numeric id
pub fn master_volume(group: &VolumeGroup) -> Option<&LogicalVolume> {
    group
        .logical_volumes
        .iter()
        .filter_map(|lv| lv.numeric_id().map(|id| (id, lv)))
        .min_by_key(|(id, _)| *id)
        .map(|(_, lv)| lv)
}

/// Capacity of every volume group, in discovery order
pub fn volume_group_capacities(groups: &[VolumeGroup]) -> Vec<VolumeGroupCapacity> {
    groups.iter().map(VolumeGroupCapacity::from_group).collect()
}

/// Sum of (total, available) across groups
pub fn iscsi_totals(groups: &[VolumeGroup]) -> (u64, u64) {
    volume_group_capacities(groups)
        .iter()
        .fold((0, 0), |(total, available), c| {
            (total + c.total, available + c.available)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TargetRef;
    use crate::inventory::GIB;

    fn lv(id: &str, gib: u64, targets: &[(&str, bool)]) -> LogicalVolume {
        LogicalVolume {
            id: id.into(),
            path: format!("/redfish/v1/Services/1/LogicalDrives/{}", id),
            capacity: gib * GIB,
            targets: targets
                .iter()
                .map(|(id, in_use)| TargetRef {
                    id: id.to_string(),
                    in_use: *in_use,
                })
                .collect(),
        }
    }

    fn group(capacity_gib: u64, volumes: Vec<LogicalVolume>) -> VolumeGroup {
        VolumeGroup {
            id: "1".into(),
            path: "/redfish/v1/Services/1/LogicalDrives/1".into(),
            capacity: capacity_gib * GIB,
            logical_volumes: volumes,
        }
    }

    #[test]
    fn test_idle_volumes_are_excluded_from_total() {
        let group = group(
            100,
            vec![
                lv("2", 20, &[]),
                lv("3", 10, &[("t1", false)]),
                lv("4", 30, &[("t2", true)]),
            ],
        );
        let capacity = VolumeGroupCapacity::from_group(&group);
        assert_eq!(capacity.total, 70 * GIB);
        assert_eq!(capacity.available, 40 * GIB);
    }

    #[test]
    fn test_master_is_lowest_numeric_id() {
        let group = group(
            100,
            vec![lv("12", 5, &[]), lv("3", 5, &[]), lv("x", 5, &[]), lv("7", 5, &[])],
        );
        assert_eq!(master_volume(&group).map(|lv| lv.id.as_str()), Some("3"));
    }

    #[test]
    fn test_group_without_volumes_has_no_master() {
        let capacity = VolumeGroupCapacity::from_group(&group(50, Vec::new()));
        assert_eq!(capacity.total, 50 * GIB);
        assert_eq!(capacity.available, 50 * GIB);
        assert!(capacity.master.is_none());
    }

    #[test]
    fn test_totals_across_groups() {
        let groups = vec![
            group(100, vec![lv("2", 20, &[])]),
            group(50, vec![lv("5", 10, &[("t", true)])]),
        ];
        assert_eq!(iscsi_totals(&groups), (130 * GIB, 120 * GIB));
    }
}
