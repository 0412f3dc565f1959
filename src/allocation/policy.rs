//! Disk placement intent
//!
//! Interprets the tag set on each requested block device. The first device
//! is the boot disk and always resolves to local storage.

use serde::{Deserialize, Serialize};

/// Tags that ask for local storage without naming a pool
pub const LOCAL_TAGS: &[&str] = &["local", "ssd", "hdd", "nvme"];

/// Tag that asks for a remote iSCSI volume
pub const ISCSI_TAG: &str = "iscsi";

// =============================================================================
// Disk Intent
// =============================================================================

/// Where a requested disk should be placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskIntent {
    /// Local storage, optionally in a named pool
    Local { pool: Option<String> },
    /// A clone of a remote volume group master
    Remote,
}

impl std::fmt::Display for DiskIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskIntent::Local { pool: Some(pool) } => write!(f, "local pool '{}'", pool),
            DiskIntent::Local { pool: None } => write!(f, "local"),
            DiskIntent::Remote => write!(f, "iscsi"),
        }
    }
}

/// Decide the intent of the disk at `index`.
///
/// `pool_names` are the pools the pod exposes; a tag matching one of them
/// names that pool. Untagged non-boot disks go remote only when the pod
/// supports iSCSI.
pub fn disk_intent(index: usize, tags: &[String], pool_names: &[&str], iscsi_supported: bool) -> DiskIntent {
    let named_pool = tags
        .iter()
        .find(|tag| pool_names.contains(&tag.as_str()))
        .cloned();

    if index == 0 {
        return DiskIntent::Local { pool: named_pool };
    }
    if named_pool.is_some() {
        return DiskIntent::Local { pool: named_pool };
    }
    if tags.iter().any(|t| t == ISCSI_TAG) {
        return DiskIntent::Remote;
    }
    if tags.iter().any(|t| LOCAL_TAGS.contains(&t.as_str())) {
        return DiskIntent::Local { pool: None };
    }
    if iscsi_supported {
        DiskIntent::Remote
    } else {
        DiskIntent::Local { pool: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_boot_disk_is_always_local() {
        assert_eq!(
            disk_intent(0, &tags(&["iscsi"]), &[], true),
            DiskIntent::Local { pool: None }
        );
        assert_eq!(
            disk_intent(0, &tags(&["fast"]), &["default", "fast"], true),
            DiskIntent::Local { pool: Some("fast".into()) }
        );
    }

    #[test]
    fn test_named_pool_wins_over_other_tags() {
        assert_eq!(
            disk_intent(1, &tags(&["iscsi", "fast"]), &["fast"], true),
            DiskIntent::Local { pool: Some("fast".into()) }
        );
    }

    #[test]
    fn test_untagged_secondary_disks() {
        assert_eq!(disk_intent(1, &[], &[], true), DiskIntent::Remote);
        assert_eq!(disk_intent(1, &[], &[], false), DiskIntent::Local { pool: None });
        assert_eq!(
            disk_intent(2, &tags(&["ssd"]), &[], true),
            DiskIntent::Local { pool: None }
        );
        assert_eq!(disk_intent(2, &tags(&["iscsi"]), &[], false), DiskIntent::Remote);
    }

    #[test]
    fn test_unknown_pool_tag_is_ignored() {
        assert_eq!(
            disk_intent(0, &tags(&["nonexistent"]), &["default"], false),
            DiskIntent::Local { pool: None }
        );
    }
}
