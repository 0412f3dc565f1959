//! Storage placement
//!
//! Assigns each requested disk to a pool or a volume group master. Running
//! counters are kept per pool and per group so two disks in one request can
//! never book the same headroom.

use crate::capacity::VolumeGroupCapacity;
use crate::domain::{PoolRef, StoragePool, StoragePoolType, VolumeGroup};
use crate::error::{Error, ResourceKind, Result};
use crate::inventory::units::human_size;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Local storage model of a pod
#[derive(Debug, Clone)]
pub enum LocalStorage {
    /// Volumes are carved from storage pools
    Pools {
        pools: Vec<StoragePool>,
        default_pool: Option<PoolRef>,
    },
    /// Fixed physical disks; only total headroom is known
    Fixed { available: u64 },
}

/// Concrete location chosen for one disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DiskPlacement {
    Pool {
        pool_id: String,
        pool_name: String,
        pool_type: StoragePoolType,
        pool_path: String,
    },
    Fixed,
    RemoteClone {
        group_id: String,
        master_id: String,
        master_path: String,
    },
}

impl DiskPlacement {
    pub fn is_remote(&self) -> bool {
        matches!(self, DiskPlacement::RemoteClone { .. })
    }
}

struct PoolSlot {
    pool: StoragePool,
    remaining: u64,
}

struct GroupSlot {
    capacity: VolumeGroupCapacity,
    remaining: u64,
}

// =============================================================================
// Storage Placer
// =============================================================================

/// Placement engine for the disks of one compose request
pub struct StoragePlacer {
    pools: IndexMap<String, PoolSlot>,
    default_pool: Option<String>,
    fixed_remaining: Option<u64>,
    groups: IndexMap<String, GroupSlot>,
}

impl StoragePlacer {
    /// Build the placer. The default pool reference is resolved here, once.
    pub fn new(local: &LocalStorage, volume_groups: &[VolumeGroup]) -> Self {
        let mut pools = IndexMap::new();
        let mut default_pool = None;
        let mut fixed_remaining = None;

        match local {
            LocalStorage::Pools {
                pools: discovered,
                default_pool: reference,
            } => {
                for pool in discovered {
                    pools.insert(
                        pool.id.clone(),
                        PoolSlot {
                            pool: pool.clone(),
                            remaining: pool.available,
                        },
                    );
                }
                if let Some(reference) = reference {
                    match reference.resolve(discovered) {
                        Some(pool) => default_pool = Some(pool.id.clone()),
                        None => warn!("Default storage pool {} not found; ignoring", reference),
                    }
                }
            }
            LocalStorage::Fixed { available } => fixed_remaining = Some(*available),
        }

        let groups = volume_groups
            .iter()
            .map(|group| {
                let capacity = VolumeGroupCapacity::from_group(group);
                let remaining = capacity.available;
                (group.id.clone(), GroupSlot { capacity, remaining })
            })
            .collect();

        Self {
            pools,
            default_pool,
            fixed_remaining,
            groups,
        }
    }

    /// Names of all pools, for tag interpretation
    pub fn pool_names(&self) -> Vec<&str> {
        self.pools.values().map(|s| s.pool.name.as_str()).collect()
    }

    /// Place a local disk, optionally in a named pool.
    ///
    /// A named pool that is too small fails the request; there is no
    /// fallback to another pool.
    pub fn place_local(&mut self, index: usize, size: u64, named: Option<&str>) -> Result<DiskPlacement> {
        if let Some(remaining) = self.fixed_remaining.as_mut() {
            if *remaining < size {
                return Err(Error::insufficient(
                    ResourceKind::LocalStorage,
                    format!(
                        "disk {} needs {} but only {} of local storage is free",
                        index,
                        human_size(size),
                        human_size(*remaining)
                    ),
                ));
            }
            *remaining -= size;
            return Ok(DiskPlacement::Fixed);
        }

        let chosen = match named {
            Some(name) => {
                let slot = self
                    .pools
                    .values()
                    .find(|s| s.pool.name == name)
                    .ok_or_else(|| {
                        Error::insufficient(
                            ResourceKind::LocalStorage,
                            format!("disk {} requested unknown pool '{}'", index, name),
                        )
                    })?;
                if slot.remaining < size {
                    return Err(Error::insufficient(
                        ResourceKind::LocalStorage,
                        format!(
                            "disk {} needs {} but pool '{}' has {} available",
                            index,
                            human_size(size),
                            name,
                            human_size(slot.remaining)
                        ),
                    ));
                }
                slot.pool.id.clone()
            }
            None => self.first_fit(size).ok_or_else(|| {
                Error::insufficient(
                    ResourceKind::LocalStorage,
                    format!(
                        "no storage pool has {} available for disk {}",
                        human_size(size),
                        index
                    ),
                )
            })?,
        };

        let slot = self
            .pools
            .get_mut(&chosen)
            .ok_or_else(|| Error::Internal(format!("pool {} vanished during planning", chosen)))?;
        slot.remaining -= size;
        debug!(
            "Disk {} ({}) placed in pool {}, {} left",
            index,
            human_size(size),
            slot.pool.name,
            human_size(slot.remaining)
        );
        Ok(DiskPlacement::Pool {
            pool_id: slot.pool.id.clone(),
            pool_name: slot.pool.name.clone(),
            pool_type: slot.pool.pool_type,
            pool_path: slot.pool.path.clone(),
        })
    }

    /// Place a remote disk as a clone of the first group master with room
    pub fn place_remote(&mut self, index: usize, size: u64) -> Result<DiskPlacement> {
        let slot = self
            .groups
            .values_mut()
            .find(|g| g.capacity.master.is_some() && g.remaining >= size)
            .ok_or_else(|| {
                Error::insufficient(
                    ResourceKind::RemoteStorage,
                    format!(
                        "no volume group master has {} available for disk {}",
                        human_size(size),
                        index
                    ),
                )
            })?;
        let master = slot
            .capacity
            .master
            .as_ref()
            .ok_or_else(|| Error::Internal("volume group lost its master".into()))?;

        slot.remaining -= size;
        debug!(
            "Disk {} ({}) cloned from master {} in group {}",
            index,
            human_size(size),
            master.id,
            slot.capacity.group_id
        );
        Ok(DiskPlacement::RemoteClone {
            group_id: slot.capacity.group_id.clone(),
            master_id: master.id.clone(),
            master_path: master.path.clone(),
        })
    }

    /// Default pool first, then discovery order
    fn first_fit(&self, size: u64) -> Option<String> {
        let default = self
            .default_pool
            .as_ref()
            .and_then(|id| self.pools.get(id))
            .filter(|slot| slot.remaining >= size);
        default
            .or_else(|| self.pools.values().find(|slot| slot.remaining >= size))
            .map(|slot| slot.pool.id.clone())
    }
}
