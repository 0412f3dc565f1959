//! Composition Planner
//!
//! Turns a [`ComposeRequest`] into a complete allocation plan before any
//! remote call is made. A request that cannot be satisfied in full fails
//! here and nothing is applied.

use super::network::{Attachment, NetworkInventory};
use super::placement::{DiskPlacement, LocalStorage, StoragePlacer};
use super::policy::{disk_intent, DiskIntent};
use crate::domain::{Capability, ComposeRequest, Hints, VolumeGroup};
use crate::error::{Error, ResourceKind, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Plan
// =============================================================================

/// A disk with its chosen location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDisk {
    pub index: usize,
    pub size: u64,
    pub tags: Vec<String>,
    pub placement: DiskPlacement,
}

impl PlannedDisk {
    pub fn is_boot(&self) -> bool {
        self.index == 0
    }
}

/// An interface with its chosen attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedInterface {
    pub index: usize,
    pub attachment: Attachment,
}

/// Validated allocation plan for one compose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionPlan {
    pub hostname: String,
    pub architecture: String,
    pub cores: u64,
    pub cpu_speed: Option<u64>,
    pub memory: u64,
    pub disks: Vec<PlannedDisk>,
    pub interfaces: Vec<PlannedInterface>,
}

// =============================================================================
// Inventory
// =============================================================================

/// Everything the planner knows about the pod
#[derive(Debug, Clone)]
pub struct PlanningInventory {
    pub capabilities: Vec<Capability>,
    pub architectures: Vec<String>,
    pub hints: Hints,
    pub local_storage: LocalStorage,
    pub volume_groups: Vec<VolumeGroup>,
    /// `None` when the pod assigns interfaces itself
    pub networks: Option<NetworkInventory>,
}

impl PlanningInventory {
    fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Stateless planner
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionPlanner;

impl CompositionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Produce a plan or fail without side effects
    pub fn plan(&self, request: &ComposeRequest, inventory: &PlanningInventory) -> Result<CompositionPlan> {
        if !inventory.architectures.iter().any(|a| a == &request.architecture) {
            return Err(Error::UnsupportedArchitecture {
                architecture: request.architecture.clone(),
            });
        }
        if request.block_devices.is_empty() {
            return Err(Error::Configuration(
                "compose request must include a boot disk".into(),
            ));
        }
        self.check_compute(request, inventory)?;

        let disks = self.plan_disks(request, inventory)?;
        let interfaces = self.plan_interfaces(request, inventory)?;

        let hostname = request
            .hostname
            .clone()
            .unwrap_or_else(generated_hostname);

        info!(
            "Planned {}: {} disk(s), {} interface(s)",
            hostname,
            disks.len(),
            interfaces.len()
        );

        Ok(CompositionPlan {
            hostname,
            architecture: request.architecture.clone(),
            cores: request.cores,
            cpu_speed: request.cpu_speed,
            memory: request.memory,
            disks,
            interfaces,
        })
    }

    fn check_compute(&self, request: &ComposeRequest, inventory: &PlanningInventory) -> Result<()> {
        if inventory.has(Capability::OverCommit) {
            return Ok(());
        }
        let hints = &inventory.hints;
        if request.cores as i64 > hints.cores {
            return Err(Error::insufficient(
                ResourceKind::Cores,
                format!("requested {} cores, {} available", request.cores, hints.cores),
            ));
        }
        if request.memory as i64 > hints.memory {
            return Err(Error::insufficient(
                ResourceKind::Memory,
                format!("requested {} MiB, {} MiB available", request.memory, hints.memory),
            ));
        }
        if let Some(speed) = request.cpu_speed {
            if hints.cpu_speed > 0 && speed > hints.cpu_speed {
                return Err(Error::insufficient(
                    ResourceKind::Cores,
                    format!("requested {} MHz, fastest available is {} MHz", speed, hints.cpu_speed),
                ));
            }
        }
        Ok(())
    }

    fn plan_disks(&self, request: &ComposeRequest, inventory: &PlanningInventory) -> Result<Vec<PlannedDisk>> {
        let mut placer = StoragePlacer::new(&inventory.local_storage, &inventory.volume_groups);
        let iscsi = inventory.has(Capability::IscsiStorage);
        let pool_names: Vec<String> = placer.pool_names().iter().map(|s| s.to_string()).collect();
        let pool_names: Vec<&str> = pool_names.iter().map(String::as_str).collect();

        request
            .block_devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let placement = match disk_intent(index, &device.tags, &pool_names, iscsi) {
                    DiskIntent::Local { pool } => placer.place_local(index, device.size, pool.as_deref())?,
                    DiskIntent::Remote => placer.place_remote(index, device.size)?,
                };
                Ok(PlannedDisk {
                    index,
                    size: device.size,
                    tags: device.tags.clone(),
                    placement,
                })
            })
            .collect()
    }

    fn plan_interfaces(
        &self,
        request: &ComposeRequest,
        inventory: &PlanningInventory,
    ) -> Result<Vec<PlannedInterface>> {
        let networks = match &inventory.networks {
            Some(networks) => networks,
            None => {
                return Ok((0..request.interfaces.len())
                    .map(|index| PlannedInterface {
                        index,
                        attachment: Attachment::PodManaged,
                    })
                    .collect())
            }
        };

        let mut networks = networks.clone();
        if !request.known_host_interfaces.is_empty() {
            networks.host_interfaces = request.known_host_interfaces.clone();
        }

        request
            .interfaces
            .iter()
            .enumerate()
            .map(|(index, requested)| {
                Ok(PlannedInterface {
                    index,
                    attachment: networks.attachment_for(index, requested)?,
                })
            })
            .collect()
    }
}

fn generated_hostname() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("composed-{}", &id[..8])
}
