//! Compose stages over the Redfish API
//!
//! The pod allocates CPU, memory, NICs and drives in a single `Allocate`
//! call, so volume creation and interface attachment are implicit. Only
//! the node itself has to be removed on rollback.

use super::discovery::scan_node;
use super::resources::{fetch, Node, ALLOCATE, NODES};
use crate::allocation::{CompositionPlan, DiskPlacement, PlannedDisk, PlannedInterface};
use crate::compose::{ComposeSteps, CreatedVolume, MachineHandle, PollPolicy, PollStatus};
use crate::domain::DiscoveredMachine;
use crate::error::{Error, ResourceKind, Result};
use crate::inventory::GIB;
use crate::session::RedfishClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Most processors a single allocation is split across
pub const MAX_PROCESSORS: u64 = 8;

const IQN_PREFIX: &str = "iqn.2010-08.io.maas";

pub fn node_path(node_id: &str) -> String {
    format!("{}/{}", NODES, node_id)
}

/// Whole GiB covering `bytes`
fn capacity_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

// =============================================================================
// Node Actions
// =============================================================================

/// Drive a node to an assembled state and return its `ComposedNodeState`.
///
/// `Allocated` nodes are asked to assemble; `Assembling` is waited out
/// under `poll`; `Failed` is terminal.
pub async fn assemble_node(client: &RedfishClient, poll: &PollPolicy, node_id: &str) -> Result<String> {
    let path = node_path(node_id);
    poll.poll_until("node assembly", || {
        let path = path.clone();
        async move {
            let node: Node = fetch(client, &path).await?;
            match node.composed_state.as_deref() {
                Some(state @ ("PoweredOn" | "PoweredOff")) => Ok(PollStatus::Ready(state.to_string())),
                Some("Allocated") => {
                    info!("Assembling node {}", node.id);
                    client
                        .post(&format!("{}/Actions/ComposedNode.Assemble", path), json!({}))
                        .await?;
                    Ok(PollStatus::Pending)
                }
                Some("Assembling" | "Allocating") => Ok(PollStatus::Pending),
                Some("Failed") => Err(Error::PodFatal(format!(
                    "node {} failed to assemble",
                    node.id
                ))),
                other => Err(Error::pod_action(
                    format!("assemble node {}", node.id),
                    format!("unexpected ComposedNodeState {:?}", other),
                )),
            }
        }
    })
    .await
}

/// Boot from the network on the next power on only
pub async fn set_pxe_boot(client: &RedfishClient, node_id: &str) -> Result<()> {
    client
        .patch(
            &node_path(node_id),
            json!({"Boot": {
                "BootSourceOverrideEnabled": "Once",
                "BootSourceOverrideTarget": "Pxe"
            }}),
        )
        .await
        .map(|_| ())
}

/// `ComposedNode.Reset` with the given `ResetType`
pub async fn reset_node(client: &RedfishClient, node_id: &str, reset_type: &str) -> Result<()> {
    debug!("Reset {} on node {}", reset_type, node_id);
    client
        .post(
            &format!("{}/Actions/ComposedNode.Reset", node_path(node_id)),
            json!({"ResetType": reset_type}),
        )
        .await
        .map(|_| ())
}

// =============================================================================
// Allocation Request
// =============================================================================

/// Processor layouts to try, from one large processor down to
/// [`MAX_PROCESSORS`] small ones. Requested cores are threads.
pub fn processor_layouts(cores: u64) -> Vec<(u64, u64)> {
    let mut layouts = Vec::new();
    let mut processors = 1;
    let mut per_processor = (cores / 2).max(1);
    while processors <= MAX_PROCESSORS && per_processor >= 1 {
        layouts.push((processors, per_processor));
        processors *= 2;
        per_processor /= 2;
    }
    layouts
}

/// `Allocate` body for one processor layout
pub fn allocation_body(plan: &CompositionPlan, processors: u64, cores_each: u64) -> Value {
    let mut processor = json!({
        "TotalCores": cores_each,
        "InstructionSet": "x86-64",
    });
    if let Some(speed) = plan.cpu_speed {
        processor["AchievableSpeedMHz"] = json!(speed);
    }

    let mut local_drives = Vec::new();
    let mut remote_drives = Vec::new();
    for disk in &plan.disks {
        match &disk.placement {
            DiskPlacement::Fixed => {
                local_drives.push(json!({"CapacityGiB": capacity_gib(disk.size)}));
            }
            DiskPlacement::RemoteClone { master_path, .. } => {
                remote_drives.push(json!({
                    "CapacityGiB": capacity_gib(disk.size),
                    "iSCSIAddress": format!("{}:{}", IQN_PREFIX, Uuid::new_v4()),
                    "Master": {
                        "Type": "Snapshot",
                        "Address": {"@odata.id": format!("/{}", master_path)},
                    },
                }));
            }
            DiskPlacement::Pool { .. } => {}
        }
    }

    json!({
        "Name": plan.hostname,
        "Processors": vec![processor; processors as usize],
        "Memory": [{"CapacityMiB": plan.memory}],
        "EthernetInterfaces": vec![json!({}); plan.interfaces.len()],
        "LocalDrives": local_drives,
        "RemoteDrives": remote_drives,
    })
}

// =============================================================================
// Compose Steps
// =============================================================================

/// Compose stages against one RSD pod
pub struct RsdComposeSteps<'a> {
    client: &'a RedfishClient,
    poll: PollPolicy,
}

impl<'a> RsdComposeSteps<'a> {
    pub fn new(client: &'a RedfishClient, poll: PollPolicy) -> Self {
        Self { client, poll }
    }

    async fn node_paths(&self) -> Result<BTreeSet<String>> {
        Ok(self.client.members(NODES).await?.into_iter().collect())
    }

    /// Try each processor layout until the pod accepts one
    async fn allocate(&self, plan: &CompositionPlan) -> Result<()> {
        let mut last_rejection = String::from("no processor layout to try");
        for (processors, cores_each) in processor_layouts(plan.cores) {
            let body = allocation_body(plan, processors, cores_each);
            match self.client.post(ALLOCATE, body).await {
                Ok(_) => {
                    info!(
                        "Allocated {} with {} x {} core processor(s)",
                        plan.hostname, processors, cores_each
                    );
                    return Ok(());
                }
                Err(Error::PodAction { message, .. }) => {
                    debug!(
                        "Allocation of {} x {} cores rejected: {}",
                        processors, cores_each, message
                    );
                    last_rejection = message;
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::insufficient(
            ResourceKind::Cores,
            format!(
                "pod rejected every processor layout for {} cores: {}",
                plan.cores, last_rejection
            ),
        ))
    }

    /// Path of the node `Allocate` just created. Nodes composed by someone
    /// else in the meantime are told apart by their `Name`.
    async fn allocated_node(&self, before: &BTreeSet<String>, hostname: &str) -> Result<String> {
        let created: Vec<String> = self.node_paths().await?.difference(before).cloned().collect();
        if let [path] = created.as_slice() {
            return Ok(path.clone());
        }

        let mut named = Vec::new();
        for path in &created {
            let node: Node = fetch(self.client, path).await?;
            if node.name.as_deref() == Some(hostname) {
                named.push(path.clone());
            }
        }
        match named.as_slice() {
            [] => Err(Error::pod_action(
                "allocate",
                format!(
                    "allocation succeeded but no new node is named {} ({} other new node(s))",
                    hostname,
                    created.len()
                ),
            )),
            [path] => Ok(path.clone()),
            [path, ..] => {
                warn!("{} new nodes are named {}; using {}", named.len(), hostname, path);
                Ok(path.clone())
            }
        }
    }

    /// Delete nodes named `hostname` created since `before`.
    ///
    /// Runs when the allocated node cannot be identified, so nothing is
    /// left behind on the pod. Failures are only logged.
    async fn release_allocation(&self, before: &BTreeSet<String>, hostname: &str) {
        let created: Vec<String> = match self.node_paths().await {
            Ok(after) => after.difference(before).cloned().collect(),
            Err(err) => {
                warn!("Cannot list nodes to release allocation of {}: {}", hostname, err);
                return;
            }
        };
        for path in created {
            match fetch::<Node>(self.client, &path).await {
                Ok(node) if node.name.as_deref() == Some(hostname) => {
                    match self.client.delete(&path).await {
                        Ok(_) => info!("Released node {} allocated for {}", path, hostname),
                        Err(err) => warn!("Failed to release node {}: {}", path, err),
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("Cannot read node {}: {}", path, err),
            }
        }
    }
}

#[async_trait]
impl<'a> ComposeSteps for RsdComposeSteps<'a> {
    /// Drives are created by the allocation itself
    async fn create_volume(
        &mut self,
        _plan: &CompositionPlan,
        disk: &PlannedDisk,
    ) -> Result<Option<CreatedVolume>> {
        if let DiskPlacement::Pool { pool_name, .. } = &disk.placement {
            return Err(Error::Internal(format!(
                "RSD cannot place disk {} in pool {}",
                disk.index, pool_name
            )));
        }
        Ok(None)
    }

    async fn delete_volume(&mut self, _volume: &CreatedVolume) -> Result<()> {
        Ok(())
    }

    async fn define_machine(&mut self, plan: &CompositionPlan) -> Result<MachineHandle> {
        let before = self.node_paths().await?;
        self.allocate(plan).await?;
        let path = match self.allocated_node(&before, &plan.hostname).await {
            Ok(path) => path,
            Err(err) => {
                self.release_allocation(&before, &plan.hostname).await;
                return Err(err);
            }
        };
        let id = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
        info!("Node {} allocated for {}", id, plan.hostname);

        Ok(MachineHandle {
            id,
            hostname: plan.hostname.clone(),
        })
    }

    async fn attach_interface(
        &mut self,
        _machine: &MachineHandle,
        _interface: &PlannedInterface,
    ) -> Result<()> {
        Ok(())
    }

    async fn attach_volume(
        &mut self,
        _machine: &MachineHandle,
        _volume: &CreatedVolume,
        _device: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn validate_startup(&mut self, machine: &MachineHandle) -> Result<()> {
        assemble_node(self.client, &self.poll, &machine.id).await.map(|_| ())
    }

    async fn finalize(
        &mut self,
        machine: &MachineHandle,
        _plan: &CompositionPlan,
    ) -> Result<DiscoveredMachine> {
        set_pxe_boot(self.client, &machine.id).await?;
        scan_node(self.client, &node_path(&machine.id)).await
    }

    async fn destroy_machine(&mut self, machine: &MachineHandle) -> Result<()> {
        if !self.client.delete(&node_path(&machine.id)).await? {
            debug!("Node {} was already gone", machine.id);
        }
        Ok(())
    }

    fn device_prefix(&self) -> &str {
        "sd"
    }
}
