//! RSD inventory scraping
//!
//! Systems give the raw hardware, composed nodes say which systems are in
//! use, and storage services describe the volume groups remote drives are
//! cloned from. One GET per resource; nothing is cached between calls.

use super::resources::{
    fetch, Device, EthernetInterface, Link, LogicalDrive, MemoryModule, Node, Port, Processor,
    Target, Vlan, NODES, SERVICES, SYSTEMS,
};
use crate::capacity::{iscsi_totals, CapacityCalculator, PodTotals};
use crate::domain::{
    BlockDevice, BlockDeviceType, Capability, DiscoveredMachine, DiscoveredPod, LogicalVolume,
    NetworkInterface, PowerParameters, PowerState, TargetRef, VolumeGroup,
};
use crate::error::{Error, Result};
use crate::inventory::units::gib_to_bytes;
use crate::inventory::{mark_boot_interface, require_canonical, speed_tags};
use crate::session::RedfishClient;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Machine-scoped parameter naming the composed node
pub const NODE_ID: &str = "node_id";

pub const CAPABILITIES: &[Capability] = &[
    Capability::Composable,
    Capability::FixedLocalStorage,
    Capability::IscsiStorage,
];

fn partial(resource: &str, reason: impl Into<String>) -> Error {
    Error::PartialDiscovery {
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

/// Node power state as reported in `PowerState`
pub fn node_power_state(state: Option<&str>) -> PowerState {
    match state {
        Some("On" | "PoweringOn" | "PoweringOff") => PowerState::On,
        Some("Off") => PowerState::Off,
        _ => PowerState::Unknown,
    }
}

// =============================================================================
// Systems
// =============================================================================

/// Hardware of one system
#[derive(Debug, Clone)]
pub struct SystemInventory {
    pub path: String,
    pub architecture: String,
    pub cores: u64,
    /// Fastest processor, MHz
    pub cpu_speed: u64,
    /// MiB
    pub memory: u64,
    pub block_devices: Vec<BlockDevice>,
    pub interfaces: Vec<NetworkInterface>,
}

pub async fn scan_system(client: &RedfishClient, path: &str) -> Result<SystemInventory> {
    let mut cores = 0;
    let mut cpu_speed = 0;
    let mut architecture = None;
    for processor_path in client.members(&format!("{}/Processors", path)).await? {
        let processor: Processor = fetch(client, &processor_path).await?;
        cores += processor
            .total_threads
            .ok_or_else(|| partial(&processor_path, "missing TotalThreads"))?;
        cpu_speed = cpu_speed.max(
            processor
                .max_speed_mhz
                .ok_or_else(|| partial(&processor_path, "missing MaxSpeedMHz"))?,
        );
        if architecture.is_none() {
            architecture = processor.architecture().map(str::to_string);
        }
    }
    let architecture = architecture.ok_or_else(|| partial(path, "no processor architecture"))?;
    let architecture = require_canonical(&architecture)?;

    let mut memory = 0;
    for module_path in client.members(&format!("{}/Memory", path)).await? {
        let module: MemoryModule = fetch(client, &module_path).await?;
        memory += module
            .capacity_mib
            .ok_or_else(|| partial(&module_path, "missing CapacityMiB"))?;
    }

    let mut block_devices = Vec::new();
    for adapter_path in client.members(&format!("{}/Adapters", path)).await? {
        for device_path in client.members(&format!("{}/Devices", adapter_path)).await? {
            let device: Device = fetch(client, &device_path).await?;
            let capacity = device
                .capacity_gib
                .ok_or_else(|| partial(&device_path, "missing CapacityGiB"))?;
            let mut block = BlockDevice::local(gib_to_bytes(capacity));
            block.model = device.model;
            block.serial = device.serial_number;
            if device.device_type.as_deref() == Some("SSD") {
                block.tags.push("ssd".into());
            }
            block_devices.push(block);
        }
    }

    let mut interfaces = Vec::new();
    for interface_path in client.members(&format!("{}/EthernetInterfaces", path)).await? {
        let interface: EthernetInterface = fetch(client, &interface_path).await?;
        let vid = match interface.neighbor_port() {
            Some(port) => primary_vlan(client, port).await?,
            None => None,
        };
        interfaces.push(NetworkInterface {
            mac_address: interface.mac_address.clone().unwrap_or_default(),
            vid,
            tags: speed_tags(interface.speed_mbps.unwrap_or(0)),
            boot: false,
            attach_type: None,
            attach_name: None,
        });
    }
    mark_boot_interface(&mut interfaces, |_| false);

    Ok(SystemInventory {
        path: path.to_string(),
        architecture,
        cores,
        cpu_speed,
        memory,
        block_devices,
        interfaces,
    })
}

async fn primary_vlan(client: &RedfishClient, port: &Link) -> Result<Option<u16>> {
    let port: Port = fetch(client, port.path()).await?;
    match port.links.primary_vlan {
        Some(vlan) => Ok(fetch::<Vlan>(client, vlan.path()).await?.vlan_id),
        None => Ok(None),
    }
}

// =============================================================================
// Storage Services
// =============================================================================

/// Logical drives and targets of all storage services
#[derive(Debug, Clone, Default)]
pub struct StorageInventory {
    pub volume_groups: Vec<VolumeGroup>,
    drives: BTreeMap<String, LogicalDrive>,
    targets: BTreeMap<String, Target>,
}

impl StorageInventory {
    /// A remote drive as a machine block device
    pub fn remote_device(&self, target_path: &str) -> Option<BlockDevice> {
        let target = self.targets.get(target_path)?;
        let size: u64 = target
            .logical_drives()
            .filter_map(|link| self.drives.get(link.path()))
            .filter_map(|drive| drive.capacity_gib)
            .map(gib_to_bytes)
            .sum();
        let mut device = BlockDevice::local(size);
        device.device_type = BlockDeviceType::Iscsi;
        device.iscsi_target = target.iqn().map(str::to_string);
        device.tags.push("iscsi".into());
        Some(device)
    }
}

/// Scan storage services. `in_use` holds the target paths composed nodes
/// mount as remote drives.
pub async fn scan_storage(client: &RedfishClient, in_use: &BTreeSet<String>) -> Result<StorageInventory> {
    let mut inventory = StorageInventory::default();
    for service in client.members(SERVICES).await? {
        for drive_path in client.members(&format!("{}/LogicalDrives", service)).await? {
            let drive: LogicalDrive = fetch(client, &drive_path).await?;
            inventory.drives.insert(drive_path, drive);
        }
        for target_path in client.members(&format!("{}/Targets", service)).await? {
            let target: Target = fetch(client, &target_path).await?;
            inventory.targets.insert(target_path, target);
        }
    }

    for (path, group) in inventory.drives.iter().filter(|(_, d)| d.mode.as_deref() == Some("LVG")) {
        let capacity = match group.capacity_gib {
            Some(gib) => gib_to_bytes(gib),
            None => {
                warn!("Skipping volume group {}: missing CapacityGiB", path);
                continue;
            }
        };
        let logical_volumes = group
            .links
            .logical_drives
            .iter()
            .filter_map(|link| {
                let volume = inventory.drives.get(link.path())?;
                if volume.mode.as_deref() != Some("LV") {
                    return None;
                }
                Some(LogicalVolume {
                    id: volume.id.clone(),
                    path: link.path().to_string(),
                    capacity: volume.capacity_gib.map(gib_to_bytes).unwrap_or(0),
                    targets: volume
                        .links
                        .targets
                        .iter()
                        .map(|t| TargetRef {
                            id: t.path().to_string(),
                            in_use: in_use.contains(t.path()),
                        })
                        .collect(),
                })
            })
            .collect();
        inventory.volume_groups.push(VolumeGroup {
            id: group.id.clone(),
            path: path.clone(),
            capacity,
            logical_volumes,
        });
    }
    Ok(inventory)
}

// =============================================================================
// Pod
// =============================================================================

/// Composed nodes by path
pub async fn scan_nodes(client: &RedfishClient) -> Result<BTreeMap<String, Node>> {
    let mut nodes = BTreeMap::new();
    for path in client.members(NODES).await? {
        let node: Node = fetch(client, &path).await?;
        nodes.insert(path, node);
    }
    Ok(nodes)
}

fn machine_for(node: &Node, system: &SystemInventory, storage: &StorageInventory) -> DiscoveredMachine {
    let mut block_devices = system.block_devices.clone();
    block_devices.extend(
        node.links
            .remote_drives
            .iter()
            .filter_map(|target| storage.remote_device(target.path())),
    );

    let mut power_parameters = PowerParameters::new();
    power_parameters.insert(NODE_ID.into(), node.id.clone());

    DiscoveredMachine {
        hostname: node
            .name
            .clone()
            .unwrap_or_else(|| format!("node-{}", node.id)),
        architecture: system.architecture.clone(),
        cores: system.cores,
        cpu_speed: system.cpu_speed,
        memory: system.memory,
        power_state: node_power_state(node.power_state.as_deref()),
        power_parameters,
        block_devices,
        interfaces: system.interfaces.clone(),
        tags: Vec::new(),
    }
}

/// Re-read one composed node as a machine
pub async fn scan_node(client: &RedfishClient, node_path: &str) -> Result<DiscoveredMachine> {
    let nodes = scan_nodes(client).await?;
    let node = nodes
        .get(node_path)
        .ok_or_else(|| partial(node_path, "node is not listed"))?;
    let system_path = node
        .links
        .computer_system
        .as_ref()
        .ok_or_else(|| partial(node_path, "no linked ComputerSystem"))?;
    let system = scan_system(client, system_path.path()).await?;

    let in_use: BTreeSet<String> = nodes
        .values()
        .flat_map(|n| n.links.remote_drives.iter().map(|t| t.path().to_string()))
        .collect();
    let storage = scan_storage(client, &in_use).await?;
    Ok(machine_for(node, &system, &storage))
}

/// Full pod inventory
pub async fn scan_pod(client: &RedfishClient) -> Result<DiscoveredPod> {
    let mut systems = BTreeMap::new();
    for path in client.members(SYSTEMS).await? {
        match scan_system(client, &path).await {
            Ok(system) => {
                systems.insert(path, system);
            }
            Err(err) if err.is_session_fatal() => return Err(err),
            Err(err) => warn!("RSD system {} excluded from discovery: {}", path, err),
        }
    }

    let nodes = scan_nodes(client).await?;
    let in_use: BTreeSet<String> = nodes
        .values()
        .flat_map(|n| n.links.remote_drives.iter().map(|t| t.path().to_string()))
        .collect();
    let storage = scan_storage(client, &in_use).await?;

    let mut machines = Vec::new();
    let mut allocated = BTreeSet::new();
    for (path, node) in &nodes {
        let system = node
            .links
            .computer_system
            .as_ref()
            .and_then(|link| systems.get(link.path()));
        match system {
            Some(system) => {
                allocated.insert(system.path.clone());
                machines.push(machine_for(node, system, &storage));
            }
            None => warn!("Composed node {} has no usable system; skipping", path),
        }
    }

    let mut architectures: Vec<String> = Vec::new();
    for system in systems.values() {
        if !architectures.contains(&system.architecture) {
            architectures.push(system.architecture.clone());
        }
    }
    let local_disks = systems.values().map(|s| s.block_devices.len() as u64).sum();
    let totals = PodTotals {
        cores: systems.values().map(|s| s.cores).sum(),
        cpu_speed: systems.values().map(|s| s.cpu_speed).max().unwrap_or(0),
        memory: systems.values().map(|s| s.memory).sum(),
        local_storage: systems
            .values()
            .flat_map(|s| s.block_devices.iter())
            .map(|d| d.size)
            .sum(),
        local_disks: Some(local_disks),
    };
    let free_speed = systems
        .values()
        .filter(|s| !allocated.contains(&s.path))
        .map(|s| s.cpu_speed)
        .max()
        .unwrap_or(0);

    let hints = CapacityCalculator::new()
        .with_cpu_speed_ceiling(free_speed)
        .with_iscsi()
        .hints(&totals, &machines, &storage.volume_groups);
    debug!(
        "RSD pod: {} system(s), {} composed node(s), {} volume group(s)",
        systems.len(),
        machines.len(),
        storage.volume_groups.len()
    );

    Ok(DiscoveredPod {
        architectures,
        capabilities: CAPABILITIES.to_vec(),
        cores: totals.cores,
        cpu_speed: totals.cpu_speed,
        memory: totals.memory,
        local_storage: totals.local_storage,
        local_disks: totals.local_disks,
        iscsi_storage: Some(iscsi_totals(&storage.volume_groups).0),
        storage_pools: Vec::new(),
        volume_groups: storage.volume_groups,
        machines,
        hints,
        tags: Vec::new(),
        discovered_at: Utc::now(),
    })
}
