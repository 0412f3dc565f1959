//! Redfish resource documents
//!
//! Only the fields the driver reads are modelled. Everything is optional on
//! the wire; completeness is checked where the values are used.

use crate::error::Result;
use crate::session::RedfishClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const SYSTEMS: &str = "redfish/v1/Systems";
pub const NODES: &str = "redfish/v1/Nodes";
pub const SERVICES: &str = "redfish/v1/Services";
pub const ALLOCATE: &str = "redfish/v1/Nodes/Actions/Allocate";

/// GET a resource and decode it
pub async fn fetch<T: DeserializeOwned>(client: &RedfishClient, path: &str) -> Result<T> {
    Ok(serde_json::from_value(client.get(path).await?)?)
}

/// `{"@odata.id": "/redfish/v1/..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Link {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
}

impl Link {
    /// Relative path without the leading slash
    pub fn path(&self) -> &str {
        self.odata_id.trim_start_matches('/')
    }

    /// Last path segment
    pub fn id(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_default()
    }
}

// =============================================================================
// Systems
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Processor {
    #[serde(rename = "TotalThreads")]
    pub total_threads: Option<u64>,
    #[serde(rename = "MaxSpeedMHz")]
    pub max_speed_mhz: Option<u64>,
    #[serde(rename = "InstructionSet")]
    pub instruction_set: Option<String>,
    #[serde(rename = "ProcessorArchitecture")]
    pub processor_architecture: Option<String>,
}

impl Processor {
    /// Vendor architecture, preferring the instruction set
    pub fn architecture(&self) -> Option<&str> {
        self.instruction_set
            .as_deref()
            .or(self.processor_architecture.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryModule {
    #[serde(rename = "CapacityMiB")]
    pub capacity_mib: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(rename = "Model")]
    pub model: Option<String>,
    #[serde(rename = "SerialNumber")]
    pub serial_number: Option<String>,
    #[serde(rename = "CapacityGiB")]
    pub capacity_gib: Option<f64>,
    #[serde(rename = "Type")]
    pub device_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RackScaleLinks {
    #[serde(rename = "NeighborPort")]
    pub neighbor_port: Option<Link>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OemLinks {
    #[serde(rename = "Intel_RackScale")]
    pub rack_scale: Option<RackScaleLinks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceLinks {
    #[serde(rename = "Oem")]
    pub oem: Option<OemLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EthernetInterface {
    #[serde(rename = "MACAddress")]
    pub mac_address: Option<String>,
    #[serde(rename = "SpeedMbps")]
    pub speed_mbps: Option<u64>,
    #[serde(rename = "Links", default)]
    pub links: InterfaceLinks,
}

impl EthernetInterface {
    pub fn neighbor_port(&self) -> Option<&Link> {
        self.links
            .oem
            .as_ref()?
            .rack_scale
            .as_ref()?
            .neighbor_port
            .as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortLinks {
    #[serde(rename = "PrimaryVLAN")]
    pub primary_vlan: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Port {
    #[serde(rename = "Links", default)]
    pub links: PortLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vlan {
    #[serde(rename = "VLANId")]
    pub vlan_id: Option<u16>,
}

// =============================================================================
// Composed Nodes
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeLinks {
    #[serde(rename = "ComputerSystem")]
    pub computer_system: Option<Link>,
    #[serde(rename = "RemoteDrives", default)]
    pub remote_drives: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "PowerState")]
    pub power_state: Option<String>,
    #[serde(rename = "ComposedNodeState")]
    pub composed_state: Option<String>,
    #[serde(rename = "Links", default)]
    pub links: NodeLinks,
}

// =============================================================================
// Storage Services
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogicalDriveLinks {
    #[serde(rename = "LogicalDrives", default)]
    pub logical_drives: Vec<Link>,
    #[serde(rename = "Targets", default)]
    pub targets: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogicalDrive {
    #[serde(rename = "Id")]
    pub id: String,
    /// `LVG` for volume groups, `LV` for volumes
    #[serde(rename = "Mode")]
    pub mode: Option<String>,
    #[serde(rename = "CapacityGiB")]
    pub capacity_gib: Option<f64>,
    #[serde(rename = "Links", default)]
    pub links: LogicalDriveLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetLun {
    #[serde(rename = "LUN")]
    pub lun: Option<u64>,
    #[serde(rename = "LogicalDrive")]
    pub logical_drive: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IscsiAddress {
    #[serde(rename = "TargetIQN")]
    pub target_iqn: Option<String>,
    #[serde(rename = "TargetLUN", default)]
    pub target_lun: Vec<TargetLun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetAddress {
    #[serde(rename = "iSCSI")]
    pub iscsi: Option<IscsiAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    #[serde(rename = "Addresses", default)]
    pub addresses: Vec<TargetAddress>,
}

impl Target {
    pub fn iqn(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find_map(|a| a.iscsi.as_ref()?.target_iqn.as_deref())
    }

    /// Logical drives exposed through this target
    pub fn logical_drives(&self) -> impl Iterator<Item = &Link> {
        self.addresses
            .iter()
            .filter_map(|a| a.iscsi.as_ref())
            .flat_map(|i| i.target_lun.iter())
            .filter_map(|lun| lun.logical_drive.as_ref())
    }
}
