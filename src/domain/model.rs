//! Pod inventory and composition types
//!
//! Every entity a driver returns is expressed in these normalized units:
//! cores as thread counts, memory in MiB, storage in bytes, cpu speed in MHz.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Capabilities and States
// =============================================================================

/// Optional features a pod may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Machines can be composed on demand
    Composable,
    /// Local disks are carved out of storage pools at compose time
    DynamicLocalStorage,
    /// Local disks are fixed physical devices
    FixedLocalStorage,
    /// Remote iSCSI volumes can be cloned for composed machines
    IscsiStorage,
    /// Cores and memory may be over-committed
    OverCommit,
    /// The pod exposes named storage pools
    StoragePools,
    /// Network attachment can use the host's known interfaces
    KnownHostInterfaces,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Composable => "composable",
            Capability::DynamicLocalStorage => "dynamic_local_storage",
            Capability::FixedLocalStorage => "fixed_local_storage",
            Capability::IscsiStorage => "iscsi_storage",
            Capability::OverCommit => "over_commit",
            Capability::StoragePools => "storage_pools",
            Capability::KnownHostInterfaces => "known_host_interfaces",
        };
        write!(f, "{}", name)
    }
}

/// Power state of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Unknown,
    Error,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
            PowerState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Supported storage pool backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePoolType {
    /// Directory-backed
    Dir,
    /// Filesystem-backed
    Fs,
    /// Logical-volume-backed
    Logical,
}

impl StoragePoolType {
    /// Parse a pool type name. Unsupported types yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dir" => Some(StoragePoolType::Dir),
            "fs" => Some(StoragePoolType::Fs),
            "logical" => Some(StoragePoolType::Logical),
            _ => None,
        }
    }

    /// Volumes in these pools are plain files
    pub fn is_file_backed(&self) -> bool {
        matches!(self, StoragePoolType::Dir | StoragePoolType::Fs)
    }
}

impl std::fmt::Display for StoragePoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoragePoolType::Dir => write!(f, "dir"),
            StoragePoolType::Fs => write!(f, "fs"),
            StoragePoolType::Logical => write!(f, "logical"),
        }
    }
}

/// A storage pool on the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    /// Pool identity (uuid for libvirt pools)
    pub id: String,
    pub name: String,
    pub pool_type: StoragePoolType,
    /// Target path on the host
    pub path: String,
    /// Total capacity in bytes
    pub storage: u64,
    /// Unallocated capacity in bytes as reported by the pod
    pub available: u64,
}

/// Reference to a storage pool by identity or by display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRef {
    ById(String),
    ByName(String),
}

impl PoolRef {
    /// Interpret a user-supplied pool reference. Values shaped like a uuid
    /// are identities, anything else is a name.
    pub fn parse(value: &str) -> Self {
        match uuid::Uuid::parse_str(value) {
            Ok(_) => PoolRef::ById(value.to_string()),
            Err(_) => PoolRef::ByName(value.to_string()),
        }
    }

    /// Find the referenced pool
    pub fn resolve<'a>(&self, pools: &'a [StoragePool]) -> Option<&'a StoragePool> {
        match self {
            PoolRef::ById(id) => pools.iter().find(|p| &p.id == id),
            PoolRef::ByName(name) => pools.iter().find(|p| &p.name == name),
        }
    }
}

impl std::fmt::Display for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolRef::ById(id) => write!(f, "id {}", id),
            PoolRef::ByName(name) => write!(f, "'{}'", name),
        }
    }
}

/// An iSCSI target exposing a logical volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub id: String,
    /// Whether some composed machine consumes the target
    pub in_use: bool,
}

/// A leaf logical volume inside a volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub id: String,
    /// Resource path used when referencing the volume as a clone source
    pub path: String,
    /// Capacity in bytes
    pub capacity: u64,
    pub targets: Vec<TargetRef>,
}

impl LogicalVolume {
    /// Numeric form of the volume id, if it has one
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    /// A volume is consumed when at least one of its targets is in use
    pub fn is_consumed(&self) -> bool {
        self.targets.iter().any(|t| t.in_use)
    }
}

/// A logical volume group on a remote storage service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub id: String,
    pub path: String,
    /// Raw capacity in bytes
    pub capacity: u64,
    pub logical_volumes: Vec<LogicalVolume>,
}

// =============================================================================
// Machines
// =============================================================================

/// Where a block device lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceType {
    Local,
    Iscsi,
}

/// A block device attached to a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub model: Option<String>,
    pub serial: Option<String>,
    /// Size in bytes
    pub size: u64,
    pub block_size: u64,
    pub tags: Vec<String>,
    /// Device name or by-id path
    pub id_path: Option<String>,
    pub device_type: BlockDeviceType,
    /// Owning pool id (weak back-reference)
    pub storage_pool: Option<String>,
    /// iSCSI target address for remote devices
    pub iscsi_target: Option<String>,
}

impl BlockDevice {
    /// A local device with the default 512-byte sector size
    pub fn local(size: u64) -> Self {
        Self {
            model: None,
            serial: None,
            size,
            block_size: 512,
            tags: Vec::new(),
            id_path: None,
            device_type: BlockDeviceType::Local,
            storage_pool: None,
            iscsi_target: None,
        }
    }
}

/// How an interface reaches the physical network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceAttachType {
    Network,
    Bridge,
    Macvlan,
}

impl std::fmt::Display for InterfaceAttachType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceAttachType::Network => write!(f, "network"),
            InterfaceAttachType::Bridge => write!(f, "bridge"),
            InterfaceAttachType::Macvlan => write!(f, "macvlan"),
        }
    }
}

/// A network interface on a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub mac_address: String,
    pub vid: Option<u16>,
    pub tags: Vec<String>,
    pub boot: bool,
    pub attach_type: Option<InterfaceAttachType>,
    pub attach_name: Option<String>,
}

/// Machine-scoped parameters used to re-address a machine later
pub type PowerParameters = BTreeMap<String, String>;

/// An existing or newly composed machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachine {
    pub hostname: String,
    pub architecture: String,
    pub cores: u64,
    /// MHz
    pub cpu_speed: u64,
    /// MiB
    pub memory: u64,
    pub power_state: PowerState,
    pub power_parameters: PowerParameters,
    pub block_devices: Vec<BlockDevice>,
    pub interfaces: Vec<NetworkInterface>,
    pub tags: Vec<String>,
}

impl DiscoveredMachine {
    /// Bytes of local storage held by this machine
    pub fn local_storage(&self) -> u64 {
        self.block_devices
            .iter()
            .filter(|d| d.device_type == BlockDeviceType::Local)
            .map(|d| d.size)
            .sum()
    }

    /// Number of local disks held by this machine
    pub fn local_disks(&self) -> u64 {
        self.block_devices
            .iter()
            .filter(|d| d.device_type == BlockDeviceType::Local)
            .count() as u64
    }
}

// =============================================================================
// Pods
// =============================================================================

/// Currently available headroom on a pod.
///
/// Values are signed because over-committing pods may report negative
/// headroom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    pub cores: i64,
    /// Ceiling for a single machine's cpu speed in MHz
    pub cpu_speed: u64,
    /// MiB
    pub memory: i64,
    /// Bytes
    pub local_storage: i64,
    /// Absent for pods with dynamic local storage
    pub local_disks: Option<i64>,
    /// Absent for pods without iSCSI support
    pub iscsi_storage: Option<i64>,
}

/// Immutable snapshot of a pod produced by one discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPod {
    pub architectures: Vec<String>,
    pub capabilities: Vec<Capability>,
    pub cores: u64,
    pub cpu_speed: u64,
    pub memory: u64,
    pub local_storage: u64,
    pub local_disks: Option<u64>,
    pub iscsi_storage: Option<u64>,
    pub storage_pools: Vec<StoragePool>,
    pub volume_groups: Vec<VolumeGroup>,
    pub machines: Vec<DiscoveredMachine>,
    pub hints: Hints,
    pub tags: Vec<String>,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredPod {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Find a machine by hostname
    pub fn machine(&self, hostname: &str) -> Option<&DiscoveredMachine> {
        self.machines.iter().find(|m| m.hostname == hostname)
    }
}

// =============================================================================
// Compose Requests
// =============================================================================

/// A requested block device. The first one is the boot disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequestedBlockDevice {
    /// Size in bytes
    pub size: u64,
    /// Placement intent: "local", "ssd", "hdd", "nvme", "iscsi" or a pool name
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A requested network interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequestedInterface {
    #[serde(default)]
    pub ifname: Option<String>,
    #[serde(default)]
    pub attach_type: Option<InterfaceAttachType>,
    #[serde(default)]
    pub attach_name: Option<String>,
}

/// A host interface already known to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KnownHostInterface {
    pub ifname: String,
    /// Only `bridge` and `macvlan` are meaningful here
    pub attach_type: InterfaceAttachType,
    /// Whether DHCP is provided on this interface's VLAN by the caller
    pub dhcp_enabled: bool,
}

/// Request to compose a new machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComposeRequest {
    #[serde(default)]
    pub hostname: Option<String>,
    pub architecture: String,
    pub cores: u64,
    #[serde(default)]
    pub cpu_speed: Option<u64>,
    /// MiB
    pub memory: u64,
    pub block_devices: Vec<RequestedBlockDevice>,
    #[serde(default)]
    pub interfaces: Vec<RequestedInterface>,
    #[serde(default)]
    pub known_host_interfaces: Vec<KnownHostInterface>,
}
