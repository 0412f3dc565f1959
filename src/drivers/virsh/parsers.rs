//! Parsers for virsh command output
//!
//! One function per scraped command. Each takes the raw text a command
//! printed and returns normalized values; nothing here talks to a host.

use crate::allocation::ManagedNetwork;
use crate::domain::{InterfaceAttachType, PowerState, StoragePool, StoragePoolType};
use crate::error::{Error, Result};
use crate::inventory::units::{leading_u64, parse_size, MIB};
use crate::inventory::XmlElement;
use std::collections::BTreeMap;

fn parse_error(command: &str, reason: impl Into<String>) -> Error {
    Error::Parse {
        command: command.into(),
        reason: reason.into(),
    }
}

/// `Key: value` lines, split on the first colon
pub fn parse_key_values(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn field<'a>(command: &str, values: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    values
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| parse_error(command, format!("missing '{}'", key)))
}

fn number(command: &str, values: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    leading_u64(field(command, values, key)?)
        .map_err(|_| parse_error(command, format!("'{}' is not a number", key)))
}

fn memory_mib(command: &str, values: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    let bytes = parse_size(field(command, values, key)?)
        .map_err(|_| parse_error(command, format!("'{}' is not a size", key)))?;
    Ok(bytes / MIB)
}

// =============================================================================
// Host
// =============================================================================

/// Host facts from `nodeinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Vendor architecture string
    pub architecture: String,
    pub cpus: u64,
    /// MHz
    pub cpu_speed: u64,
    /// MiB
    pub memory: u64,
}

pub fn parse_nodeinfo(output: &str) -> Result<NodeInfo> {
    let values = parse_key_values(output);
    Ok(NodeInfo {
        architecture: field("nodeinfo", &values, "CPU model")?.to_string(),
        cpus: number("nodeinfo", &values, "CPU(s)")?,
        cpu_speed: number("nodeinfo", &values, "CPU frequency")?,
        memory: memory_mib("nodeinfo", &values, "Memory size")?,
    })
}

/// Names from a `--name` listing, blank lines dropped
pub fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Emulator facts from `domcapabilities`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCapabilities {
    pub emulator: String,
    pub domain_type: String,
}

pub fn parse_domcapabilities(xml: &str) -> Result<DomainCapabilities> {
    let root = XmlElement::parse(xml)?;
    Ok(DomainCapabilities {
        emulator: root
            .text_at("path")
            .ok_or_else(|| parse_error("domcapabilities", "missing <path>"))?
            .to_string(),
        domain_type: root
            .text_at("domain")
            .ok_or_else(|| parse_error("domcapabilities", "missing <domain>"))?
            .to_string(),
    })
}

// =============================================================================
// Storage and Networks
// =============================================================================

/// Pool from `pool-dumpxml`. Unsupported pool types yield `None`.
pub fn parse_pool_xml(xml: &str) -> Result<Option<StoragePool>> {
    let root = XmlElement::parse(xml)?;
    let pool_type = match root.attr("type").and_then(StoragePoolType::parse) {
        Some(pool_type) => pool_type,
        None => return Ok(None),
    };
    let bytes = |path: &str| -> Result<u64> {
        root.text_at(path)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| parse_error("pool-dumpxml", format!("missing <{}>", path)))
    };

    Ok(Some(StoragePool {
        id: root
            .text_at("uuid")
            .ok_or_else(|| parse_error("pool-dumpxml", "missing <uuid>"))?
            .to_string(),
        name: root
            .text_at("name")
            .ok_or_else(|| parse_error("pool-dumpxml", "missing <name>"))?
            .to_string(),
        pool_type,
        path: root.text_at("target/path").unwrap_or_default().to_string(),
        storage: bytes("capacity")?,
        available: bytes("available")?,
    }))
}

/// Network from `net-dumpxml`
pub fn parse_network_xml(xml: &str) -> Result<ManagedNetwork> {
    let root = XmlElement::parse(xml)?;
    Ok(ManagedNetwork {
        name: root
            .text_at("name")
            .ok_or_else(|| parse_error("net-dumpxml", "missing <name>"))?
            .to_string(),
        dhcp_active: !root.find_all("ip/dhcp").is_empty(),
        bridge: root
            .find("bridge")
            .and_then(|b| b.attr("name"))
            .map(str::to_string),
    })
}

// =============================================================================
// Domains
// =============================================================================

/// Compute facts from `dominfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomInfo {
    pub cpus: u64,
    /// MiB
    pub memory: u64,
}

pub fn parse_dominfo(output: &str) -> Result<DomInfo> {
    let values = parse_key_values(output);
    Ok(DomInfo {
        cpus: number("dominfo", &values, "CPU(s)")?,
        memory: memory_mib("dominfo", &values, "Max memory")?,
    })
}

/// Domain state as printed by `domstate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Running,
    ShuttingDown,
    /// `idle`: blocked on a resource
    Blocked,
    Paused,
    Suspended,
    Crashed,
    ShutOff,
    NoState,
}

impl DomainState {
    /// Reported power state. Only a running or shutting-down guest counts as on.
    pub fn power(&self) -> PowerState {
        match self {
            DomainState::Running | DomainState::ShuttingDown => PowerState::On,
            _ => PowerState::Off,
        }
    }

    /// libvirt still holds a live instance: it must be destroyed before the
    /// domain can be started again or undefined cleanly
    pub fn is_active(&self) -> bool {
        !matches!(self, DomainState::ShutOff | DomainState::NoState)
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DomainState::Running => "running",
            DomainState::ShuttingDown => "in shutdown",
            DomainState::Blocked => "idle",
            DomainState::Paused => "paused",
            DomainState::Suspended => "pmsuspended",
            DomainState::Crashed => "crashed",
            DomainState::ShutOff => "shut off",
            DomainState::NoState => "no state",
        };
        write!(f, "{}", name)
    }
}

pub fn parse_domain_state(output: &str) -> Result<DomainState> {
    match output.trim() {
        "running" => Ok(DomainState::Running),
        "in shutdown" => Ok(DomainState::ShuttingDown),
        "idle" | "blocked" => Ok(DomainState::Blocked),
        "paused" => Ok(DomainState::Paused),
        "pmsuspended" => Ok(DomainState::Suspended),
        "crashed" => Ok(DomainState::Crashed),
        "shut off" => Ok(DomainState::ShutOff),
        "no state" => Ok(DomainState::NoState),
        other => Err(Error::pod_action(
            "domstate",
            format!("unknown domain state '{}'", other),
        )),
    }
}

/// Power state from `domstate`
pub fn parse_domstate(output: &str) -> Result<PowerState> {
    parse_domain_state(output).map(|state| state.power())
}

/// `Capacity` in bytes from `domblkinfo`
pub fn parse_domblkinfo(output: &str) -> Result<u64> {
    number("domblkinfo", &parse_key_values(output), "Capacity")
}

/// A disk in a domain definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDisk {
    pub target: String,
    pub source: Option<String>,
}

/// An interface in a domain definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInterface {
    pub mac_address: String,
    pub attach_type: Option<InterfaceAttachType>,
    pub attach_name: Option<String>,
}

/// Facts from `dumpxml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainXml {
    /// Vendor architecture string
    pub architecture: String,
    pub disks: Vec<DomainDisk>,
    pub interfaces: Vec<DomainInterface>,
    pub boot_devices: Vec<String>,
}

pub fn parse_domain_xml(xml: &str) -> Result<DomainXml> {
    let root = XmlElement::parse(xml)?;
    let architecture = root
        .find("os/type")
        .and_then(|t| t.attr("arch"))
        .ok_or_else(|| parse_error("dumpxml", "missing os/type arch"))?
        .to_string();

    let disks = root
        .find_all("devices/disk")
        .into_iter()
        .filter(|d| d.attr("device") == Some("disk"))
        .filter_map(|d| {
            let target = d.find("target")?.attr("dev")?.to_string();
            let source = d
                .find("source")
                .and_then(|s| s.attr("file").or_else(|| s.attr("dev")))
                .map(str::to_string);
            Some(DomainDisk { target, source })
        })
        .collect();

    let interfaces = root
        .find_all("devices/interface")
        .into_iter()
        .filter_map(|i| {
            let mac_address = i.find("mac")?.attr("address")?.to_string();
            let source = i.find("source");
            let (attach_type, attach_name) = match i.attr("type") {
                Some("network") => (
                    Some(InterfaceAttachType::Network),
                    source.and_then(|s| s.attr("network")),
                ),
                Some("bridge") => (
                    Some(InterfaceAttachType::Bridge),
                    source.and_then(|s| s.attr("bridge")),
                ),
                Some("direct") => (
                    Some(InterfaceAttachType::Macvlan),
                    source.and_then(|s| s.attr("dev")),
                ),
                _ => (None, None),
            };
            Some(DomainInterface {
                mac_address,
                attach_type,
                attach_name: attach_name.map(str::to_string),
            })
        })
        .collect();

    let boot_devices = root
        .find_all("os/boot")
        .into_iter()
        .filter_map(|b| b.attr("dev"))
        .map(str::to_string)
        .collect();

    Ok(DomainXml {
        architecture,
        disks,
        interfaces,
        boot_devices,
    })
}

#[cfg(test)]
pub(crate) mod samples {
    pub const NODEINFO: &str = "\
CPU model:           x86_64
CPU(s):              8
CPU frequency:       2400 MHz
CPU socket(s):       1
Core(s) per socket:  4
Thread(s) per core:  2
NUMA cell(s):        1
Memory size:         16307176 KiB
";

    pub const DOMINFO: &str = "\
Id:             -
Name:           test
UUID:           f16a0d0e-4ec4-4b8e-a2b1-b21df2e2d4dc
OS Type:        hvm
State:          shut off
CPU(s):         1
Max memory:     1048576 KiB
Used memory:    1048576 KiB
Persistent:     yes
Autostart:      disable
Managed save:   no
Security model: none
Security DOI:   0
";

    pub const DOMBLKINFO: &str = "\
Capacity:       21474836480
Allocation:     5406294016
Physical:       21474836480
";

    pub const POOL_DIR: &str = "\
<pool type='dir'>
  <name>default</name>
  <uuid>59edc0cb-4635-449a-80e2-2c8a59afa327</uuid>
  <capacity unit='bytes'>486362096599</capacity>
  <allocation unit='bytes'>299702874931</allocation>
  <available unit='bytes'>186659278684</available>
  <source>
  </source>
  <target>
    <path>/var/lib/libvirt/images</path>
  </target>
</pool>";

    pub const POOL_ISCSI: &str = "\
<pool type='iscsi'>
  <name>remote</name>
  <uuid>11111111-2222-3333-4444-555555555555</uuid>
  <capacity unit='bytes'>1000</capacity>
  <allocation unit='bytes'>0</allocation>
  <available unit='bytes'>1000</available>
</pool>";

    pub const NETWORK_MAAS: &str = "\
<network>
  <name>maas</name>
  <uuid>3a7c2d8e-6f1b-4f0e-9d0a-0c2c4b5e6f70</uuid>
  <forward mode='nat'/>
  <bridge name='virbr1' stp='on' delay='0'/>
  <ip address='10.0.0.1' netmask='255.255.255.0'>
  </ip>
</network>";

    pub const NETWORK_DEFAULT: &str = "\
<network>
  <name>default</name>
  <bridge name='virbr0' stp='on' delay='0'/>
  <ip address='192.168.122.1' netmask='255.255.255.0'>
    <dhcp>
      <range start='192.168.122.2' end='192.168.122.254'/>
    </dhcp>
  </ip>
</network>";

    pub const DOMAIN: &str = "\
<domain type='kvm'>
  <name>test</name>
  <uuid>f16a0d0e-4ec4-4b8e-a2b1-b21df2e2d4dc</uuid>
  <memory unit='KiB'>1048576</memory>
  <vcpu placement='static'>1</vcpu>
  <os>
    <type arch='x86_64' machine='pc-i440fx-xenial'>hvm</type>
    <boot dev='network'/>
    <boot dev='hd'/>
  </os>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='raw'/>
      <source file='/var/lib/libvirt/images/test-1.img'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='block' device='disk'>
      <source dev='/dev/vg0/test-2'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <target dev='hdb' bus='ide'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:7a:12:01'/>
      <source network='default'/>
      <model type='virtio'/>
    </interface>
    <interface type='bridge'>
      <mac address='52:54:00:7a:12:02'/>
      <source bridge='br0'/>
      <model type='e1000'/>
    </interface>
    <interface type='direct'>
      <mac address='52:54:00:7a:12:03'/>
      <source dev='eth1' mode='bridge'/>
    </interface>
  </devices>
</domain>";

    pub const DOMCAPABILITIES: &str = "\
<domainCapabilities>
  <path>/usr/bin/qemu-system-x86_64</path>
  <domain>kvm</domain>
  <machine>pc-i440fx-2.11</machine>
  <arch>x86_64</arch>
</domainCapabilities>";
}
