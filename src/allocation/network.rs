//! Network attachment selection
//!
//! Attaching a machine to a network where the hypervisor's own DHCP server
//! answers would hand it an address the provisioning DHCP does not know, so
//! every candidate is checked for DHCP safety before it is chosen.
//! Precedence: the `maas` network, the `default` network, a DHCP-enabled
//! host bridge, a DHCP-enabled macvlan parent.

use crate::domain::{InterfaceAttachType, KnownHostInterface, RequestedInterface};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Managed networks tried in order
pub const PREFERRED_NETWORKS: &[&str] = &["maas", "default"];

/// A managed network on the pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedNetwork {
    pub name: String,
    /// The pod runs its own DHCP server on this network
    pub dhcp_active: bool,
    /// Host bridge backing the network
    pub bridge: Option<String>,
}

/// Networks and host interfaces available for attachment
#[derive(Debug, Clone, Default)]
pub struct NetworkInventory {
    pub networks: Vec<ManagedNetwork>,
    pub host_interfaces: Vec<KnownHostInterface>,
}

/// Chosen attachment for one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum Attachment {
    Network(String),
    Bridge(String),
    Macvlan(String),
    /// The pod assigns interfaces itself
    PodManaged,
}

impl Attachment {
    pub fn attach_type(&self) -> Option<InterfaceAttachType> {
        match self {
            Attachment::Network(_) => Some(InterfaceAttachType::Network),
            Attachment::Bridge(_) => Some(InterfaceAttachType::Bridge),
            Attachment::Macvlan(_) => Some(InterfaceAttachType::Macvlan),
            Attachment::PodManaged => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Attachment::Network(n) | Attachment::Bridge(n) | Attachment::Macvlan(n) => Some(n),
            Attachment::PodManaged => None,
        }
    }
}

impl NetworkInventory {
    fn dhcp_enabled_interface(&self, ifname: &str) -> bool {
        self.host_interfaces
            .iter()
            .any(|i| i.ifname == ifname && i.dhcp_enabled)
    }

    /// A managed network is safe when the pod's DHCP is off and its bridge
    /// is a host interface on a DHCP-enabled VLAN
    fn is_dhcp_safe(&self, network: &ManagedNetwork) -> bool {
        !network.dhcp_active
            && network
                .bridge
                .as_deref()
                .map(|bridge| self.dhcp_enabled_interface(bridge))
                .unwrap_or(false)
    }

    /// Best attachment for interfaces that did not name one
    pub fn best_attachment(&self) -> Result<Attachment> {
        for preferred in PREFERRED_NETWORKS {
            if let Some(network) = self.networks.iter().find(|n| n.name == *preferred) {
                if self.is_dhcp_safe(network) {
                    return Ok(Attachment::Network(network.name.clone()));
                }
                debug!("Network {} is not DHCP-safe; skipping", network.name);
            }
        }

        for attach_type in [InterfaceAttachType::Bridge, InterfaceAttachType::Macvlan] {
            if let Some(host) = self
                .host_interfaces
                .iter()
                .find(|i| i.attach_type == attach_type && i.dhcp_enabled)
            {
                return Ok(match attach_type {
                    InterfaceAttachType::Bridge => Attachment::Bridge(host.ifname.clone()),
                    _ => Attachment::Macvlan(host.ifname.clone()),
                });
            }
        }

        Err(Error::NoViableNetwork(format!(
            "none of the networks {:?} is DHCP-safe and no DHCP-enabled bridge or macvlan interface is known",
            PREFERRED_NETWORKS
        )))
    }

    /// Resolve the attachment for one requested interface
    pub fn attachment_for(&self, index: usize, requested: &RequestedInterface) -> Result<Attachment> {
        match (requested.attach_type, requested.attach_name.as_deref()) {
            (Some(InterfaceAttachType::Bridge), Some(name)) => Ok(Attachment::Bridge(name.into())),
            (Some(InterfaceAttachType::Macvlan), Some(name)) => Ok(Attachment::Macvlan(name.into())),
            (Some(InterfaceAttachType::Bridge | InterfaceAttachType::Macvlan), None) => {
                Err(Error::NoViableNetwork(format!(
                    "interface {} asks for a {} attachment without naming the host interface",
                    index,
                    requested.attach_type.map(|t| t.to_string()).unwrap_or_default()
                )))
            }
            (_, Some(name)) => {
                if self.networks.iter().any(|n| n.name == name) {
                    Ok(Attachment::Network(name.into()))
                } else {
                    Err(Error::NoViableNetwork(format!(
                        "interface {} asks for network '{}' which does not exist",
                        index, name
                    )))
                }
            }
            (_, None) => self.best_attachment(),
        }
    }
}
