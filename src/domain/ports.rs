//! Domain Ports - the pod driver contract
//!
//! Every backend implements [`PodDriver`]. The manager, the registry and the
//! CLI are written only against this trait and the static descriptors it
//! exposes; nothing outside `drivers/` knows which concrete backend it talks to.

use crate::domain::model::{
    Capability, ComposeRequest, DiscoveredMachine, DiscoveredPod, Hints, PowerParameters,
    PowerState,
};
use crate::domain::settings::SettingField;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a driver makes a machine network-boot first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootOrderMode {
    /// Boot order is written into the machine definition
    StaticDefinition,
    /// A one-shot PXE override is set before every power-on
    RuntimeOverride,
}

/// Static description of a driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverDescriptor {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
    pub architectures: Vec<String>,
    pub boot_order: BootOrderMode,
    pub settings: Vec<SettingField>,
}

impl DriverDescriptor {
    pub fn can_set_boot_order(&self) -> bool {
        self.boot_order == BootOrderMode::StaticDefinition
    }
}

/// Outcome of a successful compose
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedMachine {
    pub machine: DiscoveredMachine,
    pub hints: Hints,
}

/// Pod driver port.
///
/// Pod-level connection settings are bound when the driver is built; the
/// `context` arguments carry the machine-scoped power parameters a previous
/// discovery returned. Each call opens and releases its own session.
#[async_trait]
pub trait PodDriver: Send + Sync {
    /// Static descriptor for this driver
    fn descriptor(&self) -> DriverDescriptor;

    /// Read-only inventory of the pod
    async fn discover(&self, pod_id: &str) -> Result<DiscoveredPod>;

    /// Compose a machine. Either a usable machine is returned or nothing is
    /// left behind on the pod.
    async fn compose(&self, pod_id: &str, request: &ComposeRequest) -> Result<ComposedMachine>;

    /// Delete a composed machine. Absent machines are a no-op.
    async fn decompose(&self, pod_id: &str, context: &PowerParameters) -> Result<Hints>;

    async fn power_on(&self, system_id: &str, context: &PowerParameters) -> Result<()>;

    async fn power_off(&self, system_id: &str, context: &PowerParameters) -> Result<()>;

    async fn power_query(&self, system_id: &str, context: &PowerParameters) -> Result<PowerState>;

    fn capabilities(&self) -> Vec<Capability> {
        self.descriptor().capabilities
    }

    fn supported_architectures(&self) -> Vec<String> {
        self.descriptor().architectures
    }

    fn can_set_boot_order(&self) -> bool {
        self.descriptor().can_set_boot_order()
    }
}

// =============================================================================
// Type Aliases for Arc-wrapped Traits
// =============================================================================

pub type PodDriverRef = Arc<dyn PodDriver>;
