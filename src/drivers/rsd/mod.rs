//! RSD Driver
//!
//! Drives Rack Scale Design pods over the Redfish REST API. Compute and
//! local drives come from fixed physical systems; remote drives are cloned
//! from volume group masters and exported over iSCSI. Boot order is a
//! one-shot PXE override applied at runtime.

pub mod discovery;
pub mod resources;
pub mod steps;

#[cfg(test)]
pub(crate) mod fake;

use crate::allocation::{CompositionPlanner, LocalStorage, PlanningInventory};
use crate::compose::{ComposeExecutor, PollPolicy};
use crate::domain::{
    BootOrderMode, ComposeRequest, ComposedMachine, DiscoveredPod, DriverDescriptor, Hints,
    PodDriver, PowerParameters, PowerState, SettingField, SettingKind, SettingScope,
    ValidatedParameters,
};
use crate::error::{Error, Result};
use crate::session::{base_url, HttpSettings, HttpTransport, RedfishClient, RedfishTransportRef};
use async_trait::async_trait;
use discovery::{scan_pod, CAPABILITIES, NODE_ID};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use steps::{assemble_node, node_path, reset_node, set_pxe_boot, RsdComposeSteps};
use tracing::{debug, info};

pub const DRIVER_NAME: &str = "rsd";

const ARCHITECTURES: &[&str] = &["amd64/generic"];

// =============================================================================
// Configuration
// =============================================================================

/// Validated RSD pod configuration
#[derive(Debug, Clone)]
pub struct RsdConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
    pub request_timeout: Duration,
}

impl RsdConfig {
    pub fn settings() -> Vec<SettingField> {
        vec![
            SettingField::new("power_address", "Pod address", SettingKind::String, SettingScope::Pod)
                .required(),
            SettingField::new("power_user", "Pod user", SettingKind::String, SettingScope::Pod)
                .required(),
            SettingField::new(
                "power_pass",
                "Pod password",
                SettingKind::Password,
                SettingScope::Pod,
            )
            .required(),
            SettingField::new(
                "verify_tls",
                "Verify TLS certificates",
                SettingKind::Boolean,
                SettingScope::Pod,
            )
            .with_default("false"),
            SettingField::new(NODE_ID, "Node ID", SettingKind::String, SettingScope::Machine)
                .required(),
        ]
    }

    pub fn from_parameters(
        parameters: &BTreeMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let values = ValidatedParameters::validate(&Self::settings(), SettingScope::Pod, parameters)?;
        Ok(Self {
            address: values.require("power_address")?,
            username: values.require("power_user")?,
            password: values.require("power_pass")?,
            verify_tls: values.get_bool("verify_tls").unwrap_or(false),
            request_timeout,
        })
    }

    /// Composed node id from machine-scoped parameters
    pub fn node_id(context: &PowerParameters) -> Result<String> {
        ValidatedParameters::validate(&Self::settings(), SettingScope::Machine, context)?
            .require(NODE_ID)
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Pod driver for Redfish RSD pods
pub struct RsdDriver {
    client: RedfishClient,
    poll: PollPolicy,
}

impl RsdDriver {
    pub fn new(config: RsdConfig, poll: PollPolicy) -> Result<Self> {
        let transport = HttpTransport::new(&HttpSettings {
            address: config.address.clone(),
            username: config.username,
            password: config.password,
            verify_tls: config.verify_tls,
            timeout: config.request_timeout,
        })?;
        Ok(Self::with_transport(
            Arc::new(transport),
            base_url(&config.address),
            poll,
        ))
    }

    pub fn with_transport(transport: RedfishTransportRef, endpoint: String, poll: PollPolicy) -> Self {
        Self {
            client: RedfishClient::new(transport, endpoint),
            poll,
        }
    }

    pub fn describe() -> DriverDescriptor {
        DriverDescriptor {
            name: DRIVER_NAME.into(),
            description: "Rack Scale Design".into(),
            capabilities: CAPABILITIES.to_vec(),
            architectures: ARCHITECTURES.iter().map(|a| a.to_string()).collect(),
            boot_order: BootOrderMode::RuntimeOverride,
            settings: RsdConfig::settings(),
        }
    }

    /// `ComposedNodeState` of an assembled node as a power state
    async fn node_power(&self, node_id: &str) -> Result<PowerState> {
        match assemble_node(&self.client, &self.poll, node_id).await?.as_str() {
            "PoweredOn" => Ok(PowerState::On),
            "PoweredOff" => Ok(PowerState::Off),
            other => Err(Error::pod_action(
                format!("power query {}", node_id),
                format!("unexpected ComposedNodeState {}", other),
            )),
        }
    }
}

#[async_trait]
impl PodDriver for RsdDriver {
    fn descriptor(&self) -> DriverDescriptor {
        Self::describe()
    }

    async fn discover(&self, pod_id: &str) -> Result<DiscoveredPod> {
        debug!("Discovering RSD pod {}", pod_id);
        scan_pod(&self.client).await
    }

    async fn compose(&self, pod_id: &str, request: &ComposeRequest) -> Result<ComposedMachine> {
        debug!("Composing on RSD pod {}", pod_id);
        let pod = scan_pod(&self.client).await?;
        let inventory = PlanningInventory {
            capabilities: pod.capabilities.clone(),
            architectures: pod.architectures.clone(),
            hints: pod.hints,
            local_storage: LocalStorage::Fixed {
                available: pod.hints.local_storage.max(0) as u64,
            },
            volume_groups: pod.volume_groups.clone(),
            networks: None,
        };
        let plan = CompositionPlanner::new().plan(request, &inventory)?;

        let mut steps = RsdComposeSteps::new(&self.client, self.poll);
        let outcome = ComposeExecutor::new().execute(&mut steps, &plan).await?;

        let hints = scan_pod(&self.client).await?.hints;
        Ok(ComposedMachine {
            machine: outcome.machine,
            hints,
        })
    }

    async fn decompose(&self, pod_id: &str, context: &PowerParameters) -> Result<Hints> {
        let node_id = RsdConfig::node_id(context)?;
        if self.client.delete(&node_path(&node_id)).await? {
            info!("Decomposed node {} on RSD pod {}", node_id, pod_id);
        } else {
            info!("Node {} does not exist; nothing to decompose", node_id);
        }
        Ok(scan_pod(&self.client).await?.hints)
    }

    async fn power_on(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        let node_id = RsdConfig::node_id(context)?;
        debug!("Powering on {} (node {})", system_id, node_id);
        set_pxe_boot(&self.client, &node_id).await?;
        if self.node_power(&node_id).await? == PowerState::On {
            reset_node(&self.client, &node_id, "ForceOff").await?;
        }
        reset_node(&self.client, &node_id, "On").await
    }

    async fn power_off(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        let node_id = RsdConfig::node_id(context)?;
        debug!("Powering off {} (node {})", system_id, node_id);
        set_pxe_boot(&self.client, &node_id).await?;
        reset_node(&self.client, &node_id, "ForceOff").await
    }

    async fn power_query(&self, system_id: &str, context: &PowerParameters) -> Result<PowerState> {
        let node_id = RsdConfig::node_id(context)?;
        debug!("Querying power of {} (node {})", system_id, node_id);
        self.node_power(&node_id).await
    }
}
