//! Virsh Driver
//!
//! Drives libvirt hosts through an interactive `virsh` session. Storage is
//! carved from the host's storage pools on demand, over-commit of cores and
//! memory is allowed, and the boot order is written into the domain
//! definition.

pub mod definition;
pub mod host;
pub mod parsers;
pub mod steps;

#[cfg(test)]
pub(crate) mod fake;

use crate::allocation::{
    CompositionPlanner, LocalStorage, NetworkInventory, PlanningInventory,
};
use crate::capacity::{CapacityCalculator, PodTotals};
use crate::compose::ComposeExecutor;
use crate::domain::{
    BootOrderMode, Capability, ComposeRequest, ComposedMachine, DiscoveredPod, DriverDescriptor,
    Hints, PodDriver, PoolRef, PowerParameters, PowerState, SettingField, SettingKind,
    SettingScope, ValidatedParameters,
};
use crate::error::{Error, Result};
use crate::inventory::require_canonical;
use crate::session::{PromptConnector, SessionSettings, ShellConnector};
use async_trait::async_trait;
use chrono::Utc;
use host::{VirshHost, POWER_ID};
use parsers::DomainState;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use steps::VirshComposeSteps;
use tracing::{debug, info, warn};

pub const DRIVER_NAME: &str = "virsh";

const CAPABILITIES: &[Capability] = &[
    Capability::Composable,
    Capability::DynamicLocalStorage,
    Capability::OverCommit,
    Capability::StoragePools,
    Capability::KnownHostInterfaces,
];

const ARCHITECTURES: &[&str] = &[
    "amd64/generic",
    "i386/generic",
    "arm64/generic",
    "armhf/generic",
    "ppc64el/generic",
    "s390x/generic",
];

// =============================================================================
// Configuration
// =============================================================================

/// Validated virsh pod configuration
#[derive(Debug, Clone)]
pub struct VirshConfig {
    /// libvirt connection URI, e.g. `qemu+ssh://user@host/system`
    pub address: String,
    pub password: Option<String>,
    /// Only domains whose name starts with this prefix are managed
    pub dom_prefix: Option<String>,
    pub default_pool: Option<PoolRef>,
    pub session_timeout: Duration,
}

impl VirshConfig {
    /// Declared settings for this driver
    pub fn settings() -> Vec<SettingField> {
        vec![
            SettingField::new("power_address", "Address", SettingKind::String, SettingScope::Pod)
                .required(),
            SettingField::new(
                "power_pass",
                "Password (optional)",
                SettingKind::Password,
                SettingScope::Pod,
            ),
            SettingField::new(
                "dom_prefix",
                "Domain name prefix (optional)",
                SettingKind::String,
                SettingScope::Pod,
            ),
            SettingField::new(
                "default_storage_pool",
                "Default storage pool id or name (optional)",
                SettingKind::String,
                SettingScope::Pod,
            ),
            SettingField::new(POWER_ID, "Domain name", SettingKind::String, SettingScope::Machine)
                .required(),
        ]
    }

    pub fn from_parameters(
        parameters: &BTreeMap<String, String>,
        session_timeout: Duration,
    ) -> Result<Self> {
        let values = ValidatedParameters::validate(&Self::settings(), SettingScope::Pod, parameters)?;
        Ok(Self {
            address: values.require("power_address")?,
            password: values.get("power_pass").map(str::to_string),
            dom_prefix: values.get("dom_prefix").map(str::to_string),
            default_pool: values.get("default_storage_pool").map(PoolRef::parse),
            session_timeout,
        })
    }

    /// Domain name from machine-scoped parameters
    pub fn domain_name(context: &PowerParameters) -> Result<String> {
        ValidatedParameters::validate(&Self::settings(), SettingScope::Machine, context)?
            .require(POWER_ID)
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Pod driver for libvirt hosts
pub struct VirshDriver {
    config: VirshConfig,
    connector: Arc<dyn ShellConnector>,
}

impl VirshDriver {
    /// Driver that logs in with a real `virsh` process per operation
    pub fn new(config: VirshConfig) -> Self {
        let settings = SessionSettings::virsh(
            &config.address,
            config.password.as_deref(),
            config.session_timeout,
        );
        let connector = Arc::new(PromptConnector::new(settings));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: VirshConfig, connector: Arc<dyn ShellConnector>) -> Self {
        Self { config, connector }
    }

    pub fn describe() -> DriverDescriptor {
        DriverDescriptor {
            name: DRIVER_NAME.into(),
            description: "Virsh (virtual systems)".into(),
            capabilities: CAPABILITIES.to_vec(),
            architectures: ARCHITECTURES.iter().map(|a| a.to_string()).collect(),
            boot_order: BootOrderMode::StaticDefinition,
            settings: VirshConfig::settings(),
        }
    }

    async fn open(&self) -> Result<VirshHost> {
        Ok(VirshHost::new(self.connector.connect().await?))
    }

    /// Full inventory over an open session
    async fn scrape(&self, host: &mut VirshHost) -> Result<DiscoveredPod> {
        let node = host.nodeinfo().await?;
        let architecture = require_canonical(&node.architecture)?;
        let pools = host.storage_pools().await?;

        let mut machines = Vec::new();
        for name in host.domain_names(self.config.dom_prefix.as_deref()).await? {
            match host.machine(&name, node.cpu_speed, &pools).await {
                Ok(machine) => machines.push(machine),
                Err(err) if err.is_session_fatal() => return Err(err),
                Err(err) => warn!("Skipping domain {}: {}", name, err),
            }
        }

        let local_storage: u64 = pools.iter().map(|p| p.storage).sum();
        let hints = CapacityCalculator::new().hints(
            &PodTotals {
                cores: node.cpus,
                cpu_speed: node.cpu_speed,
                memory: node.memory,
                local_storage,
                local_disks: None,
            },
            &machines,
            &[],
        );

        Ok(DiscoveredPod {
            architectures: vec![architecture],
            capabilities: CAPABILITIES.to_vec(),
            cores: node.cpus,
            cpu_speed: node.cpu_speed,
            memory: node.memory,
            local_storage,
            local_disks: None,
            iscsi_storage: None,
            storage_pools: pools,
            volume_groups: Vec::new(),
            machines,
            hints,
            tags: vec!["virtual".into()],
            discovered_at: Utc::now(),
        })
    }

    async fn compose_with(
        &self,
        host: &mut VirshHost,
        request: &ComposeRequest,
    ) -> Result<ComposedMachine> {
        let pod = self.scrape(host).await?;
        let networks = host.networks().await?;

        let inventory = PlanningInventory {
            capabilities: pod.capabilities.clone(),
            architectures: pod.architectures.clone(),
            hints: pod.hints,
            local_storage: LocalStorage::Pools {
                pools: pod.storage_pools.clone(),
                default_pool: self.config.default_pool.clone(),
            },
            volume_groups: Vec::new(),
            networks: Some(NetworkInventory {
                networks,
                host_interfaces: Vec::new(),
            }),
        };
        let plan = CompositionPlanner::new().plan(request, &inventory)?;

        let outcome = {
            let mut steps = VirshComposeSteps::new(host, pod.cpu_speed, pod.storage_pools);
            ComposeExecutor::new().execute(&mut steps, &plan).await?
        };

        let hints = self.scrape(host).await?.hints;
        Ok(ComposedMachine {
            machine: outcome.machine,
            hints,
        })
    }

    async fn decompose_with(&self, host: &mut VirshHost, domain: &str) -> Result<Hints> {
        match host.domain_status(domain).await? {
            None => info!("Domain {} does not exist; nothing to decompose", domain),
            Some(_) => {
                host.stop(domain).await?;
                host.run(&[
                    "undefine",
                    domain,
                    "--remove-all-storage",
                    "--delete-snapshots",
                    "--managed-save",
                ])
                .await?;
                info!("Decomposed domain {}", domain);
            }
        }
        Ok(self.scrape(host).await?.hints)
    }

    async fn power_on_with(&self, host: &mut VirshHost, domain: &str) -> Result<()> {
        let state = host
            .domain_status(domain)
            .await?
            .ok_or_else(|| Error::pod_action("power on", format!("domain {} does not exist", domain)))?;
        let reordered = host.ensure_network_boot(domain).await?;
        if state == DomainState::Running && !reordered {
            return Ok(());
        }
        // libvirt refuses to start a domain that is still active in any state
        if state.is_active() {
            debug!("Power cycling {} ({}) before start", domain, state);
            host.stop(domain).await?;
        }
        host.start(domain).await
    }

    async fn power_off_with(&self, host: &mut VirshHost, domain: &str) -> Result<()> {
        match host.domain_status(domain).await? {
            Some(state) if state.is_active() => host.stop(domain).await,
            Some(_) => Ok(()),
            None => Err(Error::pod_action(
                "power off",
                format!("domain {} does not exist", domain),
            )),
        }
    }

    async fn power_query_with(&self, host: &mut VirshHost, domain: &str) -> Result<PowerState> {
        host.domain_state(domain).await?.ok_or_else(|| {
            Error::pod_action("power query", format!("domain {} does not exist", domain))
        })
    }
}

/// Run `$body` against a fresh session and always log out afterwards
macro_rules! with_session {
    ($driver:expr, |$host:ident| $body:expr) => {{
        let mut session = $driver.open().await?;
        let result = {
            let $host = &mut session;
            $body.await
        };
        session.close().await;
        result
    }};
}

#[async_trait]
impl PodDriver for VirshDriver {
    fn descriptor(&self) -> DriverDescriptor {
        Self::describe()
    }

    async fn discover(&self, pod_id: &str) -> Result<DiscoveredPod> {
        debug!("Discovering virsh pod {}", pod_id);
        with_session!(self, |host| self.scrape(host))
    }

    async fn compose(&self, pod_id: &str, request: &ComposeRequest) -> Result<ComposedMachine> {
        debug!("Composing on virsh pod {}", pod_id);
        with_session!(self, |host| self.compose_with(host, request))
    }

    async fn decompose(&self, pod_id: &str, context: &PowerParameters) -> Result<Hints> {
        let domain = VirshConfig::domain_name(context)?;
        debug!("Decomposing {} on virsh pod {}", domain, pod_id);
        with_session!(self, |host| self.decompose_with(host, &domain))
    }

    async fn power_on(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        let domain = VirshConfig::domain_name(context)?;
        debug!("Powering on {} ({})", system_id, domain);
        with_session!(self, |host| self.power_on_with(host, &domain))
    }

    async fn power_off(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        let domain = VirshConfig::domain_name(context)?;
        debug!("Powering off {} ({})", system_id, domain);
        with_session!(self, |host| self.power_off_with(host, &domain))
    }

    async fn power_query(&self, system_id: &str, context: &PowerParameters) -> Result<PowerState> {
        let domain = VirshConfig::domain_name(context)?;
        debug!("Querying power of {} ({})", system_id, domain);
        with_session!(self, |host| self.power_query_with(host, &domain))
    }
}
