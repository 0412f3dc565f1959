//! Typed virsh commands
//!
//! Wraps one logged-in shell and exposes the commands the driver needs as
//! methods returning domain values. Definitions and device documents are
//! handed to virsh through temporary files.

use super::definition::with_network_boot;
use super::parsers::{
    parse_domain_state, parse_domain_xml, parse_domblkinfo, parse_domcapabilities, parse_dominfo,
    parse_domstate, parse_names, parse_network_xml, parse_nodeinfo, parse_pool_xml,
    DomainCapabilities, DomainState, NodeInfo,
};
use crate::allocation::ManagedNetwork;
use crate::domain::{
    BlockDevice, DiscoveredMachine, InterfaceAttachType, NetworkInterface, PowerParameters,
    PowerState, StoragePool,
};
use crate::error::{Error, Result};
use crate::inventory::{mark_boot_interface, require_canonical};
use crate::session::CommandShell;
use tracing::{debug, warn};

/// Machine-scoped parameter naming the domain
pub const POWER_ID: &str = "power_id";

const DISK_MODEL: &str = "QEMU HARDDISK";

/// A virsh shell held for one operation
pub struct VirshHost {
    shell: Box<dyn CommandShell>,
}

impl VirshHost {
    pub fn new(shell: Box<dyn CommandShell>) -> Self {
        Self { shell }
    }

    pub async fn run(&mut self, args: &[&str]) -> Result<String> {
        debug!("virsh {}", args.join(" "));
        self.shell.run(args).await
    }

    /// Log out; failures are only logged
    pub async fn close(mut self) {
        if let Err(err) = self.shell.logout().await {
            warn!("virsh logout failed: {}", err);
        }
    }

    // =========================================================================
    // Host
    // =========================================================================

    pub async fn nodeinfo(&mut self) -> Result<NodeInfo> {
        parse_nodeinfo(&self.run(&["nodeinfo"]).await?)
    }

    /// Emulator for new domains, preferring kvm over plain qemu
    pub async fn domain_capabilities(&mut self) -> Result<DomainCapabilities> {
        match self.run(&["domcapabilities", "--virttype", "kvm"]).await {
            Ok(xml) => parse_domcapabilities(&xml),
            Err(Error::PodAction { message, .. }) => {
                debug!("kvm unavailable ({}); falling back to qemu", message);
                parse_domcapabilities(&self.run(&["domcapabilities", "--virttype", "qemu"]).await?)
            }
            Err(err) => Err(err),
        }
    }

    /// Supported pools in listing order; other pool types are skipped
    pub async fn storage_pools(&mut self) -> Result<Vec<StoragePool>> {
        let names = parse_names(&self.run(&["pool-list", "--all", "--name"]).await?);
        let mut pools = Vec::with_capacity(names.len());
        for name in names {
            match parse_pool_xml(&self.run(&["pool-dumpxml", &name]).await?)? {
                Some(pool) => pools.push(pool),
                None => debug!("Skipping storage pool {} of unsupported type", name),
            }
        }
        Ok(pools)
    }

    pub async fn networks(&mut self) -> Result<Vec<ManagedNetwork>> {
        let names = parse_names(&self.run(&["net-list", "--name"]).await?);
        let mut networks = Vec::with_capacity(names.len());
        for name in names {
            networks.push(parse_network_xml(&self.run(&["net-dumpxml", &name]).await?)?);
        }
        Ok(networks)
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// Domain names, optionally limited to a prefix
    pub async fn domain_names(&mut self, prefix: Option<&str>) -> Result<Vec<String>> {
        let names = parse_names(&self.run(&["list", "--all", "--name"]).await?);
        Ok(names
            .into_iter()
            .filter(|n| prefix.map(|p| n.starts_with(p)).unwrap_or(true))
            .collect())
    }

    /// State of a domain, `None` when it does not exist
    pub async fn domain_status(&mut self, name: &str) -> Result<Option<DomainState>> {
        match self.run(&["domstate", name]).await {
            Ok(output) => parse_domain_state(&output).map(Some),
            Err(Error::PodAction { message, .. }) if message.contains("failed to get domain") => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Reported power state of a domain, `None` when it does not exist
    pub async fn domain_state(&mut self, name: &str) -> Result<Option<PowerState>> {
        Ok(self.domain_status(name).await?.map(|state| state.power()))
    }

    /// Read one domain as a machine
    pub async fn machine(
        &mut self,
        name: &str,
        cpu_speed: u64,
        pools: &[StoragePool],
    ) -> Result<DiscoveredMachine> {
        let info = parse_dominfo(&self.run(&["dominfo", name]).await?)?;
        let state = parse_domstate(&self.run(&["domstate", name]).await?)?;
        let definition = parse_domain_xml(&self.run(&["dumpxml", name]).await?)?;
        let architecture = require_canonical(&definition.architecture)?;

        let mut block_devices = Vec::with_capacity(definition.disks.len());
        for disk in &definition.disks {
            let size = parse_domblkinfo(&self.run(&["domblkinfo", name, &disk.target]).await?)?;
            let mut device = BlockDevice::local(size);
            device.model = Some(DISK_MODEL.into());
            device.serial = Some(disk.target.clone());
            device.id_path = Some(format!("/dev/{}", disk.target));
            device.storage_pool = disk.source.as_deref().and_then(|source| {
                pools
                    .iter()
                    .find(|p| !p.path.is_empty() && source.starts_with(&p.path))
                    .map(|p| p.id.clone())
            });
            block_devices.push(device);
        }

        let mut interfaces: Vec<NetworkInterface> = definition
            .interfaces
            .into_iter()
            .map(|i| NetworkInterface {
                mac_address: i.mac_address,
                vid: None,
                tags: Vec::new(),
                boot: false,
                attach_type: i.attach_type,
                attach_name: i.attach_name,
            })
            .collect();
        mark_boot_interface(&mut interfaces, |i| {
            i.attach_type == Some(InterfaceAttachType::Network)
                && i.attach_name.as_deref() == Some("maas")
        });

        let mut power_parameters = PowerParameters::new();
        power_parameters.insert(POWER_ID.into(), name.to_string());

        Ok(DiscoveredMachine {
            hostname: name.to_string(),
            architecture,
            cores: info.cpus,
            cpu_speed,
            memory: info.memory,
            power_state: state,
            power_parameters,
            block_devices,
            interfaces,
            tags: Vec::new(),
        })
    }

    /// Write `xml` to a temporary file and run a command that reads it
    async fn with_document(&mut self, xml: &str, args: &[&str], position: usize) -> Result<String> {
        let file = tempfile::Builder::new()
            .prefix("podctl-")
            .suffix(".xml")
            .tempfile()?;
        tokio::fs::write(file.path(), xml).await?;
        let path = file.path().to_string_lossy().into_owned();

        let mut full: Vec<&str> = args.to_vec();
        full.insert(position.min(full.len()), &path);
        self.run(&full).await
    }

    pub async fn define(&mut self, xml: &str) -> Result<()> {
        self.with_document(xml, &["define"], 1).await.map(|_| ())
    }

    pub async fn attach_device(&mut self, domain: &str, xml: &str) -> Result<()> {
        self.with_document(xml, &["attach-device", domain, "--config"], 2)
            .await
            .map(|_| ())
    }

    /// Make the domain boot from the network first. Returns whether the
    /// definition changed.
    pub async fn ensure_network_boot(&mut self, domain: &str) -> Result<bool> {
        let xml = self.run(&["dumpxml", domain]).await?;
        match with_network_boot(&xml)? {
            Some(rewritten) => {
                self.define(&rewritten).await?;
                debug!("Boot order of {} set to network, hd", domain);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn start(&mut self, domain: &str) -> Result<()> {
        self.run(&["start", domain]).await.map(|_| ())
    }

    pub async fn destroy(&mut self, domain: &str) -> Result<()> {
        self.run(&["destroy", domain]).await.map(|_| ())
    }

    /// `destroy` that accepts a domain which is already inactive
    pub async fn stop(&mut self, domain: &str) -> Result<()> {
        match self.destroy(domain).await {
            Err(Error::PodAction { message, .. }) if message.contains("domain is not running") => {
                debug!("Domain {} was not running", domain);
                Ok(())
            }
            other => other,
        }
    }
}
