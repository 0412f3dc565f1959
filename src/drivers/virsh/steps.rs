//! Compose stages over a virsh shell

use super::definition::{domain_xml, macvlan_interface_xml, DomainSpec};
use super::host::VirshHost;
use crate::allocation::{Attachment, CompositionPlan, DiskPlacement, PlannedDisk, PlannedInterface};
use crate::compose::{ComposeSteps, CreatedVolume, MachineHandle};
use crate::domain::{DiscoveredMachine, StoragePool};
use crate::error::{Error, Result};
use crate::inventory::architecture::libvirt_arch;
use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

/// Compose stages bound to one open host session
pub struct VirshComposeSteps<'a> {
    host: &'a mut VirshHost,
    cpu_speed: u64,
    pools: Vec<StoragePool>,
}

impl<'a> VirshComposeSteps<'a> {
    /// `cpu_speed` and `pools` come from the discovery the plan was made on
    pub fn new(host: &'a mut VirshHost, cpu_speed: u64, pools: Vec<StoragePool>) -> Self {
        Self {
            host,
            cpu_speed,
            pools,
        }
    }
}

#[async_trait]
impl<'a> ComposeSteps for VirshComposeSteps<'a> {
    async fn create_volume(
        &mut self,
        plan: &CompositionPlan,
        disk: &PlannedDisk,
    ) -> Result<Option<CreatedVolume>> {
        let (pool_name, pool_type) = match &disk.placement {
            DiskPlacement::Pool {
                pool_name,
                pool_type,
                ..
            } => (pool_name, pool_type),
            other => {
                return Err(Error::Internal(format!(
                    "virsh cannot place disk {} as {:?}",
                    disk.index, other
                )))
            }
        };

        let name = format!("{}-{}", plan.hostname, Uuid::new_v4());
        let size = disk.size.to_string();
        let mut args = vec![
            "vol-create-as",
            pool_name.as_str(),
            name.as_str(),
            size.as_str(),
            "--allocation",
            "0",
        ];
        if pool_type.is_file_backed() {
            args.extend(["--format", "raw"]);
        }
        self.host.run(&args).await?;

        let path = self
            .host
            .run(&["vol-path", name.as_str(), "--pool", pool_name.as_str()])
            .await?;
        debug!("Created volume {} at {}", name, path);

        Ok(Some(CreatedVolume {
            disk_index: disk.index,
            name,
            pool: pool_name.clone(),
            path,
            block_backed: !pool_type.is_file_backed(),
        }))
    }

    async fn delete_volume(&mut self, volume: &CreatedVolume) -> Result<()> {
        self.host
            .run(&["vol-delete", &volume.name, "--pool", &volume.pool])
            .await
            .map(|_| ())
    }

    async fn define_machine(&mut self, plan: &CompositionPlan) -> Result<MachineHandle> {
        let arch = libvirt_arch(&plan.architecture).ok_or_else(|| Error::UnsupportedArchitecture {
            architecture: plan.architecture.clone(),
        })?;
        let emulator = self.host.domain_capabilities().await?;
        let uuid = Uuid::new_v4().to_string();

        let xml = domain_xml(&DomainSpec {
            name: &plan.hostname,
            uuid: &uuid,
            memory: plan.memory,
            vcpus: plan.cores,
            arch,
            emulator: &emulator,
        });
        self.host.define(&xml).await?;
        info!("Defined domain {} ({})", plan.hostname, uuid);

        Ok(MachineHandle {
            id: plan.hostname.clone(),
            hostname: plan.hostname.clone(),
        })
    }

    async fn attach_interface(
        &mut self,
        machine: &MachineHandle,
        interface: &PlannedInterface,
    ) -> Result<()> {
        let (kind, name) = match &interface.attachment {
            Attachment::Network(name) => ("network", name),
            Attachment::Bridge(name) => ("bridge", name),
            Attachment::Macvlan(name) => {
                return self
                    .host
                    .attach_device(&machine.id, &macvlan_interface_xml(name))
                    .await;
            }
            Attachment::PodManaged => return Ok(()),
        };
        self.host
            .run(&[
                "attach-interface",
                &machine.id,
                kind,
                name,
                "--model",
                "virtio",
                "--config",
            ])
            .await
            .map(|_| ())
    }

    async fn attach_volume(
        &mut self,
        machine: &MachineHandle,
        volume: &CreatedVolume,
        device: &str,
    ) -> Result<()> {
        let source_type = if volume.block_backed { "block" } else { "file" };
        self.host
            .run(&[
                "attach-disk",
                &machine.id,
                &volume.path,
                device,
                "--targetbus",
                "virtio",
                "--sourcetype",
                source_type,
                "--config",
            ])
            .await
            .map(|_| ())
    }

    /// A paused start surfaces definition errors without running the guest
    async fn validate_startup(&mut self, machine: &MachineHandle) -> Result<()> {
        self.host.run(&["start", &machine.id, "--paused"]).await?;
        self.host.destroy(&machine.id).await
    }

    async fn finalize(
        &mut self,
        machine: &MachineHandle,
        _plan: &CompositionPlan,
    ) -> Result<DiscoveredMachine> {
        self.host.run(&["autostart", &machine.id]).await?;
        self.host.ensure_network_boot(&machine.id).await?;
        self.host
            .machine(&machine.id, self.cpu_speed, &self.pools)
            .await
    }

    async fn destroy_machine(&mut self, machine: &MachineHandle) -> Result<()> {
        if self.host.domain_status(&machine.id).await?.is_some() {
            self.host.stop(&machine.id).await?;
            self.host.run(&["undefine", &machine.id]).await?;
        }
        Ok(())
    }
}
