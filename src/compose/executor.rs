//! Composition Executor
//!
//! Drives a validated [`CompositionPlan`] through the compose state machine.
//! Each stage strictly follows the previous one, and everything created on
//! the way is recorded so a failure at any stage unwinds it in reverse order
//! before the error is returned.

use super::state::ComposeState;
use crate::allocation::{CompositionPlan, PlannedDisk, PlannedInterface};
use crate::domain::DiscoveredMachine;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// =============================================================================
// Step Port
// =============================================================================

/// A volume created during a compose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedVolume {
    pub disk_index: usize,
    pub name: String,
    pub pool: String,
    /// Host path of the volume
    pub path: String,
    /// Backed by a block device rather than a file
    pub block_backed: bool,
}

/// A machine registered with the pod during a compose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineHandle {
    /// Remote identity (domain name, node id)
    pub id: String,
    pub hostname: String,
}

/// Driver-specific implementation of each compose stage.
///
/// Stages a pod performs implicitly (for example volumes created by the
/// allocation call itself) return `None` or do nothing.
#[async_trait]
pub trait ComposeSteps: Send {
    async fn create_volume(
        &mut self,
        plan: &CompositionPlan,
        disk: &PlannedDisk,
    ) -> Result<Option<CreatedVolume>>;

    async fn delete_volume(&mut self, volume: &CreatedVolume) -> Result<()>;

    async fn define_machine(&mut self, plan: &CompositionPlan) -> Result<MachineHandle>;

    async fn attach_interface(
        &mut self,
        machine: &MachineHandle,
        interface: &PlannedInterface,
    ) -> Result<()>;

    async fn attach_volume(
        &mut self,
        machine: &MachineHandle,
        volume: &CreatedVolume,
        device: &str,
    ) -> Result<()>;

    async fn validate_startup(&mut self, machine: &MachineHandle) -> Result<()>;

    /// Apply final settings and read back the machine
    async fn finalize(
        &mut self,
        machine: &MachineHandle,
        plan: &CompositionPlan,
    ) -> Result<DiscoveredMachine>;

    /// Remove the machine definition
    async fn destroy_machine(&mut self, machine: &MachineHandle) -> Result<()>;

    /// Prefix for sequential block device names
    fn device_prefix(&self) -> &str {
        "vd"
    }
}

/// Sequential block device name: `vda`..`vdz`, `vdaa`..`vdzz`, `vdaaa`..
pub fn block_device_name(prefix: &str, index: usize) -> String {
    let mut n = index + 1;
    let mut suffix = Vec::new();
    while n > 0 {
        n -= 1;
        suffix.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    suffix.reverse();
    let suffix: String = suffix.into_iter().collect();
    format!("{}{}", prefix, suffix)
}

// =============================================================================
// Rollback
// =============================================================================

#[derive(Debug, Clone)]
enum Undo {
    Volume(CreatedVolume),
    Machine(MachineHandle),
}

/// Reverse-order record of what a compose has created
#[derive(Debug, Default)]
struct Rollback {
    stack: Vec<Undo>,
}

impl Rollback {
    fn push(&mut self, undo: Undo) {
        self.stack.push(undo);
    }

    /// Undo everything. Cleanup errors are logged, never surfaced.
    async fn unwind<S: ComposeSteps + ?Sized>(&mut self, steps: &mut S) {
        while let Some(undo) = self.stack.pop() {
            let result = match &undo {
                Undo::Machine(machine) => steps.destroy_machine(machine).await,
                Undo::Volume(volume) => steps.delete_volume(volume).await,
            };
            match result {
                Ok(()) => debug!("Rolled back {:?}", undo),
                Err(err) => warn!("Cleanup of {:?} failed: {}", undo, err),
            }
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Result of a successful compose
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    pub handle: MachineHandle,
    pub machine: DiscoveredMachine,
    pub history: Vec<ComposeState>,
}

/// Runs one compose through the state machine
#[derive(Debug)]
pub struct ComposeExecutor {
    state: ComposeState,
    history: Vec<ComposeState>,
}

impl Default for ComposeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposeExecutor {
    /// A fresh executor; planning has already succeeded
    pub fn new() -> Self {
        Self {
            state: ComposeState::Planning,
            history: vec![ComposeState::Planning],
        }
    }

    pub fn state(&self) -> ComposeState {
        self.state
    }

    pub fn history(&self) -> &[ComposeState] {
        &self.history
    }

    fn transition(&mut self, to: ComposeState, hostname: &str) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::Internal(format!(
                "illegal compose transition {} -> {}",
                self.state, to
            )));
        }
        info!("Compose {}: {} -> {}", hostname, self.state, to);
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Apply `plan`. On failure everything created is removed first.
    pub async fn execute<S: ComposeSteps + ?Sized>(
        &mut self,
        steps: &mut S,
        plan: &CompositionPlan,
    ) -> Result<ComposeOutcome> {
        let mut rollback = Rollback::default();

        match self.run(steps, plan, &mut rollback).await {
            Ok((handle, machine)) => {
                self.transition(ComposeState::Done, &plan.hostname)?;
                Ok(ComposeOutcome {
                    handle,
                    machine,
                    history: self.history.clone(),
                })
            }
            Err(err) => {
                warn!(
                    "Compose {} failed during {}: {}; rolling back",
                    plan.hostname, self.state, err
                );
                let failed_in = self.state;
                self.state = ComposeState::Failed;
                self.history.push(ComposeState::Failed);
                rollback.unwind(steps).await;
                debug!("Rollback after {} complete", failed_in);
                Err(err)
            }
        }
    }

    async fn run<S: ComposeSteps + ?Sized>(
        &mut self,
        steps: &mut S,
        plan: &CompositionPlan,
        rollback: &mut Rollback,
    ) -> Result<(MachineHandle, DiscoveredMachine)> {
        let hostname = plan.hostname.as_str();

        self.transition(ComposeState::AllocatingStorage, hostname)?;
        let mut volumes = Vec::new();
        for disk in &plan.disks {
            if let Some(volume) = steps.create_volume(plan, disk).await? {
                rollback.push(Undo::Volume(volume.clone()));
                volumes.push(volume);
            }
        }

        self.transition(ComposeState::DefiningMachine, hostname)?;
        let machine = steps.define_machine(plan).await?;
        rollback.push(Undo::Machine(machine.clone()));

        self.transition(ComposeState::AttachingNetwork, hostname)?;
        for interface in &plan.interfaces {
            steps.attach_interface(&machine, interface).await?;
        }

        self.transition(ComposeState::AttachingStorage, hostname)?;
        for volume in &volumes {
            let device = block_device_name(steps.device_prefix(), volume.disk_index);
            steps.attach_volume(&machine, volume, &device).await?;
        }

        self.transition(ComposeState::ValidatingStartup, hostname)?;
        steps.validate_startup(&machine).await?;

        self.transition(ComposeState::Finalizing, hostname)?;
        let discovered = steps.finalize(&machine, plan).await?;

        Ok((machine, discovered))
    }
}
