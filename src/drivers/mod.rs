//! Pod Drivers
//!
//! One [`PodDriver`] implementation per backend:
//! - virsh: libvirt hosts over an interactive CLI session
//! - rsd: Rack Scale Design pods over Redfish
//!
//! Callers pick a driver by name through the [`DriverRegistry`] and only
//! ever see the shared descriptor and trait.

pub mod rsd;
pub mod virsh;

use crate::config::PodConfig;
use crate::domain::{Capability, DriverDescriptor, PodDriverRef};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

pub use rsd::{RsdConfig, RsdDriver};
pub use virsh::{VirshConfig, VirshDriver};

/// Builds drivers of one kind
pub trait DriverFactory: Send + Sync {
    /// Static description: name, settings, capabilities
    fn descriptor(&self) -> DriverDescriptor;

    /// Validate the pod parameters and construct a driver
    fn build(&self, config: &PodConfig) -> Result<PodDriverRef>;
}

struct VirshFactory;

impl DriverFactory for VirshFactory {
    fn descriptor(&self) -> DriverDescriptor {
        VirshDriver::describe()
    }

    fn build(&self, config: &PodConfig) -> Result<PodDriverRef> {
        let virsh = VirshConfig::from_parameters(&config.parameters, config.session_timeout())?;
        Ok(Arc::new(VirshDriver::new(virsh)))
    }
}

struct RsdFactory;

impl DriverFactory for RsdFactory {
    fn descriptor(&self) -> DriverDescriptor {
        RsdDriver::describe()
    }

    fn build(&self, config: &PodConfig) -> Result<PodDriverRef> {
        let rsd = RsdConfig::from_parameters(&config.parameters, config.session_timeout())?;
        Ok(Arc::new(RsdDriver::new(rsd, config.poll_policy())?))
    }
}

/// Driver factories by name, in registration order
pub struct DriverRegistry {
    factories: IndexMap<String, Arc<dyn DriverFactory>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(VirshFactory));
        registry.register(Arc::new(RsdFactory));
        registry
    }
}

impl DriverRegistry {
    /// Registry with the built-in drivers
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Add a factory, replacing any factory of the same name
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        let name = factory.descriptor().name;
        debug!("Registered pod driver {}", name);
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<DriverDescriptor> {
        self.factories.get(name).map(|f| f.descriptor())
    }

    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        self.factories.values().map(|f| f.descriptor()).collect()
    }

    /// Drivers offering `capability`
    pub fn with_capability(&self, capability: Capability) -> Vec<DriverDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.capabilities.contains(&capability))
            .collect()
    }

    /// Build the driver named by `config`
    pub fn build(&self, config: &PodConfig) -> Result<PodDriverRef> {
        let factory = self.factories.get(&config.driver).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown driver '{}' (available: {})",
                config.driver,
                self.names().join(", ")
            ))
        })?;
        factory.build(config)
    }
}
