//! Pod Manager
//!
//! Front door for one pod: wraps its driver, rejects requests the driver
//! can never satisfy before any remote call, and records every operation in
//! logs and metrics. No inventory is kept between calls; every answer comes
//! from a fresh discovery inside the driver.

use crate::config::PodConfig;
use crate::domain::{
    ComposeRequest, ComposedMachine, DiscoveredPod, DriverDescriptor, Hints, PodDriverRef,
    PowerParameters, PowerState,
};
use crate::drivers::DriverRegistry;
use crate::error::{Error, Result};
use crate::metrics::{Outcome, PodMetrics};
use std::future::Future;
use std::time::Instant;
use tracing::{error, info};

pub struct PodManager {
    pod_id: String,
    driver: PodDriverRef,
    metrics: PodMetrics,
}

impl PodManager {
    pub fn new(pod_id: impl Into<String>, driver: PodDriverRef) -> Result<Self> {
        Ok(Self {
            pod_id: pod_id.into(),
            driver,
            metrics: PodMetrics::new()?,
        })
    }

    /// Build the configured driver and wrap it
    pub fn from_config(registry: &DriverRegistry, config: &PodConfig) -> Result<Self> {
        Self::new(config.name.clone(), registry.build(config)?)
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    pub fn descriptor(&self) -> DriverDescriptor {
        self.driver.descriptor()
    }

    pub fn metrics(&self) -> &PodMetrics {
        &self.metrics
    }

    async fn observe<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let driver = self.driver.descriptor().name;
        let started = Instant::now();
        let result = future.await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                info!(
                    pod = %self.pod_id,
                    driver = %driver,
                    "{} finished in {:?}", operation, elapsed
                );
                self.metrics.record(&driver, operation, Outcome::Success, elapsed);
            }
            Err(err) => {
                error!(
                    pod = %self.pod_id,
                    driver = %driver,
                    action = ?err.action(),
                    "{} failed after {:?}: {}", operation, elapsed, err
                );
                self.metrics.record(&driver, operation, Outcome::Failure, elapsed);
            }
        }
        result
    }

    pub async fn discover(&self) -> Result<DiscoveredPod> {
        self.observe("discover", self.driver.discover(&self.pod_id)).await
    }

    pub async fn compose(&self, request: &ComposeRequest) -> Result<ComposedMachine> {
        self.observe("compose", async {
            if !self
                .driver
                .supported_architectures()
                .contains(&request.architecture)
            {
                return Err(Error::UnsupportedArchitecture {
                    architecture: request.architecture.clone(),
                });
            }
            self.driver.compose(&self.pod_id, request).await
        })
        .await
    }

    pub async fn decompose(&self, context: &PowerParameters) -> Result<Hints> {
        self.observe("decompose", self.driver.decompose(&self.pod_id, context))
            .await
    }

    pub async fn power_on(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        self.observe("power_on", self.driver.power_on(system_id, context))
            .await
    }

    pub async fn power_off(&self, system_id: &str, context: &PowerParameters) -> Result<()> {
        self.observe("power_off", self.driver.power_off(system_id, context))
            .await
    }

    pub async fn power_query(&self, system_id: &str, context: &PowerParameters) -> Result<PowerState> {
        self.observe("power_query", self.driver.power_query(system_id, context))
            .await
    }
}
