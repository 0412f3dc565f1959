//! Pod Resource Manager
//!
//! Discovers, composes and power-controls machines on composable "pods":
//! libvirt hosts driven through `virsh`, and Rack Scale Design pods driven
//! through Redfish.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                PodManager (metrics, logging, guards)              │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  DriverRegistry  ──►  PodDriver (virsh │ rsd)                     │
//! ├──────────────┬──────────────┬──────────────┬──────────────────────┤
//! │  Inventory   │  Capacity    │  Allocation  │  Compose Executor    │
//! │  Scrapers    │  Hints       │  Planner     │  (state machine,     │
//! │              │              │              │   reverse rollback)  │
//! ├──────────────┴──────────────┴──────────────┴──────────────────────┤
//! │          Sessions: virsh prompt shell  │  Redfish HTTP            │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Resource model, settings and the driver port
//! - [`session`]: Remote sessions (interactive CLI, Redfish HTTP)
//! - [`inventory`]: Parsing and normalisation helpers
//! - [`capacity`]: Hint derivation and iSCSI accounting
//! - [`allocation`]: Composition planning
//! - [`compose`]: Compose state machine and bounded polling
//! - [`drivers`]: virsh and RSD drivers, driver registry
//! - [`manager`]: Per-pod front door
//! - [`error`]: Error types and handling

pub mod allocation;
pub mod capacity;
pub mod compose;
pub mod config;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod inventory;
pub mod manager;
pub mod metrics;
pub mod session;

// Re-export commonly used types
pub use allocation::{CompositionPlan, CompositionPlanner, PlanningInventory};
pub use compose::{ComposeExecutor, ComposeState, PollPolicy};
pub use config::{PodConfig, PollConfig};

pub use domain::{
    BootOrderMode, Capability, ComposeRequest, ComposedMachine, DiscoveredMachine, DiscoveredPod,
    DriverDescriptor, Hints, PodDriver, PodDriverRef, PowerParameters, PowerState,
};

pub use drivers::{DriverFactory, DriverRegistry, RsdDriver, VirshDriver};
pub use error::{Error, ErrorAction, ResourceKind, Result};
pub use manager::PodManager;
pub use metrics::PodMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
