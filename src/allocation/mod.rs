//! Composition Planner
//!
//! Resolves a compose request against pool, volume-group and network
//! inventory into a validated plan:
//! - Disk intent from request tags
//! - Storage placement with running headroom counters
//! - DHCP-safe network attachment selection

pub mod network;
pub mod placement;
pub mod planner;
pub mod policy;

pub use network::{Attachment, ManagedNetwork, NetworkInventory};
pub use placement::{DiskPlacement, LocalStorage, StoragePlacer};
pub use planner::{CompositionPlan, CompositionPlanner, PlannedDisk, PlannedInterface, PlanningInventory};
pub use policy::{disk_intent, DiskIntent};
