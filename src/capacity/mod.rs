//! Capacity Calculator
//!
//! Aggregates scraped inventory into pod totals and headroom hints,
//! including the volume-group accounting used for iSCSI placement.

pub mod hints;
pub mod remote;

pub use hints::{CapacityCalculator, PodTotals};
pub use remote::{iscsi_totals, master_volume, volume_group_capacities, VolumeGroupCapacity};
