//! Inventory normalisation shared by the scrapers
//!
//! Drivers speak different wire formats; these helpers turn vendor units,
//! architecture names, interface speeds and XML documents into the uniform
//! entities of the domain layer.

pub mod architecture;
pub mod interfaces;
pub mod units;
pub mod xml;

pub use architecture::{canonical as canonical_architecture, require_canonical};
pub use interfaces::{mark_boot_interface, speed_tags};
pub use units::{GIB, KIB, MIB, TIB};
pub use xml::XmlElement;
