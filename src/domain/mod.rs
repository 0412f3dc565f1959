//! Domain layer - pod entities and the driver port
//!
//! Concrete drivers adapt their remote protocols to these types, following
//! hexagonal architecture principles.

pub mod model;
pub mod ports;
pub mod settings;

pub use model::*;
pub use ports::*;
pub use settings::{SettingField, SettingKind, SettingScope, ValidatedParameters};
