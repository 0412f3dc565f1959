//! Composition Executor
//!
//! State machine, reverse-order rollback and bounded polling for compose
//! operations. Drivers plug in through [`ComposeSteps`].

pub mod executor;
pub mod poll;
pub mod state;

pub use executor::{
    block_device_name, ComposeExecutor, ComposeOutcome, ComposeSteps, CreatedVolume, MachineHandle,
};
pub use poll::{PollPolicy, PollStatus};
pub use state::ComposeState;
