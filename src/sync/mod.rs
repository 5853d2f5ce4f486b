//! Turning tree changes into renderer batches.

pub mod command;
pub mod scheduler;
pub mod wake;

pub use command::{Batch, Command, WireId};
pub use scheduler::Scheduler;
pub use wake::Wake;
