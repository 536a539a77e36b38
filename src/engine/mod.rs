//! Chain engine: the serial scheduler and its seams to the outside world.

pub mod collaborator;
pub mod continuation;
pub mod scheduler;

pub use collaborator::{Calculator, ItemRepository};
pub use continuation::{Completion, Continuation, Dispatch};
pub use scheduler::{ChainScheduler, RunHandle, RunReport, SchedulerConfig, SkippedItem};
