//! Scheduler interface and the reference priority scheduler.

pub mod prio;
pub mod trait_def;

pub use prio::PriorityScheduler;
pub use trait_def::{priority, Scheduler};
