//! keel-scheduler — constraint-based container placement.
//!
//! The leading master assigns every container to a worker minion by
//! writing the worker's private IP into `Container::minion`.
//!
//! # Architecture
//!
//! - [`constraint`] — [`valid_placement`], the single predicate deciding
//!   whether a container may sit on a machine next to its current peers.
//! - [`placer`] — one pass: drop assignments to vanished workers, evict
//!   containers that violate the rules, then place the unassigned ones on
//!   the least loaded worker that accepts them.
//! - [`scheduler`] — the trigger-driven loop that runs passes on the
//!   leader.

pub mod constraint;
pub mod error;
pub mod placer;
pub mod scheduler;

pub use constraint::valid_placement;
pub use error::{SchedulerError, SchedulerResult};
pub use placer::{PlacementStats, place_containers, schedule};
pub use scheduler::Scheduler;
