//! keel-engine — converges the local store onto a desired [`Policy`].
//!
//! [`update_policy`] matches the policy against the connection, placement,
//! and container tables inside one transaction. Containers are paired with
//! a scored join so that a relabelled container keeps its row (and with it
//! its placement) instead of being replaced. [`PolicyEngine`] runs that on
//! the leader whenever membership or leadership changes.
//!
//! [`Policy`]: keel_core::Policy

pub mod engine;
pub mod reconcile;

pub use engine::PolicyEngine;
pub use reconcile::{PolicyStats, update_policy};
