//! keel-core — configuration and policy types shared across Keel crates.

pub mod config;
pub mod policy;

pub use config::{ClusterConfig, KeelConfig};
pub use policy::{Policy, PolicyConnection, PolicyContainer, PolicyPlacement};
