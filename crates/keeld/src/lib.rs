//! keeld — assembles Keel nodes out of the library crates.
//!
//! Each [`node::Node`] owns an in-memory local store and runs the elector,
//! membership sync, the four table replicators, and on masters the
//! scheduler and policy engine. [`simulation`] builds a whole cluster of
//! them around one shared [`keel_kv::MemoryKv`].

pub mod node;
pub mod simulation;

pub use node::{Node, NodeSpec, NodeSummary};
pub use simulation::Simulation;
