//! Error types for election and replication.

use keel_kv::KvError;
use keel_state::StateError;
use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("distributed store error: {0}")]
    Kv(#[from] KvError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// The value at a distributed path did not parse.
    #[error("malformed value at {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("failed to encode {path}: {reason}")]
    Encode { path: String, reason: String },
}
