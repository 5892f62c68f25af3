//! Replication rules for each mirrored table.

use std::collections::BTreeMap;

use keel_state::{Connection, Container, Hostname, Label, Minion, Role, Row};
use serde::{Deserialize, Serialize};

use crate::sync::Replicated;

pub const CONTAINER_PATH: &str = "/containers";
pub const CONNECTION_PATH: &str = "/connections";
pub const LABEL_PATH: &str = "/labels";
pub const HOSTNAME_PATH: &str = "/hostnames";

// ── Containers ─────────────────────────────────────────────────────

/// A container as the leader publishes it. The container's IP and runtime
/// bookkeeping (docker id, pid, status) are managed on the worker running
/// it and never travel.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishedContainer {
    pub stitch_id: String,
    pub minion: String,
    pub image: String,
    pub image_id: String,
    pub command: Vec<String>,
    pub labels: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub filepath_to_content: BTreeMap<String, String>,
}

/// Fields whose change means a different container, not an update of the
/// same one. Labels, the assigned minion and the local IP are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub stitch_id: String,
    pub image: String,
    pub image_id: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub filepath_to_content: BTreeMap<String, String>,
}

impl Replicated for Container {
    const PATH: &'static str = CONTAINER_PATH;

    type Published = PublishedContainer;
    type Key = ContainerKey;

    fn publish(&self) -> PublishedContainer {
        PublishedContainer {
            stitch_id: self.stitch_id.clone(),
            minion: self.minion.clone(),
            image: self.image.clone(),
            image_id: self.image_id.clone(),
            command: self.command.clone(),
            labels: self.labels.clone(),
            env: self.env.clone(),
            filepath_to_content: self.filepath_to_content.clone(),
        }
    }

    fn key(p: &PublishedContainer) -> ContainerKey {
        ContainerKey {
            stitch_id: p.stitch_id.clone(),
            image: p.image.clone(),
            image_id: p.image_id.clone(),
            command: p.command.clone(),
            env: p.env.clone(),
            filepath_to_content: p.filepath_to_content.clone(),
        }
    }

    fn apply_remote(&mut self, remote: &PublishedContainer) {
        self.minion = remote.minion.clone();
        self.stitch_id = remote.stitch_id.clone();
        self.image = remote.image.clone();
        self.image_id = remote.image_id.clone();
        self.command = remote.command.clone();
        self.labels = remote.labels.clone();
        self.env = remote.env.clone();
        self.filepath_to_content = remote.filepath_to_content.clone();
    }

    /// Only placed containers leave the leader.
    fn publishable(&self) -> bool {
        !self.minion.is_empty()
    }

    /// Masters mirror every container; a worker keeps only its own.
    fn retain_remote(remote: &PublishedContainer, me: Option<&Minion>) -> bool {
        match me {
            Some(me) if me.role == Role::Master => true,
            Some(me) => !me.private_ip.is_empty() && remote.minion == me.private_ip,
            None => false,
        }
    }
}

// ── Whole-record tables ────────────────────────────────────────────

/// Tables replicated field-for-field: the published form is the row with
/// its id cleared, and it doubles as the match key.
macro_rules! replicate_whole {
    ($ty:ty, $path:expr) => {
        replicate_whole!($ty, $path, |_: &$ty| true);
    };
    ($ty:ty, $path:expr, $publishable:expr) => {
        impl Replicated for $ty {
            const PATH: &'static str = $path;

            type Published = $ty;
            type Key = $ty;

            fn publish(&self) -> $ty {
                let mut published = self.clone();
                published.set_id(0);
                published
            }

            fn key(published: &$ty) -> $ty {
                published.clone()
            }

            fn apply_remote(&mut self, remote: &$ty) {
                let id = self.id();
                *self = remote.clone();
                self.set_id(id);
            }

            fn publishable(&self) -> bool {
                ($publishable)(self)
            }
        }
    };
}

replicate_whole!(Connection, CONNECTION_PATH);
// A label without an IP has not been allocated yet.
replicate_whole!(Label, LABEL_PATH, |label: &Label| !label.ip.is_empty());
replicate_whole!(Hostname, HOSTNAME_PATH);
