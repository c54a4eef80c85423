//! Progress events for long-running tree operations.
//!
//! Observers are called synchronously on the calling thread; they must not
//! call back into the service that emitted the event.

use crate::model::node::{NodeId, ProjectId};

/// Simplification pass kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplifyPass {
    Flatten,
    PruneChains,
}

impl SimplifyPass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flatten => "flatten",
            Self::PruneChains => "prune_chains",
        }
    }
}

/// Observable engine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// Cached aggregates of one node were recomputed.
    NodeUpgraded { node_id: NodeId, depth: u32 },
    /// `source` was absorbed into `dest`.
    NodeMerged { source: NodeId, dest: NodeId },
    /// Import progress after each created node.
    ImportProgress {
        project_id: ProjectId,
        nodes_created: usize,
        nodes_total: usize,
        objects_attached: usize,
    },
    SimplifyFinished { pass: SimplifyPass, merged: usize },
}

/// Receiver of `TreeEvent`s.
pub trait TreeObserver {
    fn on_event(&self, event: &TreeEvent);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TreeObserver for NoopObserver {
    fn on_event(&self, _event: &TreeEvent) {}
}
