//! Flotilla container placement — scale planning and fleet balancing.
//!
//! This crate decides *where* containers go. It never touches the record
//! store: callers build a [`Snapshot`] of a formation, ask for a plan, and
//! apply the plan themselves in one store transaction.
//!
//! # Components
//!
//! - **`scale`** — Per-app scale plans (least-loaded add, most-loaded remove)
//! - **`balance`** — Formation-wide histogram rebalancing
//! - **`convert`** — Snapshot construction from record store types

pub mod balance;
pub mod convert;
pub mod error;
pub mod scale;

pub use balance::{BalancePlan, Move, plan_balance};
pub use convert::snapshot_from_records;
pub use error::{PlacementError, PlacementResult};
pub use scale::{ScalePlan, plan_scale};

use flotilla_state::{AppId, NodeId};

/// A node as seen by the planners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSlot {
    pub node_id: NodeId,
    /// Whether the node may receive new containers.
    pub runtime: bool,
}

/// A placed container as seen by the planners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub app: AppId,
    pub node: NodeId,
    pub kind: String,
    pub num: u32,
}

/// Point-in-time view of a formation.
///
/// `nodes` is in node creation order and `containers` oldest first; the
/// planners rely on both orders for their tie-breaks.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub nodes: Vec<NodeSlot>,
    pub containers: Vec<ContainerRef>,
}

impl Snapshot {
    /// Runtime node ids in creation order.
    pub fn runtime_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().filter(|n| n.runtime).map(|n| &n.node_id)
    }

    fn node_position(&self, node_id: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.node_id == node_id)
            .unwrap_or(usize::MAX)
    }
}
