//! Formation-wide rebalancing.
//!
//! For each container type, runtime nodes are bucketed by how many
//! containers of that type they carry. While the fullest and emptiest
//! buckets differ by more than one, the oldest container on the first
//! fullest node moves to the first emptiest node. Every move lowers the
//! sum of squared per-node counts by at least two, so the loop ends.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use flotilla_state::NodeId;
use tracing::debug;

use crate::{ContainerRef, Snapshot};

/// Relocate `container` onto `to`: delete it, then create a fresh
/// container of the same app and type there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub container: ContainerRef,
    pub to: NodeId,
}

/// Ordered list of moves that evens out a formation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancePlan {
    pub moves: Vec<Move>,
}

impl BalancePlan {
    pub fn is_noop(&self) -> bool {
        self.moves.is_empty()
    }

    /// Apps touched by the plan, sorted.
    pub fn affected_apps(&self) -> BTreeSet<&str> {
        self.moves.iter().map(|m| m.container.app.as_str()).collect()
    }
}

/// Plan moves so that, for every type, runtime node counts differ by at
/// most one. Without runtime nodes the plan is empty.
pub fn plan_balance(snapshot: &Snapshot) -> BalancePlan {
    let runtime: Vec<&NodeId> = snapshot.runtime_nodes().collect();
    let mut moves = Vec::new();
    if runtime.is_empty() {
        return BalancePlan { moves };
    }

    let kinds: BTreeSet<&str> = snapshot.containers.iter().map(|c| c.kind.as_str()).collect();
    for kind in kinds {
        balance_kind(snapshot, &runtime, kind, &mut moves);
    }
    BalancePlan { moves }
}

fn balance_kind(snapshot: &Snapshot, runtime: &[&NodeId], kind: &str, moves: &mut Vec<Move>) {
    // Per-node queues of movable containers, oldest first.
    let mut hosted: HashMap<&str, VecDeque<&ContainerRef>> =
        runtime.iter().map(|n| (n.as_str(), VecDeque::new())).collect();
    for c in snapshot.containers.iter().filter(|c| c.kind == kind) {
        if let Some(queue) = hosted.get_mut(c.node.as_str()) {
            queue.push_back(c);
        }
    }

    let mut histogram: BTreeMap<u32, VecDeque<&str>> = BTreeMap::new();
    for node in runtime {
        let count = hosted.get(node.as_str()).map_or(0, |q| q.len() as u32);
        histogram.entry(count).or_default().push_back(node.as_str());
    }

    loop {
        let (Some((&min, _)), Some((&max, _))) =
            (histogram.first_key_value(), histogram.last_key_value())
        else {
            break;
        };
        if max - min <= 1 {
            break;
        }

        let Some(from) = pop_bucket(&mut histogram, max) else {
            break;
        };
        let Some(to) = pop_bucket(&mut histogram, min) else {
            break;
        };
        // A node that received a move never becomes the fullest while the
        // spread exceeds one, so `from` always still has an original.
        let Some(container) = hosted.get_mut(from).and_then(|q| q.pop_front()) else {
            break;
        };

        debug!(
            %kind,
            app = %container.app,
            num = container.num,
            from,
            to,
            "planned container move"
        );
        moves.push(Move {
            container: container.clone(),
            to: to.to_string(),
        });

        histogram.entry(max - 1).or_default().push_back(from);
        histogram.entry(min + 1).or_default().push_back(to);
    }
}

fn pop_bucket<'a>(histogram: &mut BTreeMap<u32, VecDeque<&'a str>>, count: u32) -> Option<&'a str> {
    let bucket = histogram.get_mut(&count)?;
    let node = bucket.pop_front();
    if bucket.is_empty() {
        histogram.remove(&count);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeSlot;

    fn snapshot(node_ids: &[&str], placed: &[(&str, &str, &str)]) -> Snapshot {
        Snapshot {
            nodes: node_ids
                .iter()
                .map(|id| NodeSlot {
                    node_id: id.to_string(),
                    runtime: true,
                })
                .collect(),
            containers: placed
                .iter()
                .enumerate()
                .map(|(i, (app, node, kind))| ContainerRef {
                    app: app.to_string(),
                    node: node.to_string(),
                    kind: kind.to_string(),
                    num: i as u32 + 1,
                })
                .collect(),
        }
    }

    /// Apply the plan to the snapshot the way the orchestrator would.
    fn apply(mut snap: Snapshot, plan: &BalancePlan) -> Snapshot {
        let mut next = snap.containers.len() as u32 + 1;
        for m in &plan.moves {
            snap.containers.retain(|c| c != &m.container);
            snap.containers.push(ContainerRef {
                app: m.container.app.clone(),
                node: m.to.clone(),
                kind: m.container.kind.clone(),
                num: next,
            });
            next += 1;
        }
        snap
    }

    fn spread(snap: &Snapshot, kind: &str) -> u32 {
        let counts: Vec<u32> = snap
            .runtime_nodes()
            .map(|n| {
                snap.containers
                    .iter()
                    .filter(|c| &c.node == n && c.kind == kind)
                    .count() as u32
            })
            .collect();
        counts.iter().max().unwrap() - counts.iter().min().unwrap()
    }

    #[test]
    fn already_balanced_is_noop() {
        let snap = snapshot(&["n1", "n2", "n3"], &[("a", "n1", "web"), ("a", "n2", "web")]);
        assert!(plan_balance(&snap).is_noop());
    }

    #[test]
    fn no_runtime_nodes_is_noop() {
        let snap = Snapshot {
            nodes: vec![NodeSlot {
                node_id: "p1".to_string(),
                runtime: false,
            }],
            containers: vec![],
        };
        assert!(plan_balance(&snap).is_noop());
    }

    #[test]
    fn pile_on_one_node_is_spread() {
        let snap = snapshot(
            &["n1", "n2", "n3"],
            &[
                ("a", "n1", "web"),
                ("a", "n1", "web"),
                ("b", "n1", "web"),
                ("b", "n1", "web"),
            ],
        );
        let plan = plan_balance(&snap);
        assert_eq!(plan.moves.len(), 2);
        // The oldest container moves first, to the first emptiest node.
        assert_eq!(plan.moves[0].container.num, 1);
        assert_eq!(plan.moves[0].to, "n2");
        assert_eq!(plan.moves[1].to, "n3");

        let after = apply(snap, &plan);
        assert!(spread(&after, "web") <= 1);
        assert!(plan_balance(&after).is_noop());
    }

    #[test]
    fn types_balance_independently() {
        let snap = snapshot(
            &["n1", "n2"],
            &[
                ("a", "n1", "web"),
                ("a", "n1", "web"),
                ("a", "n1", "web"),
                ("a", "n2", "worker"),
                ("a", "n2", "worker"),
                ("a", "n2", "worker"),
            ],
        );
        let plan = plan_balance(&snap);
        let after = apply(snap, &plan);
        assert!(spread(&after, "web") <= 1);
        assert!(spread(&after, "worker") <= 1);
        assert_eq!(plan.affected_apps().into_iter().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn non_runtime_nodes_are_ignored() {
        let mut snap = snapshot(
            &["n1", "n2"],
            &[
                ("a", "n1", "web"),
                ("a", "n2", "web"),
                ("a", "p1", "web"),
                ("a", "p1", "web"),
                ("a", "p1", "web"),
            ],
        );
        snap.nodes.push(NodeSlot {
            node_id: "p1".to_string(),
            runtime: false,
        });
        assert!(plan_balance(&snap).is_noop());
    }
}
