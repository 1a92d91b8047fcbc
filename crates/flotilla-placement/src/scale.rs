//! Scale planning for one app.
//!
//! Removals take the app's oldest container on the node carrying the most
//! containers of that type across the formation. Additions go to the
//! runtime node carrying the fewest. Ties go to the node created first.

use std::collections::{BTreeMap, HashMap};

use flotilla_state::{AppId, NodeId};
use tracing::debug;

use crate::error::{PlacementError, PlacementResult};
use crate::{ContainerRef, Snapshot};

/// The container changes needed to bring one app to its requested counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalePlan {
    pub app: AppId,
    /// Containers to delete, in the order they were chosen.
    pub removals: Vec<ContainerRef>,
    /// `(type, node)` pairs to create, in the order they were chosen.
    pub additions: Vec<(String, NodeId)>,
    /// The requested counts, validated.
    pub requested: BTreeMap<String, u32>,
    /// The app's full desired-count map after the plan is applied.
    pub counts: BTreeMap<String, u32>,
}

impl ScalePlan {
    pub fn is_noop(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// `web=2 worker=1` style rendering of the requested counts.
    pub fn summary(&self) -> String {
        self.requested
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Plan a scale of `app` to the `requested` per-type counts.
///
/// `current_counts` is the app's stored desired-count map; requested
/// types overwrite their entries. Every count is validated before any
/// planning happens, so an invalid request yields no partial plan.
pub fn plan_scale(
    snapshot: &Snapshot,
    app: &str,
    current_counts: &BTreeMap<String, u32>,
    requested: &BTreeMap<String, i64>,
) -> PlacementResult<ScalePlan> {
    let mut validated = BTreeMap::new();
    for (kind, &count) in requested {
        let count = u32::try_from(count).map_err(|_| PlacementError::InvalidCount {
            kind: kind.clone(),
            count,
        })?;
        validated.insert(kind.clone(), count);
    }

    let mut removals = Vec::new();
    let mut additions = Vec::new();

    for (kind, &want) in &validated {
        let want = want as usize;
        let mut mine: Vec<ContainerRef> = snapshot
            .containers
            .iter()
            .filter(|c| c.app == app && &c.kind == kind)
            .cloned()
            .collect();

        let mut load: HashMap<NodeId, u32> = HashMap::new();
        for c in snapshot.containers.iter().filter(|c| &c.kind == kind) {
            *load.entry(c.node.clone()).or_default() += 1;
        }

        while mine.len() > want {
            let Some(node) = most_loaded_host(snapshot, &mine, &load) else {
                break;
            };
            // `mine` is oldest first, so the first match is the oldest.
            let Some(idx) = mine.iter().position(|c| c.node == node) else {
                break;
            };
            let victim = mine.remove(idx);
            if let Some(l) = load.get_mut(&node) {
                *l = l.saturating_sub(1);
            }
            debug!(%app, %kind, num = victim.num, node = %node, "planned container removal");
            removals.push(victim);
        }

        let mut placed = mine.len();
        while placed < want {
            let node = least_loaded_runtime(snapshot, &load).ok_or_else(|| {
                PlacementError::NoCapacity {
                    app: app.to_string(),
                    kind: kind.clone(),
                }
            })?;
            *load.entry(node.clone()).or_default() += 1;
            debug!(%app, %kind, node = %node, "planned container addition");
            additions.push((kind.clone(), node));
            placed += 1;
        }
    }

    let mut counts = current_counts.clone();
    counts.extend(validated.iter().map(|(k, v)| (k.clone(), *v)));

    Ok(ScalePlan {
        app: app.to_string(),
        removals,
        additions,
        requested: validated,
        counts,
    })
}

/// Among nodes hosting at least one of `mine`, the one with the highest
/// load; first in creation order on ties.
fn most_loaded_host(
    snapshot: &Snapshot,
    mine: &[ContainerRef],
    load: &HashMap<NodeId, u32>,
) -> Option<NodeId> {
    let mut hosts: Vec<&NodeId> = mine.iter().map(|c| &c.node).collect();
    hosts.sort_by_key(|n| snapshot.node_position(n));
    hosts.dedup();

    let mut best: Option<(&NodeId, u32)> = None;
    for host in hosts {
        let l = load.get(host).copied().unwrap_or(0);
        if best.is_none_or(|(_, bl)| l > bl) {
            best = Some((host, l));
        }
    }
    best.map(|(n, _)| n.clone())
}

/// The runtime node with the lowest load; first in creation order on ties.
fn least_loaded_runtime(snapshot: &Snapshot, load: &HashMap<NodeId, u32>) -> Option<NodeId> {
    let mut best: Option<(&NodeId, u32)> = None;
    for node in snapshot.runtime_nodes() {
        let l = load.get(node).copied().unwrap_or(0);
        if best.is_none_or(|(_, bl)| l < bl) {
            best = Some((node, l));
        }
    }
    best.map(|(n, _)| n.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeSlot;

    fn nodes(ids: &[&str]) -> Vec<NodeSlot> {
        ids.iter()
            .map(|id| NodeSlot {
                node_id: id.to_string(),
                runtime: true,
            })
            .collect()
    }

    fn c(app: &str, node: &str, kind: &str, num: u32) -> ContainerRef {
        ContainerRef {
            app: app.to_string(),
            node: node.to_string(),
            kind: kind.to_string(),
            num,
        }
    }

    fn req(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn targets(plan: &ScalePlan) -> Vec<&str> {
        plan.additions.iter().map(|(_, n)| n.as_str()).collect()
    }

    #[test]
    fn additions_spread_least_loaded_first() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1", "n2"]),
            containers: vec![],
        };
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 3)])).unwrap();
        assert_eq!(targets(&plan), vec!["n1", "n2", "n1"]);
        assert_eq!(plan.counts.get("web"), Some(&3));
    }

    #[test]
    fn additions_count_other_apps_load() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1", "n2"]),
            containers: vec![c("b", "n1", "web", 1), c("b", "n1", "web", 2)],
        };
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 1)])).unwrap();
        assert_eq!(targets(&plan), vec!["n2"]);
    }

    #[test]
    fn load_is_per_type() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1", "n2"]),
            containers: vec![c("b", "n1", "worker", 1), c("b", "n1", "worker", 2)],
        };
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 1)])).unwrap();
        assert_eq!(targets(&plan), vec!["n1"]);
    }

    #[test]
    fn removal_takes_most_loaded_then_first_created() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1", "n2"]),
            containers: vec![
                c("a", "n2", "web", 1),
                c("a", "n1", "web", 2),
                c("a", "n1", "web", 3),
            ],
        };
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 1)])).unwrap();
        let removed: Vec<u32> = plan.removals.iter().map(|c| c.num).collect();
        // n1 carries two, then the tie goes to n1 as the older node.
        assert_eq!(removed, vec![2, 3]);
    }

    #[test]
    fn removal_ignores_nodes_without_own_containers() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1", "n2"]),
            containers: vec![
                c("b", "n1", "web", 1),
                c("b", "n1", "web", 2),
                c("b", "n1", "web", 3),
                c("a", "n2", "web", 1),
            ],
        };
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 0)])).unwrap();
        assert_eq!(plan.removals, vec![c("a", "n2", "web", 1)]);
    }

    #[test]
    fn negative_count_is_rejected() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1"]),
            containers: vec![],
        };
        let err =
            plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 2), ("worker", -1)]))
                .unwrap_err();
        assert_eq!(
            err,
            PlacementError::InvalidCount {
                kind: "worker".to_string(),
                count: -1
            }
        );
    }

    #[test]
    fn no_runtime_nodes_is_no_capacity() {
        let snapshot = Snapshot {
            nodes: vec![NodeSlot {
                node_id: "proxy-1".to_string(),
                runtime: false,
            }],
            containers: vec![],
        };
        let err = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 1)])).unwrap_err();
        assert!(matches!(err, PlacementError::NoCapacity { .. }));

        // Scaling to zero needs no capacity.
        let plan = plan_scale(&snapshot, "a", &BTreeMap::new(), &req(&[("web", 0)])).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn unchanged_counts_are_a_noop_and_keep_other_types() {
        let snapshot = Snapshot {
            nodes: nodes(&["n1"]),
            containers: vec![c("a", "n1", "web", 1)],
        };
        let mut current = BTreeMap::new();
        current.insert("worker".to_string(), 0);
        let plan = plan_scale(&snapshot, "a", &current, &req(&[("web", 1)])).unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.counts.len(), 2);
        assert_eq!(plan.summary(), "web=1");
    }
}
