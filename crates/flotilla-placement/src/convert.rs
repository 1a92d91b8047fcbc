//! Snapshot construction from record store types.
//!
//! Bridges `flotilla_state::{Node, Layer, Container}` to the planners'
//! [`NodeSlot`] and [`ContainerRef`].

use flotilla_state::{Container, Layer, Node, NodeStatus};

use crate::{ContainerRef, NodeSlot, Snapshot};

/// Build a [`Snapshot`] of one formation.
///
/// `nodes` must be in creation order and `containers` oldest first, as
/// the record store returns them. A node can receive containers when its
/// layer is a runtime layer and it is neither being destroyed nor failed.
pub fn snapshot_from_records(nodes: &[Node], layers: &[Layer], containers: &[Container]) -> Snapshot {
    let nodes = nodes
        .iter()
        .map(|node| {
            let runtime_layer = layers
                .iter()
                .any(|l| l.id == node.layer && l.formation == node.formation && l.runtime);
            let usable = !matches!(node.status, NodeStatus::Destroying | NodeStatus::Failed);
            NodeSlot {
                node_id: node.id.clone(),
                runtime: runtime_layer && usable,
            }
        })
        .collect();

    let containers = containers
        .iter()
        .map(|c| ContainerRef {
            app: c.app.clone(),
            node: c.node.clone(),
            kind: c.kind.clone(),
            num: c.num,
        })
        .collect();

    Snapshot { nodes, containers }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn layer(id: &str, runtime: bool) -> Layer {
        Layer {
            id: id.to_string(),
            formation: "f1".to_string(),
            owner: "alice".to_string(),
            flavor: "mock".to_string(),
            proxy: !runtime,
            runtime,
            ssh_username: "ubuntu".to_string(),
            ssh_private_key: String::new(),
            ssh_public_key: String::new(),
            ssh_port: 22,
            config: BTreeMap::new(),
            created: 0,
        }
    }

    fn node(layer: &str, num: u32, status: NodeStatus) -> Node {
        Node {
            id: Node::make_id("f1", layer, num),
            formation: "f1".to_string(),
            layer: layer.to_string(),
            owner: "alice".to_string(),
            num,
            provider_id: None,
            fqdn: None,
            metadata: BTreeMap::new(),
            status,
            created: 0,
        }
    }

    #[test]
    fn runtime_flag_follows_layer_and_status() {
        let layers = vec![layer("rt", true), layer("px", false)];
        let nodes = vec![
            node("rt", 1, NodeStatus::Active),
            node("px", 1, NodeStatus::Active),
            node("rt", 2, NodeStatus::Failed),
            node("rt", 3, NodeStatus::Unprovisioned),
        ];
        let snap = snapshot_from_records(&nodes, &layers, &[]);
        let runtime: Vec<&str> = snap.runtime_nodes().map(|n| n.as_str()).collect();
        assert_eq!(runtime, vec!["f1-rt-1", "f1-rt-3"]);
    }
}
