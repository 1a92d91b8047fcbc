//! Provider drivers — infrastructure behind layers and nodes.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{DriverError, DriverResult};
use crate::spec::{LayerSpec, NodeSpec};

/// What a provider reports back for a freshly built node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedNode {
    pub provider_id: String,
    pub fqdn: String,
    pub metadata: BTreeMap<String, String>,
}

/// A flavor a provider offers out of the box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorSeed {
    pub id: String,
    pub params: BTreeMap<String, String>,
}

/// Builds and tears down layers and nodes on some infrastructure.
///
/// Calls are blocking and run on the task executor's worker pool.
pub trait ProviderDriver: Send + Sync {
    fn build_layer(&self, layer: &LayerSpec) -> DriverResult<()>;

    fn destroy_layer(&self, layer: &LayerSpec) -> DriverResult<()>;

    fn build_node(&self, node: &NodeSpec) -> DriverResult<ProvisionedNode>;

    fn destroy_node(&self, node: &NodeSpec) -> DriverResult<()>;

    /// Flavors registered for a user when the provider is seeded.
    fn seed_flavors(&self) -> Vec<FlavorSeed>;
}

// ── Mock ──────────────────────────────────────────────────────────

/// In-process provider that fabricates nodes. Records every call and can
/// be told to fail for specific node or layer ids.
#[derive(Debug, Default)]
pub struct MockProvider {
    failing: Mutex<HashSet<String>>,
    built_nodes: Mutex<Vec<String>>,
    destroyed_nodes: Mutex<Vec<String>>,
    built_layers: Mutex<Vec<String>>,
    destroyed_layers: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every build/destroy of the node or layer with this id fail.
    pub fn fail_on(&self, id: impl Into<String>) {
        self.failing.lock().insert(id.into());
    }

    pub fn built_nodes(&self) -> Vec<String> {
        self.built_nodes.lock().clone()
    }

    pub fn destroyed_nodes(&self) -> Vec<String> {
        self.destroyed_nodes.lock().clone()
    }

    pub fn built_layers(&self) -> Vec<String> {
        self.built_layers.lock().clone()
    }

    pub fn destroyed_layers(&self) -> Vec<String> {
        self.destroyed_layers.lock().clone()
    }

    fn check(&self, id: &str, action: &str) -> DriverResult<()> {
        if self.failing.lock().contains(id) {
            return Err(DriverError::Provider(format!("mock {action} of {id} failed")));
        }
        Ok(())
    }
}

impl ProviderDriver for MockProvider {
    fn build_layer(&self, layer: &LayerSpec) -> DriverResult<()> {
        self.check(&layer.id, "layer build")?;
        self.built_layers.lock().push(layer.id.clone());
        debug!(layer = %layer.id, formation = %layer.formation, "mock layer built");
        Ok(())
    }

    fn destroy_layer(&self, layer: &LayerSpec) -> DriverResult<()> {
        self.check(&layer.id, "layer teardown")?;
        self.destroyed_layers.lock().push(layer.id.clone());
        debug!(layer = %layer.id, formation = %layer.formation, "mock layer destroyed");
        Ok(())
    }

    fn build_node(&self, node: &NodeSpec) -> DriverResult<ProvisionedNode> {
        self.check(&node.id, "node build")?;
        self.built_nodes.lock().push(node.id.clone());
        let mut metadata = BTreeMap::new();
        metadata.insert("provider".to_string(), "mock".to_string());
        if let Some(size) = node.params.get("size") {
            metadata.insert("size".to_string(), size.clone());
        }
        debug!(node = %node.id, "mock node built");
        Ok(ProvisionedNode {
            provider_id: format!("mock-{}", node.id),
            fqdn: format!("{}.mock.flotilla.local", node.id),
            metadata,
        })
    }

    fn destroy_node(&self, node: &NodeSpec) -> DriverResult<()> {
        self.check(&node.id, "node teardown")?;
        self.destroyed_nodes.lock().push(node.id.clone());
        debug!(node = %node.id, "mock node destroyed");
        Ok(())
    }

    fn seed_flavors(&self) -> Vec<FlavorSeed> {
        ["small", "large"]
            .into_iter()
            .map(|size| FlavorSeed {
                id: format!("mock-{size}"),
                params: BTreeMap::from([("size".to_string(), size.to_string())]),
            })
            .collect()
    }
}

// ── Static ────────────────────────────────────────────────────────

/// Provider for pre-existing hosts. Nodes must be created with an FQDN;
/// building only adopts them and destroying forgets them.
#[derive(Debug, Default)]
pub struct StaticProvider;

impl ProviderDriver for StaticProvider {
    fn build_layer(&self, _layer: &LayerSpec) -> DriverResult<()> {
        Ok(())
    }

    fn destroy_layer(&self, _layer: &LayerSpec) -> DriverResult<()> {
        Ok(())
    }

    fn build_node(&self, node: &NodeSpec) -> DriverResult<ProvisionedNode> {
        let fqdn = node.fqdn.clone().ok_or_else(|| {
            DriverError::InvalidSpec(format!("static node {} has no fqdn", node.id))
        })?;
        info!(node = %node.id, %fqdn, "static node adopted");
        Ok(ProvisionedNode {
            provider_id: fqdn.clone(),
            fqdn,
            metadata: BTreeMap::new(),
        })
    }

    fn destroy_node(&self, node: &NodeSpec) -> DriverResult<()> {
        info!(node = %node.id, "static node released");
        Ok(())
    }

    fn seed_flavors(&self) -> Vec<FlavorSeed> {
        vec![FlavorSeed {
            id: "static".to_string(),
            params: BTreeMap::new(),
        }]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node_spec(id: &str, fqdn: Option<&str>) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            formation: "f1".to_string(),
            layer: "l1".to_string(),
            provider_type: "mock".to_string(),
            creds: BTreeMap::new(),
            params: BTreeMap::from([("size".to_string(), "small".to_string())]),
            runtime: true,
            proxy: false,
            ssh_username: "ubuntu".to_string(),
            ssh_public_key: String::new(),
            ssh_private_key: String::new(),
            ssh_port: 22,
            config: BTreeMap::new(),
            provider_id: None,
            fqdn: fqdn.map(str::to_string),
        }
    }

    #[test]
    fn mock_build_node_reports_fqdn() {
        let provider = MockProvider::new();
        let built = provider.build_node(&node_spec("f1-l1-1", None)).unwrap();
        assert_eq!(built.fqdn, "f1-l1-1.mock.flotilla.local");
        assert_eq!(built.metadata.get("size").map(String::as_str), Some("small"));
        assert_eq!(provider.built_nodes(), vec!["f1-l1-1"]);
    }

    #[test]
    fn mock_failure_is_per_id() {
        let provider = MockProvider::new();
        provider.fail_on("f1-l1-2");
        assert!(provider.build_node(&node_spec("f1-l1-1", None)).is_ok());
        let err = provider.build_node(&node_spec("f1-l1-2", None)).unwrap_err();
        assert!(err.to_string().contains("f1-l1-2"));
    }

    #[test]
    fn static_requires_fqdn() {
        let provider = StaticProvider;
        assert!(matches!(
            provider.build_node(&node_spec("n", None)),
            Err(DriverError::InvalidSpec(_))
        ));
        let built = provider
            .build_node(&node_spec("n", Some("host.example.com")))
            .unwrap();
        assert_eq!(built.provider_id, "host.example.com");
    }
}
