//! Flattening records into driver specs.

use std::sync::Arc;

use flotilla_drivers::{
    AppSpec, FormationSpec, LayerSpec, NodeSpec, ProviderDriver, ServiceSpec, UserSpec,
};
use flotilla_state::{App, Formation, Layer, Node, Service, User};

use crate::controller::Controller;
use crate::error::{OrchestratorError, OrchestratorResult};

impl Controller {
    /// Resolve a layer's flavor and provider into a self-contained spec.
    pub(crate) fn layer_spec(&self, layer: &Layer) -> OrchestratorResult<LayerSpec> {
        let flavor = self
            .store
            .get_flavor(&layer.owner, &layer.flavor)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("flavor {}", layer.flavor)))?;
        let provider = self
            .store
            .get_provider(&flavor.owner, &flavor.provider)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("provider {}", flavor.provider)))?;
        Ok(LayerSpec {
            id: layer.id.clone(),
            formation: layer.formation.clone(),
            provider_type: provider.kind,
            creds: provider.creds,
            params: flavor.params,
            runtime: layer.runtime,
            proxy: layer.proxy,
            ssh_username: layer.ssh_username.clone(),
            ssh_public_key: layer.ssh_public_key.clone(),
            ssh_private_key: layer.ssh_private_key.clone(),
            ssh_port: layer.ssh_port,
            config: layer.config.clone(),
        })
    }

    pub(crate) fn provider_for(&self, spec: &LayerSpec) -> OrchestratorResult<Arc<dyn ProviderDriver>> {
        Ok(self.drivers.provider(&spec.provider_type)?)
    }

    /// Spec for `node`, resolving its layer.
    pub(crate) fn node_spec_for(&self, node: &Node) -> OrchestratorResult<NodeSpec> {
        let layer = self.layer(&node.formation, &node.layer)?;
        Ok(node_spec(&self.layer_spec(&layer)?, node))
    }
}

/// Fold a node's own fields into its layer's spec.
pub(crate) fn node_spec(layer: &LayerSpec, node: &Node) -> NodeSpec {
    NodeSpec {
        id: node.id.clone(),
        formation: node.formation.clone(),
        layer: node.layer.clone(),
        provider_type: layer.provider_type.clone(),
        creds: layer.creds.clone(),
        params: layer.params.clone(),
        runtime: layer.runtime,
        proxy: layer.proxy,
        ssh_username: layer.ssh_username.clone(),
        ssh_public_key: layer.ssh_public_key.clone(),
        ssh_private_key: layer.ssh_private_key.clone(),
        ssh_port: layer.ssh_port,
        config: layer.config.clone(),
        provider_id: node.provider_id.clone(),
        fqdn: node.fqdn.clone(),
    }
}

pub(crate) fn formation_spec(formation: &Formation) -> FormationSpec {
    FormationSpec {
        id: formation.id.clone(),
        domain: formation.domain.clone(),
    }
}

pub(crate) fn app_spec(app: &App) -> AppSpec {
    AppSpec {
        id: app.id.clone(),
        formation: app.formation.clone(),
        owner: app.owner.clone(),
    }
}

pub(crate) fn user_spec(user: &User) -> UserSpec {
    UserSpec {
        username: user.username.clone(),
        keys: user.keys.clone(),
    }
}

pub(crate) fn service_spec(service: &Service) -> ServiceSpec {
    ServiceSpec {
        name: service.name.clone(),
        app: service.app.clone(),
        kind: service.kind.clone(),
        plan: service.plan.clone(),
    }
}
