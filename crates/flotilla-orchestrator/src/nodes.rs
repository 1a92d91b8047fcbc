//! Single-node operations.

use flotilla_drivers::CommandOutput;
use flotilla_state::Node;

use crate::controller::Controller;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::tasks;

impl Controller {
    /// Create an unprovisioned node record in `layer`. Static nodes pass
    /// their `fqdn` up front.
    pub async fn create_node(
        &self,
        formation_id: &str,
        layer_id: &str,
        fqdn: Option<String>,
    ) -> OrchestratorResult<Node> {
        let layer = self.layer(formation_id, layer_id)?;
        let node = self
            .store
            .create_node(formation_id, layer_id, &layer.owner, fqdn)?;
        self.publish_formation(formation_id).await?;
        Ok(node)
    }

    /// Provision and bootstrap a node.
    pub async fn build_node(&self, formation_id: &str, node_id: &str) -> OrchestratorResult<Node> {
        let node = self.node(formation_id, node_id)?;
        let spec = self.node_spec_for(&node)?;
        let provider = self.drivers.provider(&spec.provider_type)?;
        let node = self
            .executor
            .run_single(tasks::build_node(
                self.store.clone(),
                provider,
                self.cm.clone(),
                node,
                spec,
            ))
            .await
            .map_err(OrchestratorError::provision)?;
        self.publish_formation(formation_id).await?;
        Ok(node)
    }

    /// Destroy a node at its provider and delete it with its containers.
    pub async fn destroy_node(&self, formation_id: &str, node_id: &str) -> OrchestratorResult<()> {
        let node = self.node(formation_id, node_id)?;
        let spec = self.node_spec_for(&node)?;
        let provider = self.drivers.provider(&spec.provider_type)?;
        self.executor
            .run_single(tasks::destroy_node(
                self.store.clone(),
                provider,
                self.cm.clone(),
                node,
                spec,
            ))
            .await
            .map_err(OrchestratorError::provision)?;
        self.publish_formation(formation_id).await?;
        Ok(())
    }

    pub async fn converge_node(
        &self,
        formation_id: &str,
        node_id: &str,
    ) -> OrchestratorResult<CommandOutput> {
        let node = self.node(formation_id, node_id)?;
        let spec = self.node_spec_for(&node)?;
        self.executor
            .run_single(tasks::converge_node(self.store.clone(), self.cm.clone(), node, spec))
            .await
            .map_err(OrchestratorError::converge)
    }

    /// Run a shell command on a node. A non-zero exit is returned, not
    /// raised.
    pub async fn run_node(
        &self,
        formation_id: &str,
        node_id: &str,
        command: &str,
    ) -> OrchestratorResult<CommandOutput> {
        let node = self.node(formation_id, node_id)?;
        let spec = self.node_spec_for(&node)?;
        self.executor
            .run_single(tasks::run_node(self.cm.clone(), spec, command.to_string()))
            .await
            .map_err(OrchestratorError::driver)
    }
}
