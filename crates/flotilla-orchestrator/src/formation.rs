//! Formation lifecycle: create, publish, converge, destroy.

use std::collections::BTreeMap;

use flotilla_state::Formation;
use flotilla_tasks::Task;
use serde_json::Value;
use tracing::info;

use crate::controller::{Controller, validate_slug};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::specs::{formation_spec, node_spec};
use crate::tasks;

impl Controller {
    pub async fn create_formation(
        &self,
        id: &str,
        owner: &str,
        domain: Option<String>,
    ) -> OrchestratorResult<Formation> {
        validate_slug("formation", id)?;
        let formation = self.store.insert_formation(Formation {
            id: id.to_string(),
            owner: owner.to_string(),
            domain,
            nodes: BTreeMap::new(),
            created: 0,
        })?;
        info!(formation = %formation.id, %owner, "formation created");
        self.publish_formation(id).await?;
        Ok(formation)
    }

    /// Recompute the formation databag and hand it to CM.
    pub async fn publish_formation(&self, formation_id: &str) -> OrchestratorResult<Value> {
        let formation = self.formation(formation_id)?;
        let databag = self.calculate_formation(formation_id)?;
        let cm = self.cm.clone();
        let spec = formation_spec(&formation);
        let bag = databag.clone();
        self.executor
            .run_single(Task::new(formation_id, move || {
                cm.publish_formation(&spec, &bag)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        Ok(databag)
    }

    /// Publish, then converge every node of the formation in one batch
    /// (plus the controller when asked). Returns the published databag.
    pub async fn converge_formation(
        &self,
        formation_id: &str,
        include_controller: bool,
    ) -> OrchestratorResult<Value> {
        let databag = self.publish_formation(formation_id).await?;

        let layers = self.store.list_layers(formation_id)?;
        let mut batch = Vec::new();
        for node in self.store.list_nodes(formation_id)? {
            let layer = layers
                .iter()
                .find(|l| l.id == node.layer)
                .ok_or_else(|| OrchestratorError::NotFound(format!("layer {}", node.layer)))?;
            let spec = node_spec(&self.layer_spec(layer)?, &node);
            batch.push(tasks::converge_node(
                self.store.clone(),
                self.cm.clone(),
                node,
                spec,
            ));
        }
        if include_controller {
            batch.push(tasks::converge_controller(self.cm.clone()));
        }

        let count = batch.len();
        self.executor
            .run_batch(batch)
            .await
            .map_err(OrchestratorError::Converge)?;
        info!(formation = %formation_id, tasks = count, "formation converged");
        Ok(databag)
    }

    /// Tear down a formation: apps first, then all nodes, then all layers,
    /// then the CM data and the record itself, and finally converge the
    /// controller.
    pub async fn destroy_formation(&self, formation_id: &str) -> OrchestratorResult<()> {
        let _guard = self.locks.acquire(formation_id).await;
        let formation = self.formation(formation_id)?;

        for app in self.store.list_apps(formation_id)? {
            self.destroy_app_records(&app).await?;
        }

        let mut node_tasks = Vec::new();
        for node in self.store.list_nodes(formation_id)? {
            let spec = self.node_spec_for(&node)?;
            let provider = self.drivers.provider(&spec.provider_type)?;
            node_tasks.push(tasks::destroy_node(
                self.store.clone(),
                provider,
                self.cm.clone(),
                node,
                spec,
            ));
        }
        self.executor
            .run_batch(node_tasks)
            .await
            .map_err(OrchestratorError::Provision)?;

        let mut layer_tasks = Vec::new();
        for layer in self.store.list_layers(formation_id)? {
            let spec = self.layer_spec(&layer)?;
            let provider = self.provider_for(&spec)?;
            layer_tasks.push(tasks::destroy_layer(self.store.clone(), provider, spec));
        }
        self.executor
            .run_batch(layer_tasks)
            .await
            .map_err(OrchestratorError::Provision)?;

        let cm = self.cm.clone();
        let spec = formation_spec(&formation);
        self.executor
            .run_single(Task::new(formation_id, move || {
                cm.purge_formation(&spec)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        self.store.delete_formation(formation_id)?;

        self.executor
            .run_single(tasks::converge_controller(self.cm.clone()))
            .await
            .map_err(OrchestratorError::converge)?;
        info!(formation = %formation_id, "formation destroyed");
        Ok(())
    }
}
