//! Layer lifecycle and layer scaling.

use std::collections::BTreeMap;

use flotilla_drivers::generate_ssh_keypair;
use flotilla_state::Layer;
use serde_json::Value;
use tracing::{debug, info};

use crate::controller::{Controller, validate_slug};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::specs::node_spec;
use crate::tasks;

const DEFAULT_SSH_USERNAME: &str = "ubuntu";
const DEFAULT_SSH_PORT: u16 = 22;

/// Parameters for a new layer.
#[derive(Debug, Clone, Default)]
pub struct LayerRequest {
    pub id: String,
    pub owner: String,
    /// Flavor id, scoped to `owner`.
    pub flavor: String,
    pub proxy: bool,
    pub runtime: bool,
    pub ssh_username: Option<String>,
    pub ssh_port: Option<u16>,
    /// Supply both keys or neither; a keypair is generated when absent.
    pub ssh_private_key: Option<String>,
    pub ssh_public_key: Option<String>,
    pub config: BTreeMap<String, Value>,
}

impl Controller {
    /// Validate and persist a layer. Does not touch the provider; see
    /// [`Controller::build_layer`].
    pub async fn create_layer(
        &self,
        formation_id: &str,
        req: LayerRequest,
    ) -> OrchestratorResult<Layer> {
        validate_slug("layer", &req.id)?;
        self.formation(formation_id)?;
        if self.store.get_flavor(&req.owner, &req.flavor)?.is_none() {
            return Err(OrchestratorError::NotFound(format!("flavor {}", req.flavor)));
        }

        let (ssh_private_key, ssh_public_key) = match (req.ssh_private_key, req.ssh_public_key) {
            (Some(private), Some(public)) => (private, public),
            (None, None) => {
                let pair = generate_ssh_keypair(&format!("{formation_id}-{}", req.id))?;
                debug!(layer = %req.id, "generated layer ssh keypair");
                (pair.private_key, pair.public_key)
            }
            _ => {
                return Err(OrchestratorError::InvalidInput(
                    "ssh_private_key and ssh_public_key must be given together".to_string(),
                ));
            }
        };

        let layer = self.store.insert_layer(Layer {
            id: req.id,
            formation: formation_id.to_string(),
            owner: req.owner,
            flavor: req.flavor,
            proxy: req.proxy,
            runtime: req.runtime,
            ssh_username: req
                .ssh_username
                .unwrap_or_else(|| DEFAULT_SSH_USERNAME.to_string()),
            ssh_private_key,
            ssh_public_key,
            ssh_port: req.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            config: req.config,
            created: 0,
        })?;
        info!(
            formation = %formation_id,
            layer = %layer.id,
            runtime = layer.runtime,
            proxy = layer.proxy,
            "layer created"
        );
        Ok(layer)
    }

    /// Build a layer at its provider.
    pub async fn build_layer(&self, formation_id: &str, layer_id: &str) -> OrchestratorResult<()> {
        let layer = self.layer(formation_id, layer_id)?;
        let spec = self.layer_spec(&layer)?;
        let provider = self.provider_for(&spec)?;
        self.executor
            .run_single(tasks::build_layer(provider, spec))
            .await
            .map_err(OrchestratorError::provision)
    }

    /// Tear a layer down at its provider and delete it. Refused while any
    /// node still belongs to the layer.
    pub async fn destroy_layer(&self, formation_id: &str, layer_id: &str) -> OrchestratorResult<()> {
        let layer = self.layer(formation_id, layer_id)?;
        let nodes = self.store.list_nodes(formation_id)?;
        let remaining = nodes.iter().filter(|n| n.layer == layer_id).count();
        if remaining > 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "layer {layer_id} still has {remaining} node(s)"
            )));
        }
        let spec = self.layer_spec(&layer)?;
        let provider = self.provider_for(&spec)?;
        self.executor
            .run_single(tasks::destroy_layer(self.store.clone(), provider, spec))
            .await
            .map_err(OrchestratorError::provision)
    }

    /// Bring each named layer to its desired node count.
    ///
    /// Oldest nodes are removed first. All builds and destroys run as one
    /// batch; if any fails the operation fails and the stored layer counts
    /// are left alone. Afterwards every app is re-scaled to its stored
    /// counts and the formation rebalanced. Returns the formation databag,
    /// converging first when anything changed.
    pub async fn scale_layers(
        &self,
        formation_id: &str,
        desired: &BTreeMap<String, i64>,
    ) -> OrchestratorResult<Value> {
        let _guard = self.locks.acquire(formation_id).await;
        let mut formation = self.formation(formation_id)?;

        let mut targets = BTreeMap::new();
        for (layer_id, &count) in desired {
            let count = u32::try_from(count).map_err(|_| {
                OrchestratorError::InvalidInput(format!(
                    "invalid node count {count} for layer {layer_id}"
                ))
            })?;
            let layer = self.layer(formation_id, layer_id)?;
            targets.insert(layer_id.clone(), (layer, count));
        }

        // Resolve every layer's spec, provider and node diff before any
        // node record is created, so a bad layer leaves the store untouched.
        let mut plans = Vec::with_capacity(targets.len());
        for (layer, want) in targets.values() {
            let spec = self.layer_spec(layer)?;
            let provider = self.provider_for(&spec)?;
            let mut nodes: Vec<_> = self
                .store
                .list_nodes(formation_id)?
                .into_iter()
                .filter(|n| n.layer == layer.id)
                .collect();
            let want = *want as usize;
            let surplus = nodes.len().saturating_sub(want);
            let doomed: Vec<_> = nodes.drain(..surplus).collect();
            let missing = want.saturating_sub(nodes.len());
            plans.push((layer, spec, provider, doomed, missing));
        }

        let mut batch_destroy = Vec::new();
        let mut batch_build = Vec::new();
        for (layer, spec, provider, doomed, missing) in plans {
            for node in doomed {
                let target = node_spec(&spec, &node);
                batch_destroy.push(tasks::destroy_node(
                    self.store.clone(),
                    provider.clone(),
                    self.cm.clone(),
                    node,
                    target,
                ));
            }
            for _ in 0..missing {
                let node = self
                    .store
                    .create_node(formation_id, &layer.id, &formation.owner, None)?;
                let target = node_spec(&spec, &node);
                batch_build.push(tasks::build_node(
                    self.store.clone(),
                    provider.clone(),
                    self.cm.clone(),
                    node,
                    target,
                ));
            }
        }

        let changed = !batch_destroy.is_empty() || !batch_build.is_empty();
        if changed {
            info!(
                formation = %formation_id,
                building = batch_build.len(),
                destroying = batch_destroy.len(),
                "scaling layers"
            );
            let (destroyed, built) = tokio::join!(
                self.executor.run_batch(batch_destroy),
                self.executor.run_batch(batch_build)
            );
            let mut failures = Vec::new();
            if let Err(e) = destroyed {
                failures.extend(e.failures);
            }
            if let Err(e) = built {
                failures.extend(e.failures);
            }
            if !failures.is_empty() {
                return Err(OrchestratorError::Provision(flotilla_tasks::BatchError {
                    failures,
                }));
            }
        }

        let has_runtime = {
            let layers = self.store.list_layers(formation_id)?;
            self.store
                .list_nodes(formation_id)?
                .iter()
                .any(|n| layers.iter().any(|l| l.id == n.layer && l.runtime))
        };
        let mut rebalanced = false;
        if has_runtime {
            for app in self.store.list_apps(formation_id)? {
                let counts = app
                    .containers
                    .iter()
                    .map(|(k, v)| (k.clone(), i64::from(*v)))
                    .collect();
                rebalanced |= self.scale_app_locked(&app.id, &counts)?;
            }
            rebalanced |= self.balance_locked(formation_id)?;
        }

        formation = self.formation(formation_id)?;
        formation
            .nodes
            .extend(targets.iter().map(|(id, (_, n))| (id.clone(), *n)));
        self.store.update_formation(&formation)?;

        if changed || rebalanced {
            self.converge_formation(formation_id, false).await
        } else {
            self.calculate_formation(formation_id)
        }
    }
}
