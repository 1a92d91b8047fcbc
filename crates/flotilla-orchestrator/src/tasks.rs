//! Task bodies for provider and CM work.
//!
//! Each constructor captures owned handles and a pre-resolved spec so
//! the closure can run on the blocking pool. Node status changes are
//! written from inside the task, re-reading the node first so concurrent
//! tasks on sibling nodes never clobber each other.

use std::sync::Arc;

use anyhow::{Context, bail};
use flotilla_drivers::{CommandOutput, ConfigManager, LayerSpec, NodeSpec, ProviderDriver};
use flotilla_state::{Node, NodeStatus, StateStore};
use flotilla_tasks::Task;
use tracing::{debug, info, warn};

/// Printed ahead of run output when the app has never been deployed.
const RUN_HINT: &str = "\x1b[35mPlease push a build first.\x1b[0m\n";

fn reload(store: &StateStore, node: &Node) -> anyhow::Result<Node> {
    store
        .get_node(&node.formation, &node.id)?
        .with_context(|| format!("node {} disappeared", node.id))
}

fn set_status(store: &StateStore, node: &Node, status: NodeStatus) -> anyhow::Result<Node> {
    let mut current = reload(store, node)?;
    current.status = status;
    store.update_node(&current)?;
    Ok(current)
}

/// Provision a node, record what the provider reports, then bootstrap it.
pub(crate) fn build_node(
    store: StateStore,
    provider: Arc<dyn ProviderDriver>,
    cm: Arc<dyn ConfigManager>,
    node: Node,
    spec: NodeSpec,
) -> Task<Node> {
    Task::new(node.id.clone(), move || {
        set_status(&store, &node, NodeStatus::Provisioning)?;

        let built = match provider.build_node(&spec) {
            Ok(built) => built,
            Err(e) => {
                set_status(&store, &node, NodeStatus::Failed)?;
                return Err(e.into());
            }
        };
        let mut current = reload(&store, &node)?;
        current.provider_id = Some(built.provider_id.clone());
        current.fqdn = Some(built.fqdn.clone());
        current.metadata = built.metadata;
        store.update_node(&current)?;

        let spec = NodeSpec {
            provider_id: Some(built.provider_id),
            fqdn: Some(built.fqdn),
            ..spec
        };
        if let Err(e) = cm.bootstrap_node(&spec) {
            set_status(&store, &node, NodeStatus::Failed)?;
            bail!("bootstrap failed: {e}");
        }

        let node = set_status(&store, &node, NodeStatus::Active)?;
        info!(node = %node.id, fqdn = ?node.fqdn, "node built");
        Ok(node)
    })
}

/// Tear a node down at the provider, purge it from CM, delete the record
/// (and with it, its containers).
pub(crate) fn destroy_node(
    store: StateStore,
    provider: Arc<dyn ProviderDriver>,
    cm: Arc<dyn ConfigManager>,
    node: Node,
    spec: NodeSpec,
) -> Task<()> {
    Task::new(node.id.clone(), move || {
        set_status(&store, &node, NodeStatus::Destroying)?;
        provider.destroy_node(&spec)?;
        cm.purge_node(&spec)?;
        store.delete_node(&node.formation, &node.id)?;
        info!(node = %node.id, "node destroyed");
        Ok(())
    })
}

pub(crate) fn build_layer(provider: Arc<dyn ProviderDriver>, spec: LayerSpec) -> Task<()> {
    Task::new(spec.id.clone(), move || {
        provider.build_layer(&spec)?;
        info!(layer = %spec.id, formation = %spec.formation, "layer built");
        Ok(())
    })
}

/// Tear a layer down at the provider, then delete its record.
pub(crate) fn destroy_layer(
    store: StateStore,
    provider: Arc<dyn ProviderDriver>,
    spec: LayerSpec,
) -> Task<()> {
    Task::new(spec.id.clone(), move || {
        provider.destroy_layer(&spec)?;
        store.delete_layer(&spec.formation, &spec.id)?;
        info!(layer = %spec.id, formation = %spec.formation, "layer destroyed");
        Ok(())
    })
}

/// Converge one node. A non-zero exit is a failure; either way the node
/// returns to the status it had before.
pub(crate) fn converge_node(
    store: StateStore,
    cm: Arc<dyn ConfigManager>,
    node: Node,
    spec: NodeSpec,
) -> Task<CommandOutput> {
    Task::new(node.id.clone(), move || {
        let previous = node.status;
        set_status(&store, &node, NodeStatus::Converging)?;
        let result = cm.converge_node(&spec);
        set_status(&store, &node, previous)?;

        let out = result?;
        if !out.is_success() {
            warn!(node = %node.id, exit_code = out.exit_code, "node converge failed");
            bail!("exit {}: {}", out.exit_code, out.output.trim());
        }
        debug!(node = %node.id, "node converged");
        Ok(out)
    })
}

/// Run a shell command on a node through CM.
pub(crate) fn run_node(
    cm: Arc<dyn ConfigManager>,
    spec: NodeSpec,
    command: String,
) -> Task<CommandOutput> {
    Task::new(spec.id.clone(), move || {
        let mut out = cm.run_node(&spec, &command)?;
        if !out.is_success() && out.output.contains("failed to setup the container") {
            out.output.insert_str(0, RUN_HINT);
        }
        Ok(out)
    })
}

pub(crate) fn converge_controller(cm: Arc<dyn ConfigManager>) -> Task<CommandOutput> {
    Task::new("controller", move || {
        cm.converge_controller()?;
        debug!("controller converged");
        Ok(CommandOutput::success("controller converged"))
    })
}
