//! Configuration management drivers.
//!
//! The CM backend owns the nodes' software configuration. The control
//! plane publishes databags describing desired state and asks the
//! backend to converge nodes toward them.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::spec::{AppSpec, FormationSpec, NodeSpec, UserSpec};

/// Captured output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Configuration management backend.
///
/// Publishing is idempotent: the latest databag for a key replaces the
/// previous one. Calls are blocking.
pub trait ConfigManager: Send + Sync {
    fn bootstrap_node(&self, node: &NodeSpec) -> DriverResult<()>;

    fn converge_node(&self, node: &NodeSpec) -> DriverResult<CommandOutput>;

    fn converge_controller(&self) -> DriverResult<()>;

    fn run_node(&self, node: &NodeSpec, command: &str) -> DriverResult<CommandOutput>;

    fn purge_node(&self, node: &NodeSpec) -> DriverResult<()>;

    fn purge_app(&self, app: &AppSpec) -> DriverResult<()>;

    fn purge_formation(&self, formation: &FormationSpec) -> DriverResult<()>;

    fn purge_user(&self, user: &UserSpec) -> DriverResult<()>;

    fn publish_app(&self, app: &AppSpec, databag: &Value) -> DriverResult<()>;

    fn publish_formation(&self, formation: &FormationSpec, databag: &Value) -> DriverResult<()>;

    fn publish_user(&self, user: &UserSpec, databag: &Value) -> DriverResult<()>;
}

// ── Mock ──────────────────────────────────────────────────────────

/// One recorded CM interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmCall {
    Bootstrap(String),
    Converge(String),
    ConvergeController,
    Run { node: String, command: String },
    PurgeNode(String),
    PurgeApp(String),
    PurgeFormation(String),
    PurgeUser(String),
    PublishApp(String),
    PublishFormation(String),
    PublishUser(String),
}

/// In-memory CM backend. Keeps the latest databag per key, records every
/// call in order, and can be scripted to fail converges or runs.
#[derive(Debug, Default)]
pub struct MockConfigManager {
    calls: Mutex<Vec<CmCall>>,
    databags: Mutex<HashMap<String, Value>>,
    failing_converges: Mutex<BTreeMap<String, String>>,
    failing_bootstraps: Mutex<BTreeMap<String, String>>,
    run_output: Mutex<Option<CommandOutput>>,
}

impl MockConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converging this node exits non-zero with `output`.
    pub fn fail_converge(&self, node_id: impl Into<String>, output: impl Into<String>) {
        self.failing_converges
            .lock()
            .insert(node_id.into(), output.into());
    }

    /// Bootstrapping this node returns an error.
    pub fn fail_bootstrap(&self, node_id: impl Into<String>, reason: impl Into<String>) {
        self.failing_bootstraps
            .lock()
            .insert(node_id.into(), reason.into());
    }

    /// Output returned by every subsequent `run_node`.
    pub fn set_run_output(&self, output: impl Into<String>, exit_code: i32) {
        *self.run_output.lock() = Some(CommandOutput {
            output: output.into(),
            exit_code,
        });
    }

    pub fn calls(&self) -> Vec<CmCall> {
        self.calls.lock().clone()
    }

    pub fn formation_databag(&self, id: &str) -> Option<Value> {
        self.databags.lock().get(&format!("formation/{id}")).cloned()
    }

    pub fn app_databag(&self, id: &str) -> Option<Value> {
        self.databags.lock().get(&format!("app/{id}")).cloned()
    }

    pub fn user_databag(&self, username: &str) -> Option<Value> {
        self.databags.lock().get(&format!("user/{username}")).cloned()
    }

    /// Node ids converged so far, in call order.
    pub fn converged_nodes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CmCall::Converge(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: CmCall) {
        self.calls.lock().push(call);
    }
}

impl ConfigManager for MockConfigManager {
    fn bootstrap_node(&self, node: &NodeSpec) -> DriverResult<()> {
        self.record(CmCall::Bootstrap(node.id.clone()));
        if let Some(reason) = self.failing_bootstraps.lock().get(&node.id) {
            return Err(DriverError::ConfigManagement(reason.clone()));
        }
        Ok(())
    }

    fn converge_node(&self, node: &NodeSpec) -> DriverResult<CommandOutput> {
        self.record(CmCall::Converge(node.id.clone()));
        if let Some(output) = self.failing_converges.lock().get(&node.id) {
            return Ok(CommandOutput {
                output: output.clone(),
                exit_code: 1,
            });
        }
        Ok(CommandOutput::success(format!("{} converged", node.id)))
    }

    fn converge_controller(&self) -> DriverResult<()> {
        self.record(CmCall::ConvergeController);
        Ok(())
    }

    fn run_node(&self, node: &NodeSpec, command: &str) -> DriverResult<CommandOutput> {
        self.record(CmCall::Run {
            node: node.id.clone(),
            command: command.to_string(),
        });
        Ok(self
            .run_output
            .lock()
            .clone()
            .unwrap_or_else(|| CommandOutput::success("")))
    }

    fn purge_node(&self, node: &NodeSpec) -> DriverResult<()> {
        self.record(CmCall::PurgeNode(node.id.clone()));
        Ok(())
    }

    fn purge_app(&self, app: &AppSpec) -> DriverResult<()> {
        self.record(CmCall::PurgeApp(app.id.clone()));
        self.databags.lock().remove(&format!("app/{}", app.id));
        Ok(())
    }

    fn purge_formation(&self, formation: &FormationSpec) -> DriverResult<()> {
        self.record(CmCall::PurgeFormation(formation.id.clone()));
        self.databags
            .lock()
            .remove(&format!("formation/{}", formation.id));
        Ok(())
    }

    fn purge_user(&self, user: &UserSpec) -> DriverResult<()> {
        self.record(CmCall::PurgeUser(user.username.clone()));
        self.databags
            .lock()
            .remove(&format!("user/{}", user.username));
        Ok(())
    }

    fn publish_app(&self, app: &AppSpec, databag: &Value) -> DriverResult<()> {
        self.record(CmCall::PublishApp(app.id.clone()));
        self.databags
            .lock()
            .insert(format!("app/{}", app.id), databag.clone());
        debug!(app = %app.id, "mock app databag published");
        Ok(())
    }

    fn publish_formation(&self, formation: &FormationSpec, databag: &Value) -> DriverResult<()> {
        self.record(CmCall::PublishFormation(formation.id.clone()));
        self.databags
            .lock()
            .insert(format!("formation/{}", formation.id), databag.clone());
        debug!(formation = %formation.id, "mock formation databag published");
        Ok(())
    }

    fn publish_user(&self, user: &UserSpec, databag: &Value) -> DriverResult<()> {
        self.record(CmCall::PublishUser(user.username.clone()));
        self.databags
            .lock()
            .insert(format!("user/{}", user.username), databag.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::tests::node_spec;

    #[test]
    fn publish_replaces_and_purge_removes() {
        let cm = MockConfigManager::new();
        let spec = FormationSpec {
            id: "f1".to_string(),
            domain: None,
        };
        cm.publish_formation(&spec, &json!({"v": 1})).unwrap();
        cm.publish_formation(&spec, &json!({"v": 2})).unwrap();
        assert_eq!(cm.formation_databag("f1"), Some(json!({"v": 2})));

        cm.purge_formation(&spec).unwrap();
        assert!(cm.formation_databag("f1").is_none());
        assert_eq!(cm.calls().len(), 3);
    }

    #[test]
    fn scripted_converge_failure_exits_non_zero() {
        let cm = MockConfigManager::new();
        cm.fail_converge("f1-l1-2", "recipe exploded");

        assert!(cm.converge_node(&node_spec("f1-l1-1", None)).unwrap().is_success());
        let out = cm.converge_node(&node_spec("f1-l1-2", None)).unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.output, "recipe exploded");
        assert_eq!(cm.converged_nodes(), vec!["f1-l1-1", "f1-l1-2"]);
    }
}
