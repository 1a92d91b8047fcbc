//! Directory-backed CM driver.
//!
//! Databags are written as pretty JSON files under a root directory,
//! where an external CM tool (chef-solo, ansible-pull, a sync job) picks
//! them up:
//!
//! ```text
//! {root}/formations/{id}.json
//! {root}/apps/{id}.json
//! {root}/users/{username}.json
//! {root}/nodes/{id}.json
//! ```
//!
//! Converge and run operations shell out to operator-supplied command
//! templates. Placeholders `{node}`, `{fqdn}`, `{ssh_username}`,
//! `{ssh_port}` and (for runs) `{command}` are substituted first.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cm::{CommandOutput, ConfigManager};
use crate::error::{DriverError, DriverResult};
use crate::spec::{AppSpec, FormationSpec, NodeSpec, UserSpec};

/// Settings for [`DirectoryConfigManager`].
#[derive(Debug, Clone, Default)]
pub struct DirectorySettings {
    pub databag_dir: PathBuf,
    pub converge_command: Option<String>,
    pub run_command: Option<String>,
    pub controller_command: Option<String>,
}

/// Node facts written on bootstrap. The private key stays out.
#[derive(Serialize)]
struct NodeFacts<'a> {
    id: &'a str,
    formation: &'a str,
    layer: &'a str,
    fqdn: Option<&'a str>,
    runtime: bool,
    proxy: bool,
    ssh_username: &'a str,
    ssh_port: u16,
    config: &'a std::collections::BTreeMap<String, Value>,
}

pub struct DirectoryConfigManager {
    settings: DirectorySettings,
}

impl DirectoryConfigManager {
    /// Create the manager and its directory layout.
    pub fn new(settings: DirectorySettings) -> DriverResult<Self> {
        for sub in ["formations", "apps", "users", "nodes"] {
            fs::create_dir_all(settings.databag_dir.join(sub))?;
        }
        info!(dir = %settings.databag_dir.display(), "directory CM ready");
        Ok(Self { settings })
    }

    fn path(&self, kind: &str, id: &str) -> PathBuf {
        self.settings.databag_dir.join(kind).join(format!("{id}.json"))
    }

    fn write(&self, kind: &str, id: &str, value: &impl Serialize) -> DriverResult<()> {
        let path = self.path(kind, id);
        let body = serde_json::to_vec_pretty(value)?;
        // Each write gets its own temp file; the rename is atomic.
        let mut tmp = tempfile::NamedTempFile::new_in(self.settings.databag_dir.join(kind))?;
        tmp.write_all(&body)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), "databag written");
        Ok(())
    }

    fn remove(&self, kind: &str, id: &str) -> DriverResult<()> {
        remove_if_exists(&self.path(kind, id))
    }

    fn run_template(
        &self,
        template: Option<&str>,
        node: Option<&NodeSpec>,
        command: Option<&str>,
    ) -> DriverResult<CommandOutput> {
        let Some(template) = template else {
            return Ok(CommandOutput::success("no command configured"));
        };
        let rendered = render(template, node, command);
        debug!(command = %rendered, "running CM command");
        let out = Command::new("sh").arg("-c").arg(&rendered).output()?;
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        let exit_code = out.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(command = %rendered, exit_code, "CM command failed");
        }
        Ok(CommandOutput { output, exit_code })
    }
}

impl ConfigManager for DirectoryConfigManager {
    fn bootstrap_node(&self, node: &NodeSpec) -> DriverResult<()> {
        let facts = NodeFacts {
            id: &node.id,
            formation: &node.formation,
            layer: &node.layer,
            fqdn: node.fqdn.as_deref(),
            runtime: node.runtime,
            proxy: node.proxy,
            ssh_username: &node.ssh_username,
            ssh_port: node.ssh_port,
            config: &node.config,
        };
        self.write("nodes", &node.id, &facts)
    }

    fn converge_node(&self, node: &NodeSpec) -> DriverResult<CommandOutput> {
        self.run_template(self.settings.converge_command.as_deref(), Some(node), None)
    }

    fn converge_controller(&self) -> DriverResult<()> {
        let out = self.run_template(self.settings.controller_command.as_deref(), None, None)?;
        if !out.is_success() {
            return Err(DriverError::ConfigManagement(format!(
                "controller converge exited {}: {}",
                out.exit_code,
                out.output.trim()
            )));
        }
        Ok(())
    }

    fn run_node(&self, node: &NodeSpec, command: &str) -> DriverResult<CommandOutput> {
        if self.settings.run_command.is_none() {
            return Err(DriverError::ConfigManagement(
                "no run command configured".to_string(),
            ));
        }
        self.run_template(self.settings.run_command.as_deref(), Some(node), Some(command))
    }

    fn purge_node(&self, node: &NodeSpec) -> DriverResult<()> {
        self.remove("nodes", &node.id)
    }

    fn purge_app(&self, app: &AppSpec) -> DriverResult<()> {
        self.remove("apps", &app.id)
    }

    fn purge_formation(&self, formation: &FormationSpec) -> DriverResult<()> {
        self.remove("formations", &formation.id)
    }

    fn purge_user(&self, user: &UserSpec) -> DriverResult<()> {
        self.remove("users", &user.username)
    }

    fn publish_app(&self, app: &AppSpec, databag: &Value) -> DriverResult<()> {
        self.write("apps", &app.id, databag)
    }

    fn publish_formation(&self, formation: &FormationSpec, databag: &Value) -> DriverResult<()> {
        self.write("formations", &formation.id, databag)
    }

    fn publish_user(&self, user: &UserSpec, databag: &Value) -> DriverResult<()> {
        self.write("users", &user.username, databag)
    }
}

fn remove_if_exists(path: &Path) -> DriverResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn render(template: &str, node: Option<&NodeSpec>, command: Option<&str>) -> String {
    let mut out = template.to_string();
    if let Some(node) = node {
        out = out
            .replace("{node}", &node.id)
            .replace("{fqdn}", node.fqdn.as_deref().unwrap_or(""))
            .replace("{ssh_username}", &node.ssh_username)
            .replace("{ssh_port}", &node.ssh_port.to_string());
    }
    if let Some(command) = command {
        out = out.replace("{command}", command);
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::tests::node_spec;

    fn manager(dir: &Path, converge: Option<&str>) -> DirectoryConfigManager {
        DirectoryConfigManager::new(DirectorySettings {
            databag_dir: dir.to_path_buf(),
            converge_command: converge.map(str::to_string),
            run_command: Some("echo {node}: {command}".to_string()),
            controller_command: None,
        })
        .unwrap()
    }

    #[test]
    fn publish_writes_json_and_purge_removes() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), None);
        let app = AppSpec {
            id: "app1".to_string(),
            formation: "f1".to_string(),
            owner: "alice".to_string(),
        };

        cm.publish_app(&app, &json!({"id": "app1"})).unwrap();
        let path = dir.path().join("apps/app1.json");
        let written: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"id": "app1"}));

        cm.purge_app(&app).unwrap();
        assert!(!path.exists());
        // Purging twice is fine.
        cm.purge_app(&app).unwrap();
    }

    #[test]
    fn concurrent_publishes_of_one_formation_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), None);
        let formation = FormationSpec {
            id: "f1".to_string(),
            domain: None,
        };

        std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|worker| {
                    let cm = &cm;
                    let formation = &formation;
                    s.spawn(move || {
                        (0..100)
                            .filter(|i| {
                                let bag = json!({"worker": worker, "write": i});
                                cm.publish_formation(formation, &bag).is_err()
                            })
                            .count()
                    })
                })
                .collect();
            let errors: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
            assert_eq!(errors, 0);
        });

        let written: Value =
            serde_json::from_slice(&fs::read(dir.path().join("formations/f1.json")).unwrap()).unwrap();
        assert!(written.get("worker").is_some());
        let leftovers = fs::read_dir(dir.path().join("formations")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn bootstrap_omits_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), None);
        let mut node = node_spec("f1-l1-1", Some("n1.example.com"));
        node.ssh_private_key = "SECRET".to_string();

        cm.bootstrap_node(&node).unwrap();
        let body = fs::read_to_string(dir.path().join("nodes/f1-l1-1.json")).unwrap();
        assert!(body.contains("n1.example.com"));
        assert!(!body.contains("SECRET"));
    }

    #[test]
    fn converge_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), Some("echo converging {node}; exit 3"));
        let out = cm.converge_node(&node_spec("f1-l1-1", None)).unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("converging f1-l1-1"));
    }

    #[test]
    fn run_substitutes_command() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), None);
        let out = cm.run_node(&node_spec("f1-l1-1", None), "ls").unwrap();
        assert!(out.is_success());
        assert_eq!(out.output.trim(), "f1-l1-1: ls");
    }

    #[test]
    fn missing_converge_command_is_a_noop_success() {
        let dir = tempfile::tempdir().unwrap();
        let cm = manager(dir.path(), None);
        assert!(cm.converge_node(&node_spec("n", None)).unwrap().is_success());
        assert!(cm.converge_controller().is_ok());
    }
}
