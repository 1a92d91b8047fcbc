//! App lifecycle: create, push, config, run, publish, destroy.

use std::collections::{BTreeMap, BTreeSet};

use flotilla_drivers::CommandOutput;
use flotilla_state::{App, Build, DEFAULT_BUILD_IMAGE, NodeStatus, Release};
use flotilla_tasks::Task;
use serde_json::Value;
use tracing::info;

use crate::controller::{Controller, validate_slug};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::log_event;
use crate::release::{ConfigChange, summarize};
use crate::specs::{app_spec, service_spec};
use crate::tasks;

/// Host directory holding extracted slugs, one per app release.
const SLUG_DIR: &str = "/opt/flotilla/runtime/slugs";

/// Image used for one-off `run` containers.
const SLUGRUNNER_IMAGE: &str = "flotilla/slugrunner";

/// A build pushed by the git receiver.
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub app: String,
    pub username: String,
    pub sha: String,
    pub output: String,
    pub image: String,
    pub procfile: BTreeMap<String, String>,
    pub dockerfile: String,
    pub config: BTreeMap<String, String>,
    pub url: Option<String>,
    pub size: Option<u64>,
    pub checksum: String,
}

impl Controller {
    /// Create an app with an empty config, an empty build and release v1,
    /// then publish its formation.
    pub async fn create_app(
        &self,
        id: &str,
        owner: &str,
        formation_id: &str,
    ) -> OrchestratorResult<App> {
        validate_slug("app", id)?;
        let app = self.store.insert_app(App {
            id: id.to_string(),
            owner: owner.to_string(),
            formation: formation_id.to_string(),
            containers: BTreeMap::new(),
            created: 0,
        })?;

        let config = self.insert_next_config(id, owner, BTreeMap::new())?;
        let build = self.store.insert_build(Build::initial(id, owner))?;
        let summary = summarize(
            owner,
            1,
            None,
            Some(ConfigChange {
                owner,
                new: &config.values,
                old: None,
            }),
        );
        self.store.insert_release(Release {
            app: id.to_string(),
            owner: owner.to_string(),
            version: 1,
            summary,
            config_version: config.version,
            build: Some(build.created),
            created: 0,
        })?;

        info!(app = %id, formation = %formation_id, %owner, "app created");
        self.publish_formation(formation_id).await?;
        Ok(app)
    }

    /// Destroy an app's services, purge it from CM and delete its records,
    /// then republish the formation.
    pub async fn destroy_app(&self, app_id: &str) -> OrchestratorResult<()> {
        let app = self.app(app_id)?;
        let _guard = self.locks.acquire(&app.formation).await;
        self.destroy_app_records(&app).await?;
        self.publish_formation(&app.formation).await?;
        Ok(())
    }

    /// Teardown shared by app and formation destruction. The caller holds
    /// the formation lock.
    pub(crate) async fn destroy_app_records(&self, app: &App) -> OrchestratorResult<()> {
        for service in self.store.list_services(&app.id)? {
            let driver = self.drivers.service(&service.kind)?;
            let spec = service_spec(&service);
            self.executor
                .run_single(Task::new(service.name.clone(), move || {
                    driver.destroy_service(&spec)?;
                    Ok(())
                }))
                .await
                .map_err(OrchestratorError::driver)?;
        }

        let cm = self.cm.clone();
        let spec = app_spec(app);
        self.executor
            .run_single(Task::new(app.id.clone(), move || {
                cm.purge_app(&spec)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;

        self.store.delete_app(&app.id)?;
        info!(app = %app.id, formation = %app.formation, "app destroyed");
        Ok(())
    }

    /// Recompute the app databag and hand it to CM.
    pub async fn publish_app(&self, app_id: &str) -> OrchestratorResult<Value> {
        let app = self.app(app_id)?;
        let databag = self.calculate_app(app_id)?;
        let cm = self.cm.clone();
        let spec = app_spec(&app);
        let bag = databag.clone();
        self.executor
            .run_single(Task::new(app_id, move || {
                cm.publish_app(&spec, &bag)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        Ok(databag)
    }

    /// Publish the app, then converge its formation. Returns the app
    /// databag.
    pub async fn converge_app(&self, app_id: &str) -> OrchestratorResult<Value> {
        let app = self.app(app_id)?;
        let databag = self.publish_app(app_id).await?;
        self.converge_formation(&app.formation, false).await?;
        Ok(databag)
    }

    /// Record a pushed build, release it, place an initial web container
    /// when there is somewhere to put one, and converge.
    pub async fn push(&self, push: PushRequest) -> OrchestratorResult<Value> {
        let app = self.app(&push.app)?;
        let build = self.store.insert_build(Build {
            app: app.id.clone(),
            owner: push.username.clone(),
            sha: push.sha,
            output: push.output,
            image: if push.image.is_empty() {
                DEFAULT_BUILD_IMAGE.to_string()
            } else {
                push.image
            },
            procfile: push.procfile,
            dockerfile: push.dockerfile,
            config: push.config,
            url: push.url,
            size: push.size,
            checksum: push.checksum,
            created: 0,
        })?;
        self.new_release(&app.id, &push.username, None, Some(build))?;

        let has_runtime = {
            let layers = self.store.list_layers(&app.formation)?;
            self.store
                .list_nodes(&app.formation)?
                .iter()
                .any(|n| layers.iter().any(|l| l.id == n.layer && l.runtime))
        };
        let has_web = self
            .store
            .list_containers_for_app(&app.id)?
            .iter()
            .any(|c| c.kind == "web");
        if has_runtime && !has_web {
            let initial = BTreeMap::from([("web".to_string(), 1)]);
            let _guard = self.locks.acquire(&app.formation).await;
            self.scale_app_locked(&app.id, &initial)?;
        }

        self.converge_app(&app.id).await
    }

    /// Apply config changes as a new config version and release. A `None`
    /// value unsets the key.
    pub async fn set_config(
        &self,
        app_id: &str,
        user: &str,
        changes: &BTreeMap<String, Option<String>>,
    ) -> OrchestratorResult<Release> {
        let app = self.app(app_id)?;
        let mut values = self
            .store
            .latest_config(app_id)?
            .map(|c| c.values)
            .unwrap_or_default();
        for (key, value) in changes {
            match value {
                Some(v) => {
                    values.insert(key.clone(), v.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        let config = self.insert_next_config(app_id, user, values)?;
        let release = self.new_release(app_id, user, Some(config), None)?;

        self.publish_app(app_id).await?;
        self.publish_formation(&app.formation).await?;
        Ok(release)
    }

    /// Run a one-off command in an ephemeral container on the first active
    /// runtime node, with the current release's config as environment.
    pub async fn run_app(&self, app_id: &str, command: &str) -> OrchestratorResult<CommandOutput> {
        let app = self.app(app_id)?;
        let runtime_layers: BTreeSet<String> = self
            .store
            .list_layers(&app.formation)?
            .into_iter()
            .filter(|l| l.runtime)
            .map(|l| l.id)
            .collect();
        let node = self
            .store
            .list_nodes(&app.formation)?
            .into_iter()
            .find(|n| runtime_layers.contains(&n.layer) && n.status == NodeStatus::Active)
            .ok_or_else(|| {
                OrchestratorError::NoCapacity(format!("no nodes available to run command for {app_id}"))
            })?;

        let release = self
            .store
            .latest_release(app_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("release for app {app_id}")))?;
        let config = self
            .store
            .get_config(app_id, release.config_version)?
            .map(|c| c.values)
            .unwrap_or_default();

        log_event(app_id, format_args!("flotilla run '{command}'"));
        let line = docker_run_line(app_id, release.version, &config, command);
        let spec = self.node_spec_for(&node)?;
        self.executor
            .run_single(tasks::run_node(self.cm.clone(), spec, line))
            .await
            .map_err(OrchestratorError::driver)
    }

    /// The last `lines` lines of the app's aggregated log, or the
    /// configured default when `lines` is `None`.
    pub fn app_logs(&self, app_id: &str, lines: Option<usize>) -> OrchestratorResult<String> {
        self.app(app_id)?;
        let path = self.logs.dir.join(format!("{app_id}.log"));
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchestratorError::NotFound(format!("logs for app {app_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(tail(&body, lines.unwrap_or(self.logs.lines)))
    }
}

fn tail(body: &str, lines: usize) -> String {
    let all: Vec<&str> = body.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut out = all[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Quote `value` for a POSIX shell single-quoted string.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn docker_run_line(
    app_id: &str,
    version: u32,
    env: &BTreeMap<String, String>,
    command: &str,
) -> String {
    let mut parts = vec!["sudo docker run".to_string()];
    parts.extend(
        env.iter()
            .map(|(k, v)| format!("-e {}", shell_quote(&format!("{k}={v}")))),
    );
    parts.push(format!(
        "-a stdout -a stderr --rm -v {SLUG_DIR}/{app_id}-v{version}:/app:ro {SLUGRUNNER_IMAGE}"
    ));
    parts.push(command.to_string());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_line_carries_env_and_slug() {
        let env = BTreeMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "two".to_string()),
        ]);
        assert_eq!(
            docker_run_line("shop", 3, &env, "ls -la"),
            "sudo docker run -e 'A=1' -e 'B=two' -a stdout -a stderr --rm \
             -v /opt/flotilla/runtime/slugs/shop-v3:/app:ro flotilla/slugrunner ls -la"
        );
    }

    #[test]
    fn docker_line_escapes_single_quotes() {
        let env = BTreeMap::from([("Q".to_string(), "it's'; rm -rf /".to_string())]);
        let line = docker_run_line("shop", 1, &env, "env");
        assert!(line.starts_with(r"sudo docker run -e 'Q=it'\''s'\''; rm -rf /' -a stdout"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc\n");
        assert_eq!(tail("a\nb", 5), "a\nb\n");
        assert_eq!(tail("", 3), "");
        assert_eq!(tail("a\nb\n", 0), "");
    }

    #[test]
    fn docker_line_without_env() {
        assert_eq!(
            docker_run_line("shop", 1, &BTreeMap::new(), "env"),
            "sudo docker run -a stdout -a stderr --rm \
             -v /opt/flotilla/runtime/slugs/shop-v1:/app:ro flotilla/slugrunner env"
        );
    }
}
