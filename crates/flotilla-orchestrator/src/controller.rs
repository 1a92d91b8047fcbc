//! The controller ties the record store, driver registry, CM backend and
//! task executor together. Operations live in sibling modules as
//! `impl Controller` blocks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use flotilla_drivers::{ConfigManager, DriverRegistry};
use flotilla_state::{App, Formation, Layer, Node, StateStore};
use flotilla_tasks::TaskExecutor;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::OwnedMutexGuard;

use crate::error::{OrchestratorError, OrchestratorResult};

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

/// Per-formation async mutexes.
///
/// Placement, balancing, layer scaling and formation teardown for one
/// formation run one at a time; different formations proceed in parallel.
#[derive(Default)]
pub struct FormationLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FormationLocks {
    pub async fn acquire(&self, formation: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(formation.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Where app logs are aggregated and how much of them to return.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub lines: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/log/flotilla"),
            lines: 100,
        }
    }
}

/// Control-plane entry point.
#[derive(Clone)]
pub struct Controller {
    pub(crate) store: StateStore,
    pub(crate) drivers: Arc<DriverRegistry>,
    pub(crate) cm: Arc<dyn ConfigManager>,
    pub(crate) executor: TaskExecutor,
    pub(crate) locks: Arc<FormationLocks>,
    pub(crate) logs: LogSettings,
}

impl Controller {
    pub fn new(
        store: StateStore,
        drivers: Arc<DriverRegistry>,
        cm: Arc<dyn ConfigManager>,
        executor: TaskExecutor,
    ) -> Self {
        Self {
            store,
            drivers,
            cm,
            executor,
            locks: Arc::new(FormationLocks::default()),
            logs: LogSettings::default(),
        }
    }

    pub fn with_logs(mut self, logs: LogSettings) -> Self {
        self.logs = logs;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    // ── Lookups ───────────────────────────────────────────────────

    pub(crate) fn formation(&self, id: &str) -> OrchestratorResult<Formation> {
        self.store
            .get_formation(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("formation {id}")))
    }

    pub(crate) fn layer(&self, formation: &str, id: &str) -> OrchestratorResult<Layer> {
        self.store
            .get_layer(formation, id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("layer {formation}/{id}")))
    }

    pub(crate) fn node(&self, formation: &str, id: &str) -> OrchestratorResult<Node> {
        self.store
            .get_node(formation, id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {id}")))
    }

    pub(crate) fn app(&self, id: &str) -> OrchestratorResult<App> {
        self.store
            .get_app(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("app {id}")))
    }
}

/// Reject ids that are not lowercase slugs.
pub(crate) fn validate_slug(kind: &str, id: &str) -> OrchestratorResult<()> {
    if id.len() > 64 || !SLUG.is_match(id) {
        return Err(OrchestratorError::InvalidInput(format!(
            "{kind} id {id:?} must be a lowercase slug"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert!(validate_slug("app", "my-app-2").is_ok());
        assert!(validate_slug("app", "My_App").is_err());
        assert!(validate_slug("app", "-lead").is_err());
        assert!(validate_slug("app", "").is_err());
    }

    #[tokio::test]
    async fn formation_locks_serialize_same_id() {
        let locks = Arc::new(FormationLocks::default());
        let guard = locks.acquire("f1").await;

        // A different formation is not blocked.
        let _other = locks.acquire("f2").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = locks2.acquire("f1").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
