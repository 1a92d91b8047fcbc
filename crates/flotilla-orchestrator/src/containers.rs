//! Applying placement plans to the record store.

use std::collections::BTreeMap;

use flotilla_placement::{Snapshot, plan_balance, plan_scale, snapshot_from_records};
use flotilla_state::{App, ContainerChanges, NewContainer};
use tracing::{debug, info};

use crate::controller::Controller;
use crate::error::OrchestratorResult;
use crate::events::log_event;

impl Controller {
    /// Scale an app's containers to the requested per-type counts and
    /// publish the formation when anything moved. Returns whether any
    /// container was added or removed.
    pub async fn scale_app(
        &self,
        app_id: &str,
        requested: &BTreeMap<String, i64>,
    ) -> OrchestratorResult<bool> {
        let app = self.app(app_id)?;
        let _guard = self.locks.acquire(&app.formation).await;
        let changed = self.scale_app_locked(app_id, requested)?;
        if changed {
            self.publish_formation(&app.formation).await?;
        }
        Ok(changed)
    }

    /// Even out container counts across the formation's runtime nodes.
    pub async fn balance_formation(&self, formation_id: &str) -> OrchestratorResult<bool> {
        self.formation(formation_id)?;
        let _guard = self.locks.acquire(formation_id).await;
        let changed = self.balance_locked(formation_id)?;
        if changed {
            self.publish_formation(formation_id).await?;
        }
        Ok(changed)
    }

    fn snapshot(&self, formation_id: &str) -> OrchestratorResult<Snapshot> {
        let nodes = self.store.list_nodes(formation_id)?;
        let layers = self.store.list_layers(formation_id)?;
        let containers = self.store.list_containers_for_formation(formation_id)?;
        Ok(snapshot_from_records(&nodes, &layers, &containers))
    }

    /// Plan and apply a scale. The caller holds the formation lock.
    pub(crate) fn scale_app_locked(
        &self,
        app_id: &str,
        requested: &BTreeMap<String, i64>,
    ) -> OrchestratorResult<bool> {
        let app = self.app(app_id)?;
        let snapshot = self.snapshot(&app.formation)?;
        let plan = plan_scale(&snapshot, app_id, &app.containers, requested)?;

        log_event(app_id, format_args!("Containers scaled {}", plan.summary()));
        if plan.is_noop() && plan.counts == app.containers {
            debug!(app = %app_id, "scale is a no-op");
            return Ok(false);
        }

        let changes = ContainerChanges {
            remove: plan
                .removals
                .iter()
                .map(|c| (c.app.clone(), c.kind.clone(), c.num))
                .collect(),
            add: plan
                .additions
                .iter()
                .map(|(kind, node)| NewContainer {
                    app: app_id.to_string(),
                    node: node.clone(),
                    kind: kind.clone(),
                })
                .collect(),
            app_updates: vec![App {
                containers: plan.counts.clone(),
                ..app.clone()
            }],
        };
        self.store.apply_container_changes(&app.formation, &changes)?;

        info!(
            app = %app_id,
            formation = %app.formation,
            added = plan.additions.len(),
            removed = plan.removals.len(),
            "containers scaled"
        );
        Ok(!plan.is_noop())
    }

    /// Plan and apply a rebalance. The caller holds the formation lock.
    pub(crate) fn balance_locked(&self, formation_id: &str) -> OrchestratorResult<bool> {
        let snapshot = self.snapshot(formation_id)?;
        let plan = plan_balance(&snapshot);
        if plan.is_noop() {
            return Ok(false);
        }

        let mut changes = ContainerChanges::default();
        for m in &plan.moves {
            changes
                .remove
                .push((m.container.app.clone(), m.container.kind.clone(), m.container.num));
            changes.add.push(NewContainer {
                app: m.container.app.clone(),
                node: m.to.clone(),
                kind: m.container.kind.clone(),
            });
        }
        self.store.apply_container_changes(formation_id, &changes)?;

        info!(formation = %formation_id, moves = plan.moves.len(), "formation balanced");
        for app in plan.affected_apps() {
            log_event(app, "Containers balanced");
        }
        Ok(true)
    }
}
