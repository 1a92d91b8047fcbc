//! Databag computation.
//!
//! A databag is the JSON document the CM backend converges nodes toward.
//! It is derived from the record store on every publish and never stored.

use std::collections::BTreeMap;

use flotilla_state::{App, Container, Formation, Layer, Node};
use serde_json::{Map, Value, json};

use crate::controller::Controller;
use crate::error::OrchestratorResult;

/// Proxy listen port advertised to CM.
const PROXY_PORT: u16 = 80;

/// Everything a formation databag is computed from.
struct FormationView {
    formation: Formation,
    layers: Vec<Layer>,
    nodes: Vec<Node>,
    apps: Vec<App>,
    containers: Vec<Container>,
}

impl FormationView {
    fn layer_of(&self, node: &Node) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == node.layer)
    }

    fn is_proxy(&self, node: &Node) -> bool {
        self.layer_of(node).is_some_and(|l| l.proxy)
    }

    fn proxy_fqdns(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.is_proxy(n))
            .filter_map(|n| n.fqdn.clone())
            .collect()
    }
}

impl Controller {
    fn formation_view(&self, formation_id: &str) -> OrchestratorResult<FormationView> {
        Ok(FormationView {
            formation: self.formation(formation_id)?,
            layers: self.store.list_layers(formation_id)?,
            nodes: self.store.list_nodes(formation_id)?,
            apps: self.store.list_apps(formation_id)?,
            containers: self.store.list_containers_for_formation(formation_id)?,
        })
    }

    /// Databag for one app: latest release, container statuses, domains
    /// and users.
    pub fn calculate_app(&self, app_id: &str) -> OrchestratorResult<Value> {
        let app = self.app(app_id)?;
        let view = self.formation_view(&app.formation)?;
        self.app_databag(&app, &view)
    }

    /// Databag for a formation: its nodes and every app, with container
    /// addresses and proxy settings.
    pub fn calculate_formation(&self, formation_id: &str) -> OrchestratorResult<Value> {
        let view = self.formation_view(formation_id)?;

        let mut nodes = Map::new();
        for node in &view.nodes {
            let layer = view.layer_of(node);
            nodes.insert(
                node.id.clone(),
                json!({
                    "fqdn": node.fqdn,
                    "runtime": layer.is_some_and(|l| l.runtime),
                    "proxy": layer.is_some_and(|l| l.proxy),
                }),
            );
        }

        let proxies = view.proxy_fqdns();
        let mut apps = Map::new();
        for app in &view.apps {
            let mut bag = self.app_databag(app, &view)?;
            let mut containers: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
            let mut backends = Vec::new();
            for c in view.containers.iter().filter(|c| c.app == app.id) {
                containers
                    .entry(c.kind.clone())
                    .or_default()
                    .insert(c.num.to_string(), json!(format!("{}:{}", c.node, c.port)));
                if c.kind == "web" {
                    let host = view
                        .nodes
                        .iter()
                        .find(|n| n.id == c.node)
                        .and_then(|n| n.fqdn.clone())
                        .unwrap_or_else(|| c.node.clone());
                    backends.push(format!("{host}:{}", c.port));
                }
            }
            if let Value::Object(obj) = &mut bag {
                obj.insert("containers".to_string(), json!(containers));
                obj.insert(
                    "proxy".to_string(),
                    json!({
                        "nodes": proxies,
                        "algorithm": "round_robin",
                        "port": PROXY_PORT,
                        "backends": backends,
                    }),
                );
            }
            apps.insert(app.id.clone(), bag);
        }

        Ok(json!({
            "id": view.formation.id,
            "domain": view.formation.domain,
            "nodes": nodes,
            "apps": apps,
        }))
    }

    fn app_databag(&self, app: &App, view: &FormationView) -> OrchestratorResult<Value> {
        let mut release = Map::new();
        if let Some(latest) = self.store.latest_release(&app.id)? {
            release.insert("version".to_string(), json!(latest.version));
            let config = self
                .store
                .get_config(&app.id, latest.config_version)?
                .map(|c| c.values)
                .unwrap_or_default();
            release.insert("config".to_string(), json!(config));
            let build = match latest.build {
                Some(created) => self.store.get_build(&app.id, created)?,
                None => None,
            };
            if let Some(build) = build {
                let mut b = Map::new();
                b.insert("image".to_string(), json!(build.image));
                if let Some(url) = &build.url {
                    b.insert("url".to_string(), json!(url));
                    b.insert("procfile".to_string(), json!(build.procfile));
                }
                release.insert("build".to_string(), Value::Object(b));
            }
        }

        let mut containers: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for c in view.containers.iter().filter(|c| c.app == app.id) {
            containers
                .entry(c.kind.clone())
                .or_default()
                .insert(c.num.to_string(), json!(c.status));
        }

        let domains = match &view.formation.domain {
            Some(domain) => vec![format!("{}.{domain}", app.id)],
            None => view.proxy_fqdns(),
        };

        let mut users = Map::new();
        users.insert(app.owner.clone(), json!("owner"));

        Ok(json!({
            "id": app.id,
            "release": release,
            "containers": containers,
            "domains": domains,
            "users": users,
        }))
    }
}
