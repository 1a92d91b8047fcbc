//! StateStore — redb-backed record persistence for Flotilla.
//!
//! Provides typed CRUD over every record plus the few multi-record
//! operations that must be atomic: node number allocation, container
//! number/port allocation, and cascading deletes. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// A record type stored in its own table.
trait Record: Serialize + DeserializeOwned {
    const TABLE: RecordTable;
    const KIND: &'static str;
    fn key(&self) -> String;
    fn stamp(&mut self, created: u64);
    fn created(&self) -> u64;
}

macro_rules! record {
    ($ty:ty, $table:expr, $kind:literal, |$s:ident| $key:expr) => {
        impl Record for $ty {
            const TABLE: RecordTable = $table;
            const KIND: &'static str = $kind;
            fn key(&self) -> String {
                let $s = self;
                $key
            }
            fn stamp(&mut self, created: u64) {
                self.created = created;
            }
            fn created(&self) -> u64 {
                self.created
            }
        }
    };
}

record!(Formation, FORMATIONS, "formation", |s| s.id.clone());
record!(Provider, PROVIDERS, "provider", |s| s.table_key());
record!(Flavor, FLAVORS, "flavor", |s| s.table_key());
record!(Layer, LAYERS, "layer", |s| s.table_key());
record!(Node, NODES, "node", |s| s.table_key());
record!(App, APPS, "app", |s| s.id.clone());
record!(Container, CONTAINERS, "container", |s| s.table_key());
record!(Build, BUILDS, "build", |s| s.table_key());
record!(Config, CONFIGS, "config", |s| s.table_key());
record!(Release, RELEASES, "release", |s| s.table_key());
record!(User, USERS, "user", |s| s.username.clone());
record!(Service, SERVICES, "service", |s| s.table_key());

/// A container to create; number and port are allocated by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContainer {
    pub app: AppId,
    pub node: NodeId,
    pub kind: String,
}

/// A set of container changes applied in one write transaction.
///
/// Removals are `(app, type, num)` triples. Apps listed in
/// `app_updates` are written in the same transaction (used to persist
/// the desired container counts alongside the placement).
#[derive(Debug, Clone, Default)]
pub struct ContainerChanges {
    pub remove: Vec<(AppId, String, u32)>,
    pub add: Vec<NewContainer>,
    pub app_updates: Vec<App>,
}

impl ContainerChanges {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty() && self.app_updates.is_empty()
    }
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            FORMATIONS, PROVIDERS, FLAVORS, LAYERS, NODES, APPS, CONTAINERS, BUILDS, CONFIGS,
            RELEASES, USERS, SERVICES,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ─────────────────────────────────────

    /// Insert a new record, stamping its creation sequence.
    fn insert<R: Record>(&self, mut record: R) -> StateResult<R> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            insert_in(&mut table, &mut meta, &mut record)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = R::KIND, key = %record.key(), "record inserted");
        Ok(record)
    }

    /// Overwrite an existing record. Fails if it does not exist.
    fn update<R: Record>(&self, record: &R) -> StateResult<()> {
        let key = record.key();
        let value = encode(record)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            let existed = table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?
                .is_some();
            if !existed {
                return Err(StateError::NotFound(format!("{} {key}", R::KIND)));
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<R: Record>(&self, key: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All records whose key starts with `prefix`, in creation order.
    fn scan<R: Record>(&self, prefix: &str) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
        scan_in(&table, prefix)
    }

    fn remove<R: Record>(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(R::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind = R::KIND, %key, existed, "record deleted");
        Ok(existed)
    }

    // ── Formations ────────────────────────────────────────────────

    pub fn insert_formation(&self, formation: Formation) -> StateResult<Formation> {
        self.insert(formation)
    }

    pub fn get_formation(&self, id: &str) -> StateResult<Option<Formation>> {
        self.get(id)
    }

    pub fn list_formations(&self) -> StateResult<Vec<Formation>> {
        self.scan("")
    }

    pub fn update_formation(&self, formation: &Formation) -> StateResult<()> {
        self.update(formation)
    }

    /// Delete a formation. Refused while layers, nodes or apps still
    /// reference it.
    pub fn delete_formation(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}/");
        if !self.scan::<Node>(&prefix)?.is_empty() || !self.scan::<Layer>(&prefix)?.is_empty() {
            return Err(StateError::Conflict(format!(
                "formation {id} still has nodes or layers"
            )));
        }
        if !self.list_apps(id)?.is_empty() {
            return Err(StateError::Conflict(format!("formation {id} still has apps")));
        }
        self.remove::<Formation>(id)
    }

    // ── Providers / Flavors ───────────────────────────────────────

    pub fn insert_provider(&self, provider: Provider) -> StateResult<Provider> {
        self.insert(provider)
    }

    pub fn get_provider(&self, owner: &str, id: &str) -> StateResult<Option<Provider>> {
        self.get(&owner_key(owner, id))
    }

    pub fn list_providers(&self, owner: &str) -> StateResult<Vec<Provider>> {
        self.scan(&format!("{owner}/"))
    }

    pub fn insert_flavor(&self, flavor: Flavor) -> StateResult<Flavor> {
        self.insert(flavor)
    }

    pub fn get_flavor(&self, owner: &str, id: &str) -> StateResult<Option<Flavor>> {
        self.get(&owner_key(owner, id))
    }

    pub fn list_flavors(&self, owner: &str) -> StateResult<Vec<Flavor>> {
        self.scan(&format!("{owner}/"))
    }

    // ── Layers ────────────────────────────────────────────────────

    pub fn insert_layer(&self, layer: Layer) -> StateResult<Layer> {
        if self.get_formation(&layer.formation)?.is_none() {
            return Err(StateError::NotFound(format!("formation {}", layer.formation)));
        }
        self.insert(layer)
    }

    pub fn get_layer(&self, formation: &str, id: &str) -> StateResult<Option<Layer>> {
        self.get(&format!("{formation}/{id}"))
    }

    /// Layers of a formation in creation order.
    pub fn list_layers(&self, formation: &str) -> StateResult<Vec<Layer>> {
        self.scan(&format!("{formation}/"))
    }

    /// Delete a layer. Refused while any node references it.
    pub fn delete_layer(&self, formation: &str, id: &str) -> StateResult<bool> {
        let referenced = self
            .list_nodes(formation)?
            .iter()
            .any(|n| n.layer == id);
        if referenced {
            return Err(StateError::Conflict(format!(
                "layer {formation}/{id} still has nodes"
            )));
        }
        self.remove::<Layer>(&format!("{formation}/{id}"))
    }

    // ── Nodes ─────────────────────────────────────────────────────

    /// Create a node record with the next sequence number for its
    /// (formation, layer). Number allocation and insert share one write
    /// transaction.
    pub fn create_node(
        &self,
        formation: &str,
        layer: &str,
        owner: &str,
        fqdn: Option<String>,
    ) -> StateResult<Node> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let node;
        {
            let layers = txn.open_table(LAYERS).map_err(map_err!(Table))?;
            if layers
                .get(format!("{formation}/{layer}").as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(format!("layer {formation}/{layer}")));
            }
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let existing: Vec<Node> = scan_in(&nodes, &format!("{formation}/"))?;
            let num = existing
                .iter()
                .filter(|n| n.layer == layer)
                .map(|n| n.num)
                .max()
                .unwrap_or(0)
                + 1;
            let mut new_node = Node {
                id: Node::make_id(formation, layer, num),
                formation: formation.to_string(),
                layer: layer.to_string(),
                owner: owner.to_string(),
                num,
                provider_id: None,
                fqdn,
                metadata: BTreeMap::new(),
                status: NodeStatus::Unprovisioned,
                created: 0,
            };
            insert_in(&mut nodes, &mut meta, &mut new_node)?;
            node = new_node;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %node.id, num = node.num, "node created");
        Ok(node)
    }

    pub fn get_node(&self, formation: &str, id: &str) -> StateResult<Option<Node>> {
        self.get(&format!("{formation}/{id}"))
    }

    /// Nodes of a formation in creation order.
    pub fn list_nodes(&self, formation: &str) -> StateResult<Vec<Node>> {
        self.scan(&format!("{formation}/"))
    }

    pub fn update_node(&self, node: &Node) -> StateResult<()> {
        self.update(node)
    }

    /// Delete a node and every container placed on it.
    pub fn delete_node(&self, formation: &str, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let mut orphans = 0;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = nodes
                .remove(format!("{formation}/{id}").as_str())
                .map_err(map_err!(Write))?
                .is_some();
            let mut containers = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let all: Vec<Container> = scan_in(&containers, "")?;
            for c in all.iter().filter(|c| c.formation == formation && c.node == id) {
                containers
                    .remove(c.table_key().as_str())
                    .map_err(map_err!(Write))?;
                orphans += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %id, existed, containers_removed = orphans, "node deleted");
        Ok(existed)
    }

    // ── Apps ──────────────────────────────────────────────────────

    pub fn insert_app(&self, app: App) -> StateResult<App> {
        if self.get_formation(&app.formation)?.is_none() {
            return Err(StateError::NotFound(format!("formation {}", app.formation)));
        }
        self.insert(app)
    }

    pub fn get_app(&self, id: &str) -> StateResult<Option<App>> {
        self.get(id)
    }

    /// Apps of a formation in creation order.
    pub fn list_apps(&self, formation: &str) -> StateResult<Vec<App>> {
        let mut apps: Vec<App> = self.scan("")?;
        apps.retain(|a| a.formation == formation);
        Ok(apps)
    }

    pub fn update_app(&self, app: &App) -> StateResult<()> {
        self.update(app)
    }

    /// Delete an app together with its containers, builds, configs,
    /// releases and service records.
    pub fn delete_app(&self, id: &str) -> StateResult<bool> {
        let prefix = format!("{id}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;
            existed = apps.remove(id).map_err(map_err!(Write))?.is_some();
            for table in [CONTAINERS, BUILDS, CONFIGS, RELEASES, SERVICES] {
                let mut t = txn.open_table(table).map_err(map_err!(Table))?;
                remove_prefix_in(&mut t, &prefix)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %id, existed, "app deleted");
        Ok(existed)
    }

    // ── Containers ────────────────────────────────────────────────

    /// Containers of an app in creation order (oldest first).
    pub fn list_containers_for_app(&self, app: &str) -> StateResult<Vec<Container>> {
        self.scan(&format!("{app}/"))
    }

    /// Containers of every app in a formation, oldest first.
    pub fn list_containers_for_formation(&self, formation: &str) -> StateResult<Vec<Container>> {
        let mut containers: Vec<Container> = self.scan("")?;
        containers.retain(|c| c.formation == formation);
        Ok(containers)
    }

    /// Apply a set of container removals and additions atomically.
    ///
    /// New containers get the next number from their app's high-water
    /// mark and the next port from the formation's high-water mark, so
    /// neither is ever reused. Removing a container that no longer
    /// exists, or placing one on a node that is gone, is a
    /// [`StateError::Conflict`] and nothing is written.
    pub fn apply_container_changes(
        &self,
        formation: &str,
        changes: &ContainerChanges,
    ) -> StateResult<Vec<Container>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut created = Vec::with_capacity(changes.add.len());
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let mut containers = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;

            for (app, kind, num) in &changes.remove {
                let key = container_key(app, kind, *num);
                let removed = containers
                    .remove(key.as_str())
                    .map_err(map_err!(Write))?
                    .is_some();
                if !removed {
                    return Err(StateError::Conflict(format!(
                        "container {app} {kind}.{num} no longer exists"
                    )));
                }
            }

            let current: Vec<Container> = scan_in(&containers, "")?;
            let mut ports: HashSet<u16> = current
                .iter()
                .filter(|c| c.formation == formation)
                .map(|c| c.port)
                .collect();
            let max_port = ports
                .iter()
                .copied()
                .max()
                .unwrap_or(FIRST_CONTAINER_PORT - 1);

            for new in &changes.add {
                let Some(app_bytes) = apps.get(new.app.as_str()).map_err(map_err!(Read))? else {
                    return Err(StateError::Conflict(format!("app {} no longer exists", new.app)));
                };
                let app: App = decode(app_bytes.value())?;
                drop(app_bytes);
                if app.formation != formation {
                    return Err(StateError::Conflict(format!(
                        "app {} does not belong to formation {formation}",
                        app.id
                    )));
                }
                let node_key = format!("{formation}/{}", new.node);
                if nodes.get(node_key.as_str()).map_err(map_err!(Read))?.is_none() {
                    return Err(StateError::Conflict(format!(
                        "node {} no longer exists",
                        new.node
                    )));
                }

                let max_num = current
                    .iter()
                    .filter(|c| c.app == new.app)
                    .map(|c| u64::from(c.num))
                    .max()
                    .unwrap_or(0);
                let num = bump(&mut meta, &container_num_key(&new.app), max_num)?;
                let port = bump(
                    &mut meta,
                    &container_port_key(formation),
                    u64::from(max_port),
                )?;
                let num = u32::try_from(num)
                    .map_err(|_| StateError::Conflict(format!("app {} out of container numbers", new.app)))?;
                let port = u16::try_from(port)
                    .map_err(|_| StateError::Conflict(format!("formation {formation} out of ports")))?;
                if !ports.insert(port) {
                    return Err(StateError::Conflict(format!(
                        "port {port} already allocated in formation {formation}"
                    )));
                }

                let mut container = Container {
                    app: new.app.clone(),
                    formation: formation.to_string(),
                    node: new.node.clone(),
                    owner: app.owner.clone(),
                    kind: new.kind.clone(),
                    num,
                    port,
                    status: "up".to_string(),
                    created: 0,
                };
                insert_in(&mut containers, &mut meta, &mut container)?;
                created.push(container);
            }

            for app in &changes.app_updates {
                let value = encode(app)?;
                apps.insert(app.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %formation,
            removed = changes.remove.len(),
            added = created.len(),
            "container changes applied"
        );
        Ok(created)
    }

    // ── Builds / Configs / Releases ───────────────────────────────

    pub fn insert_build(&self, build: Build) -> StateResult<Build> {
        self.insert(build)
    }

    pub fn get_build(&self, app: &str, created: u64) -> StateResult<Option<Build>> {
        self.get(&format!("{app}/{created:020}"))
    }

    pub fn latest_build(&self, app: &str) -> StateResult<Option<Build>> {
        Ok(self.scan::<Build>(&format!("{app}/"))?.pop())
    }

    pub fn insert_config(&self, config: Config) -> StateResult<Config> {
        self.insert(config)
    }

    pub fn get_config(&self, app: &str, version: u32) -> StateResult<Option<Config>> {
        self.get(&format!("{app}/{version:010}"))
    }

    pub fn latest_config(&self, app: &str) -> StateResult<Option<Config>> {
        let mut configs: Vec<Config> = self.scan(&format!("{app}/"))?;
        configs.sort_by_key(|c| c.version);
        Ok(configs.pop())
    }

    pub fn insert_release(&self, release: Release) -> StateResult<Release> {
        self.insert(release)
    }

    /// Releases of an app, oldest version first.
    pub fn list_releases(&self, app: &str) -> StateResult<Vec<Release>> {
        let mut releases: Vec<Release> = self.scan(&format!("{app}/"))?;
        releases.sort_by_key(|r| r.version);
        Ok(releases)
    }

    pub fn latest_release(&self, app: &str) -> StateResult<Option<Release>> {
        Ok(self.list_releases(app)?.pop())
    }

    // ── Users ─────────────────────────────────────────────────────

    /// Insert a user, or overwrite an existing one keeping its sequence.
    pub fn put_user(&self, user: User) -> StateResult<User> {
        match self.get_user(&user.username)? {
            Some(existing) => {
                let user = User {
                    created: existing.created,
                    ..user
                };
                self.update(&user)?;
                Ok(user)
            }
            None => self.insert(user),
        }
    }

    pub fn get_user(&self, username: &str) -> StateResult<Option<User>> {
        self.get(username)
    }

    pub fn delete_user(&self, username: &str) -> StateResult<bool> {
        self.remove::<User>(username)
    }

    // ── Services ──────────────────────────────────────────────────

    pub fn insert_service(&self, service: Service) -> StateResult<Service> {
        self.insert(service)
    }

    pub fn get_service(&self, app: &str, name: &str) -> StateResult<Option<Service>> {
        self.get(&format!("{app}/{name}"))
    }

    pub fn list_services(&self, app: &str) -> StateResult<Vec<Service>> {
        self.scan(&format!("{app}/"))
    }

    pub fn update_service(&self, service: &Service) -> StateResult<()> {
        self.update(service)
    }

    pub fn delete_service(&self, app: &str, name: &str) -> StateResult<bool> {
        self.remove::<Service>(&format!("{app}/{name}"))
    }
}

// ── Transaction helpers ───────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Decode every record under `prefix` and sort by creation sequence.
fn scan_in<R, T>(table: &T, prefix: &str) -> StateResult<Vec<R>>
where
    R: Record,
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            results.push(decode::<R>(value.value())?);
        }
    }
    results.sort_by_key(|r| r.created());
    Ok(results)
}

fn remove_prefix_in(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<u32> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            keys.push(key.value().to_string());
        }
    }
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}

/// Advance the counter at `key` to `max(current, floor) + 1`.
fn bump(meta: &mut Table<'_, &'static str, u64>, key: &str, floor: u64) -> StateResult<u64> {
    let current = meta
        .get(key)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    let next = current.max(floor) + 1;
    meta.insert(key, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn insert_in<R: Record>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    meta: &mut Table<'_, &'static str, u64>,
    record: &mut R,
) -> StateResult<()> {
    let seq = bump(meta, SEQ_KEY, 0)?;
    record.stamp(seq);
    let key = record.key();
    if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
        return Err(StateError::AlreadyExists(format!("{} {key}", R::KIND)));
    }
    let value = encode(record)?;
    table
        .insert(key.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

#[cfg(test)]
fn read_counter(store: &StateStore, key: &str) -> u64 {
    let txn = store.db.begin_read().unwrap();
    let meta = txn.open_table(META).unwrap();
    meta.get(key).unwrap().map(|g| g.value()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn seed(store: &StateStore) {
        store
            .insert_formation(Formation {
                id: "f1".to_string(),
                owner: "alice".to_string(),
                domain: None,
                nodes: BTreeMap::new(),
                created: 0,
            })
            .unwrap();
        store.insert_layer(test_layer("f1", "runtime")).unwrap();
        store
            .insert_app(App {
                id: "app1".to_string(),
                owner: "alice".to_string(),
                formation: "f1".to_string(),
                containers: BTreeMap::new(),
                created: 0,
            })
            .unwrap();
    }

    fn test_layer(formation: &str, id: &str) -> Layer {
        Layer {
            id: id.to_string(),
            formation: formation.to_string(),
            owner: "alice".to_string(),
            flavor: "mock-small".to_string(),
            proxy: false,
            runtime: true,
            ssh_username: "ubuntu".to_string(),
            ssh_private_key: "priv".to_string(),
            ssh_public_key: "pub".to_string(),
            ssh_port: 22,
            config: BTreeMap::new(),
            created: 0,
        }
    }

    fn add(app: &str, node: &str, kind: &str) -> NewContainer {
        NewContainer {
            app: app.to_string(),
            node: node.to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn formation_insert_and_get() {
        let store = test_store();
        seed(&store);

        let f = store.get_formation("f1").unwrap().unwrap();
        assert_eq!(f.owner, "alice");
        assert!(f.created > 0);
        assert!(store.get_formation("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = test_store();
        seed(&store);

        let err = store.insert_layer(test_layer("f1", "runtime")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn layer_requires_formation() {
        let store = test_store();
        let err = store.insert_layer(test_layer("missing", "l1")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn node_numbers_follow_max_existing() {
        let store = test_store();
        seed(&store);

        let n1 = store.create_node("f1", "runtime", "alice", None).unwrap();
        let n2 = store.create_node("f1", "runtime", "alice", None).unwrap();
        assert_eq!(n1.id, "f1-runtime-1");
        assert_eq!(n2.id, "f1-runtime-2");
        assert_eq!(n1.status, NodeStatus::Unprovisioned);

        store.delete_node("f1", &n1.id).unwrap();
        let n3 = store.create_node("f1", "runtime", "alice", None).unwrap();
        assert_eq!(n3.num, 3);

        let ids: Vec<String> = store.list_nodes("f1").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["f1-runtime-2", "f1-runtime-3"]);
    }

    #[test]
    fn node_requires_layer() {
        let store = test_store();
        seed(&store);
        let err = store.create_node("f1", "ghost", "alice", None).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn containers_get_fresh_numbers_and_ports() {
        let store = test_store();
        seed(&store);
        let node = store.create_node("f1", "runtime", "alice", None).unwrap();

        let created = store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    add: vec![add("app1", &node.id, "web"), add("app1", &node.id, "web")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(created[0].num, 1);
        assert_eq!(created[0].port, FIRST_CONTAINER_PORT);
        assert_eq!(created[1].num, 2);
        assert_eq!(created[1].port, FIRST_CONTAINER_PORT + 1);

        // Remove the newest and add again: neither number nor port is reused.
        let created = store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    remove: vec![("app1".to_string(), "web".to_string(), 2)],
                    add: vec![add("app1", &node.id, "web")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(created[0].num, 3);
        assert_eq!(created[0].port, FIRST_CONTAINER_PORT + 2);
        assert_eq!(read_counter(&store, &container_num_key("app1")), 3);
    }

    #[test]
    fn removing_missing_container_is_a_conflict_and_writes_nothing() {
        let store = test_store();
        seed(&store);
        let node = store.create_node("f1", "runtime", "alice", None).unwrap();

        let err = store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    remove: vec![("app1".to_string(), "web".to_string(), 9)],
                    add: vec![add("app1", &node.id, "web")],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert!(store.list_containers_for_app("app1").unwrap().is_empty());
    }

    #[test]
    fn placing_on_missing_node_is_a_conflict() {
        let store = test_store();
        seed(&store);
        let err = store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    add: vec![add("app1", "f1-runtime-7", "web")],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn deleting_node_cascades_containers() {
        let store = test_store();
        seed(&store);
        let n1 = store.create_node("f1", "runtime", "alice", None).unwrap();
        let n2 = store.create_node("f1", "runtime", "alice", None).unwrap();
        store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    add: vec![add("app1", &n1.id, "web"), add("app1", &n2.id, "web")],
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(store.delete_node("f1", &n1.id).unwrap());
        let left = store.list_containers_for_app("app1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].node, n2.id);
    }

    #[test]
    fn layer_with_nodes_cannot_be_deleted() {
        let store = test_store();
        seed(&store);
        let node = store.create_node("f1", "runtime", "alice", None).unwrap();

        assert!(matches!(
            store.delete_layer("f1", "runtime").unwrap_err(),
            StateError::Conflict(_)
        ));
        store.delete_node("f1", &node.id).unwrap();
        assert!(store.delete_layer("f1", "runtime").unwrap());
    }

    #[test]
    fn app_updates_are_written_with_containers() {
        let store = test_store();
        seed(&store);
        let node = store.create_node("f1", "runtime", "alice", None).unwrap();
        let mut app = store.get_app("app1").unwrap().unwrap();
        app.containers.insert("web".to_string(), 1);

        store
            .apply_container_changes(
                "f1",
                &ContainerChanges {
                    add: vec![add("app1", &node.id, "web")],
                    app_updates: vec![app],
                    ..Default::default()
                },
            )
            .unwrap();

        let app = store.get_app("app1").unwrap().unwrap();
        assert_eq!(app.containers.get("web"), Some(&1));
    }

    #[test]
    fn delete_app_cascades_children() {
        let store = test_store();
        seed(&store);
        store.insert_build(Build::initial("app1", "alice")).unwrap();
        store
            .insert_config(Config {
                app: "app1".to_string(),
                owner: "alice".to_string(),
                version: 1,
                values: BTreeMap::new(),
                created: 0,
            })
            .unwrap();

        assert!(store.delete_app("app1").unwrap());
        assert!(store.latest_build("app1").unwrap().is_none());
        assert!(store.latest_config("app1").unwrap().is_none());
        assert!(store.delete_formation("f1").is_err()); // layer still there
    }

    #[test]
    fn releases_sort_by_version() {
        let store = test_store();
        seed(&store);
        for version in [1, 2, 10] {
            store
                .insert_release(Release {
                    app: "app1".to_string(),
                    owner: "alice".to_string(),
                    version,
                    summary: String::new(),
                    config_version: 1,
                    build: None,
                    created: 0,
                })
                .unwrap();
        }
        assert_eq!(store.latest_release("app1").unwrap().unwrap().version, 10);
    }

    #[test]
    fn put_user_keeps_sequence() {
        let store = test_store();
        let first = store
            .put_user(User {
                username: "alice".to_string(),
                keys: BTreeMap::new(),
                created: 0,
            })
            .unwrap();
        let mut keys = BTreeMap::new();
        keys.insert("laptop".to_string(), "ssh-ed25519 AAAA".to_string());
        let second = store
            .put_user(User {
                username: "alice".to_string(),
                keys,
                created: 0,
            })
            .unwrap();
        assert_eq!(first.created, second.created);
        assert_eq!(store.get_user("alice").unwrap().unwrap().keys.len(), 1);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            seed(&store);
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_app("app1").unwrap().is_some());
        let node = store.create_node("f1", "runtime", "alice", None).unwrap();
        assert_eq!(node.num, 1);
    }
}
