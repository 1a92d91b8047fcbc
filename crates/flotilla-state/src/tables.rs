//! redb table definitions for the Flotilla record store.
//!
//! Each record table uses `&str` keys and `&[u8]` values (JSON-serialized
//! records). Composite keys follow `{parent}/{child}`.

use redb::TableDefinition;

/// Formations keyed by `{formation_id}`.
pub const FORMATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("formations");

/// Providers keyed by `{owner}/{provider_id}`.
pub const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");

/// Flavors keyed by `{owner}/{flavor_id}`.
pub const FLAVORS: TableDefinition<&str, &[u8]> = TableDefinition::new("flavors");

/// Layers keyed by `{formation_id}/{layer_id}`.
pub const LAYERS: TableDefinition<&str, &[u8]> = TableDefinition::new("layers");

/// Nodes keyed by `{formation_id}/{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Apps keyed by `{app_id}`.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");

/// Containers keyed by `{app_id}/{type}.{num:010}`.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Builds keyed by `{app_id}/{created:020}`.
pub const BUILDS: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");

/// Configs keyed by `{app_id}/{version:010}`.
pub const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");

/// Releases keyed by `{app_id}/{version:010}`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Users keyed by `{username}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Attached services keyed by `{app_id}/{service_name}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Counters: the global creation sequence and the per-app / per-formation
/// high-water marks for container numbers and ports.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key of the global creation sequence in [`META`].
pub const SEQ_KEY: &str = "seq";

/// High-water mark of container numbers for an app.
pub fn container_num_key(app_id: &str) -> String {
    format!("container-num/{app_id}")
}

/// High-water mark of container ports for a formation.
pub fn container_port_key(formation_id: &str) -> String {
    format!("container-port/{formation_id}")
}
