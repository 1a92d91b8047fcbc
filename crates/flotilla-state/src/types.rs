//! Record types for the Flotilla record store.
//!
//! Every record carries a `created` sequence assigned by the store on
//! insert. Callers constructing a new record leave it at `0`; ordering
//! by `created` gives creation order across the whole store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Formation identifier (slug, globally unique).
pub type FormationId = String;

/// Layer identifier (slug, unique within a formation).
pub type LayerId = String;

/// Node identifier, `{formation}-{layer}-{num}`.
pub type NodeId = String;

/// App identifier (slug, globally unique).
pub type AppId = String;

/// Default image for builds that have not been pushed yet.
pub const DEFAULT_BUILD_IMAGE: &str = "flotilla/slugbuilder";

/// First port handed out to containers in a formation.
pub const FIRST_CONTAINER_PORT: u16 = 10001;

// ── Formation ─────────────────────────────────────────────────────

/// A formation of nodes used to host applications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formation {
    pub id: FormationId,
    pub owner: String,
    pub domain: Option<String>,
    /// Desired node count per layer id.
    #[serde(default)]
    pub nodes: BTreeMap<LayerId, u32>,
    #[serde(default)]
    pub created: u64,
}

// ── Provider / Flavor ─────────────────────────────────────────────

/// Cloud provider settings for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: String,
    pub owner: String,
    /// Driver key, e.g. `mock`, `static`, `ec2`.
    pub kind: String,
    #[serde(default)]
    pub creds: BTreeMap<String, String>,
    #[serde(default)]
    pub created: u64,
}

/// Machine flavor offered by a provider (region, size, image ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavor {
    pub id: String,
    pub owner: String,
    /// Provider id (owner-scoped).
    pub provider: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub created: u64,
}

// ── Layer ─────────────────────────────────────────────────────────

/// A layer of nodes sharing one flavor and one configuration.
///
/// SSH settings are used to bootstrap and converge the layer's nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub id: LayerId,
    pub formation: FormationId,
    pub owner: String,
    /// Flavor id (owner-scoped).
    pub flavor: String,
    pub proxy: bool,
    pub runtime: bool,
    pub ssh_username: String,
    pub ssh_private_key: String,
    pub ssh_public_key: String,
    pub ssh_port: u16,
    /// CM settings, e.g. `{"run_list": [...], "environment": "dev"}`.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub created: u64,
}

// ── Node ──────────────────────────────────────────────────────────

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unprovisioned,
    Provisioning,
    Active,
    Converging,
    Destroying,
    /// Provisioning failed. Terminal: the node must be destroyed.
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Unprovisioned => "unprovisioned",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Active => "active",
            NodeStatus::Converging => "converging",
            NodeStatus::Destroying => "destroying",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A node hosting containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub formation: FormationId,
    pub layer: LayerId,
    pub owner: String,
    /// Sequence number within (formation, layer).
    pub num: u32,
    pub provider_id: Option<String>,
    pub fqdn: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub status: NodeStatus,
    #[serde(default)]
    pub created: u64,
}

impl Node {
    /// Synthesize the node id for a formation, layer and sequence number.
    pub fn make_id(formation: &str, layer: &str, num: u32) -> NodeId {
        format!("{formation}-{layer}-{num}")
    }
}

// ── App / Container ───────────────────────────────────────────────

/// An application served on behalf of end-users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub id: AppId,
    pub owner: String,
    pub formation: FormationId,
    /// Desired container count per container type.
    #[serde(default)]
    pub containers: BTreeMap<String, u32>,
    #[serde(default)]
    pub created: u64,
}

/// A container hosting one application process on one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub app: AppId,
    pub formation: FormationId,
    pub node: NodeId,
    pub owner: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub num: u32,
    pub port: u16,
    pub status: String,
    #[serde(default)]
    pub created: u64,
}

impl Container {
    /// `web.3` style name.
    pub fn short_name(&self) -> String {
        format!("{}.{}", self.kind, self.num)
    }
}

// ── Build / Config / Release ──────────────────────────────────────

/// A software build used by runtime nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub app: AppId,
    pub owner: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub output: String,
    pub image: String,
    #[serde(default)]
    pub procfile: BTreeMap<String, String>,
    #[serde(default)]
    pub dockerfile: String,
    /// Config values suggested by the build (merged into the app config
    /// for keys the app has not set).
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    pub url: Option<String>,
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub created: u64,
}

impl Build {
    /// An empty build for a freshly created app.
    pub fn initial(app: &str, owner: &str) -> Self {
        Self {
            app: app.to_string(),
            owner: owner.to_string(),
            sha: String::new(),
            output: String::new(),
            image: DEFAULT_BUILD_IMAGE.to_string(),
            procfile: BTreeMap::new(),
            dockerfile: String::new(),
            config: BTreeMap::new(),
            url: None,
            size: None,
            checksum: String::new(),
            created: 0,
        }
    }
}

/// Configuration values applied as environment variables at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: AppId,
    pub owner: String,
    pub version: u32,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub created: u64,
}

/// A release pins one config version and one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub app: AppId,
    pub owner: String,
    pub version: u32,
    #[serde(default)]
    pub summary: String,
    pub config_version: u32,
    /// `created` sequence of the pinned build.
    pub build: Option<u64>,
    #[serde(default)]
    pub created: u64,
}

// ── User / Service ────────────────────────────────────────────────

/// A platform user and their named SSH public keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    #[serde(default)]
    pub created: u64,
}

/// A backing service instance attached to an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: String,
    pub app: AppId,
    pub owner: String,
    /// Service driver key, e.g. `mock`.
    pub kind: String,
    pub plan: String,
    pub uri: Option<String>,
    #[serde(default)]
    pub created: u64,
}

// ── Table keys ────────────────────────────────────────────────────

impl Provider {
    pub fn table_key(&self) -> String {
        owner_key(&self.owner, &self.id)
    }
}

impl Flavor {
    pub fn table_key(&self) -> String {
        owner_key(&self.owner, &self.id)
    }
}

impl Layer {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.formation, self.id)
    }
}

impl Node {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.formation, self.id)
    }
}

impl Container {
    pub fn table_key(&self) -> String {
        container_key(&self.app, &self.kind, self.num)
    }
}

impl Build {
    pub fn table_key(&self) -> String {
        format!("{}/{:020}", self.app, self.created)
    }
}

impl Config {
    pub fn table_key(&self) -> String {
        format!("{}/{:010}", self.app, self.version)
    }
}

impl Release {
    pub fn table_key(&self) -> String {
        format!("{}/{:010}", self.app, self.version)
    }
}

impl Service {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.app, self.name)
    }
}

/// Key for owner-scoped records (providers, flavors).
pub fn owner_key(owner: &str, id: &str) -> String {
    format!("{owner}/{id}")
}

/// Key for a container record.
pub fn container_key(app: &str, kind: &str, num: u32) -> String {
    format!("{app}/{kind}.{num:010}")
}
