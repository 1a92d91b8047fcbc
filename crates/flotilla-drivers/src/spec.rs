//! Flattened, self-contained descriptions handed to drivers.
//!
//! A spec carries everything a driver needs (credentials, flavor params,
//! SSH settings) so drivers never reach back into the record store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A layer as a provider sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub formation: String,
    pub provider_type: String,
    #[serde(default)]
    pub creds: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub runtime: bool,
    pub proxy: bool,
    pub ssh_username: String,
    pub ssh_public_key: String,
    pub ssh_private_key: String,
    pub ssh_port: u16,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// A node with its layer's settings folded in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub formation: String,
    pub layer: String,
    pub provider_type: String,
    #[serde(default)]
    pub creds: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub runtime: bool,
    pub proxy: bool,
    pub ssh_username: String,
    pub ssh_public_key: String,
    pub ssh_private_key: String,
    pub ssh_port: u16,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    pub provider_id: Option<String>,
    pub fqdn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormationSpec {
    pub id: String,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSpec {
    pub id: String,
    pub formation: String,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSpec {
    pub username: String,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub app: String,
    pub kind: String,
    pub plan: String,
}
