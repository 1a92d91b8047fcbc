//! flotilla-drivers — the pluggable edges of the Flotilla control plane.
//!
//! Three driver families sit behind `Send + Sync` traits:
//!
//! - **Provider** ([`ProviderDriver`]) — builds and destroys layers and
//!   nodes on some infrastructure. Ships `mock` and `static`.
//! - **Configuration management** ([`ConfigManager`]) — bootstraps,
//!   converges and runs commands on nodes and receives published
//!   databags. Ships `mock` and `directory`.
//! - **Service** ([`ServiceDriver`]) — provisions backing services for
//!   apps. Ships `mock`.
//!
//! Drivers never see record store types. They receive flattened,
//! self-contained specs ([`spec`]) and are looked up by type key in a
//! [`DriverRegistry`] built once at startup.

pub mod cm;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod provider;
pub mod registry;
pub mod service;
pub mod spec;

pub use cm::{CmCall, CommandOutput, ConfigManager, MockConfigManager};
pub use credentials::{SshKeyPair, generate_ssh_keypair};
pub use directory::{DirectoryConfigManager, DirectorySettings};
pub use error::{DriverError, DriverResult};
pub use provider::{FlavorSeed, MockProvider, ProviderDriver, ProvisionedNode, StaticProvider};
pub use registry::DriverRegistry;
pub use service::{MockService, ServiceDescription, ServiceDriver};
pub use spec::{AppSpec, FormationSpec, LayerSpec, NodeSpec, ServiceSpec, UserSpec};
