//! flotilla-orchestrator — the Flotilla control plane.
//!
//! The [`Controller`] owns the record store, the driver registry, the CM
//! backend and the task executor, and exposes every control-plane
//! operation as an async method:
//!
//! - **formations**: create, publish, converge, destroy, databag
//! - **layers / nodes**: create, build, destroy, scale, converge, run
//! - **containers**: scale an app, balance a formation
//! - **apps**: create, push, config, run, logs, destroy
//! - **users / services**: seed, keys, attach and detach services
//!
//! Every mutation that changes a databag is followed by an explicit
//! publish to the CM backend.

mod apps;
mod containers;
pub mod controller;
mod databag;
pub mod error;
pub mod events;
mod formation;
mod layers;
mod nodes;
mod release;
mod services;
mod specs;
mod tasks;
mod users;

pub use apps::PushRequest;
pub use controller::{Controller, LogSettings};
pub use error::{OrchestratorError, OrchestratorResult};
pub use events::log_event;
pub use layers::LayerRequest;
