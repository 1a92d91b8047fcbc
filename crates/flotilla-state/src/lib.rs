//! flotilla-state — record store for the Flotilla control plane.
//!
//! Backed by [redb](https://docs.rs/redb). Holds formations, layers,
//! nodes, apps, containers, builds, configs, releases and the supporting
//! provider/flavor/user/service records.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Child records use composite keys (`{formation}/{layer}`,
//! `{app}/{type}.{num}`) so related records are found by prefix scan.
//!
//! Every insert draws a creation sequence from the `meta` table inside
//! the same write transaction. Container numbers, container ports and
//! node numbers are allocated the same way, so concurrent callers never
//! see duplicates: redb admits one writer at a time.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ContainerChanges, NewContainer, StateStore};
pub use types::*;
