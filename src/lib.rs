//! Shardline - a resumable, sharded gateway session core.
//!
//! This crate keeps a set of bot gateway sessions connected: it frames and
//! decodes envelopes, heartbeats, resumes dropped sessions, spaces identifies
//! across shards and hands every dispatch to registered listeners.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the listener registry.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the gateway, REST and config adapters.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "shardline";
