//! Shared types for the Coda agent server.
//!
//! This crate holds the plain data types that cross crate boundaries:
//! model configuration, workspace policy, and common identifiers. It has
//! no async or IO dependencies so every other crate can depend on it.

mod config;
mod policy;

pub use config::{ModelConfig, Provider};
pub use policy::{CommandApproval, WorkspacePolicy};

/// Identifier of a workspace row. Assigned by the relational store.
pub type WorkspaceId = String;

/// Identifier of a session row. Assigned by the relational store.
pub type SessionId = String;

/// Short identifier distinguishing the agent's deployment surface
/// (e.g. an editor variant). Partitions playbook and knowledge collections.
pub type ModuleId = String;
