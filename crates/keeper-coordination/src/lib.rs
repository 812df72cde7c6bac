//! Keeper Coordination - client contract for a hierarchical coordination service
//!
//! This crate provides:
//! - The `CoordinationClient` trait: node create/delete/exists and child watches
//! - Node metadata (`Stat`), creation modes and child notifications
//! - ZooKeeper-style path validation and derivation
//! - `MemoryEnsemble`, an in-process service with sessions, ephemeral nodes
//!   and fault injection

pub mod client;
pub mod error;
pub mod memory;
pub mod model;
pub mod path;

pub use client::{ChildEventStream, CoordinationClient};
pub use error::CoordinationError;
pub use memory::{MemoryEnsemble, MemorySession, SessionStatus};
pub use model::{ChildEvent, CreateMode, Stat};
