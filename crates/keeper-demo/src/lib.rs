//! Keeper Demo - competing clients over one distributed lock
//!
//! Reproduces the classic lock exercise: several clients, each with its own
//! coordination session, take turns on a resource that detects concurrent
//! use.

pub mod config;
pub mod logging;
pub mod operator;
pub mod resource;
pub mod scenario;

pub use config::{Cli, DemoConfig};
pub use operator::{LockOperator, RoundOutcome};
pub use resource::{LimitedResource, ResourceError};
pub use scenario::{ScenarioReport, run, run_on};
