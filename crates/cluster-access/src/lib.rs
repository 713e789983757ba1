//! Cluster-Access: read-only cluster queries and command execution
//!
//! This crate is the boundary between the symptom collector and the outside
//! world. Nothing here knows about sessions or evidence; it only answers
//! "does this namespace exist", "which deployments are in it" and "run this
//! command line".
//!
//! ## Key Components
//!
//! - `ClusterClient`: namespace and deployment queries
//! - `KubectlClient`: `ClusterClient` implemented on top of `kubectl`
//! - `CommandExecutor` / `ProcessExecutor`: argv execution via `tokio::process`
//! - `fakes`: in-memory implementations for tests

mod client;
mod error;
pub mod exec;
pub mod fakes;
pub mod kubectl;

pub use client::{ClusterClient, ClusterResult, Deployment};
pub use error::{ClusterError, ExecError};
pub use exec::{CommandExecutor, CommandOutput, ExecResult, ProcessExecutor};
pub use kubectl::KubectlClient;
