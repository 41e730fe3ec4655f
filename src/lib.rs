//! taskqd: a distributed task queue.
//!
//! Clients submit shell commands with a future execution time over
//! HTTP. A coordinator scans for due tasks, claims each under an
//! exclusive time-bounded lease, executes it, and reclaims or
//! permanently fails tasks whose lease holder goes silent.

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod types;
