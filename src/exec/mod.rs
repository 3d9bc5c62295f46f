// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for running one external program per job with
//! `tokio::process::Command`, speaking the line-delimited JSON protocol with
//! it and reporting progress back through [`ExecutionEvent`]s.
//!
//! - [`supervisor`] owns the per-job process loop.
//! - [`request`] turns a queued job into the concrete run parameters.
//! - [`executable`] resolves the configured program before spawning.
//! - [`terminate`] implements SIGTERM-then-SIGKILL termination.
//! - [`backend`] provides the `ExecutionBackend` trait the consumer uses,
//!   which tests can replace with a fake implementation.

pub mod backend;
pub mod executable;
pub mod request;
pub mod supervisor;
pub mod terminate;

pub use backend::{ExecutionBackend, ExecutionEvent};
pub use executable::resolve_executable;
pub use request::{ExecutionDefaults, ExecutionRequest};
pub use supervisor::Supervisor;
pub use terminate::{Termination, terminate};
