//! Steward ingress: the HTTP + WebSocket surface over the execution core.
//!
//! `boot` assembles the runtime (storage, policy lock, engines, workers),
//! `http` builds the axum router, `ws` carries the task/event channel,
//! `logs` tees tracing output into the API, and `main.rs` owns the serve
//! loop and exit codes.

pub mod boot;
pub mod config;
pub mod http;
pub mod logs;
pub mod metrics;
pub mod skills;
pub mod state;
pub mod ws;

pub use boot::build_runtime;
pub use config::RuntimeConfig;
pub use http::app;
pub use state::{AppState, SharedState};
