//! Orchestration and HTTP surface for graphmend.
//!
//! A debugging session is driven by the [`Controller`](controller::Controller)
//! state machine: it retrieves context, asks an external generator for a
//! fix, has an external validator check it, and refines until a fix passes
//! or the iteration budget runs out. [`DebugService`](service::DebugService)
//! runs sessions concurrently; the axum router exposes them together with
//! graph ingestion and memory maintenance.

pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod http_collaborators;
pub mod router;
pub mod schema;
pub mod service;
pub mod state;
