//! HTTP handler modules for the graphmend API.
//!
//! Handlers parse requests, delegate to the service, stores or memory held
//! in [`AppState`](crate::state::AppState), and return JSON responses.

pub mod graph;
pub mod memory;
pub mod sessions;
