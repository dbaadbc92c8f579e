//! Storage abstraction for graphmend.
//!
//! Provides the [`GraphStore`] trait (the Code Graph Store access contract)
//! and the [`PatternStore`] trait (persistence for the debug memory), plus
//! the [`InMemoryStore`] and [`SqliteStore`] backends implementing both.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: SizeEstimate and edge-weight update records
//! - [`traits`]: GraphStore and PatternStore trait definitions
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQL migrations and connection setup
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{GraphStore, PatternStore};
pub use types::{SizeEstimate, WeightUpdate};
