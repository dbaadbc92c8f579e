//! Persistent debug memory.
//!
//! [`DebugMemory`] links bug signatures to the fixes that resolved them and
//! feeds outcomes back into the code graph: edges on a winning context are
//! strengthened, edges on a failed one weakened, and everything decays
//! while unused.
//!
//! One instance is constructed per repository scope and shared by
//! reference between sessions; it owns no global state.

pub mod config;
pub mod decay;
pub mod error;
pub mod memory;

pub use config::MemoryConfig;
pub use decay::DecayReport;
pub use error::MemoryError;
pub use memory::{AppliedFix, DebugMemory, PatternMatch, ReinforcementSummary};
