//! Adaptive graph-guided retrieval.
//!
//! Given a [`DebugQuery`](graphmend_core::DebugQuery), the [`AgrEngine`]
//! picks seed artifacts (explicit anchors plus embedding matches), estimates
//! how deep to search from the query's complexity, and expands the code
//! graph hop by hop until the [`ConfidenceScorer`] is satisfied, the hop
//! stops paying for itself, or a budget runs out.
//!
//! # Modules
//!
//! - [`config`]: tunable thresholds and weights
//! - [`complexity`]: query complexity score and the depth strategy
//! - [`scorer`]: the pure confidence function
//! - [`engine`]: seed selection and iterative expansion
//! - [`error`]: RetrievalError

pub mod complexity;
pub mod config;
pub mod engine;
pub mod error;
pub mod scorer;

pub use complexity::{complexity_score, initial_depth, ComplexitySignals, DepthPlan};
pub use config::{ComplexityWeights, RetrievalConfig, ScorerWeights};
pub use engine::{
    AgrEngine, ContextEntry, HistoricalHint, HopReport, PatternHints, RetrievalHints,
    RetrievalOutcome, TerminationReason,
};
pub use error::RetrievalError;
pub use scorer::{ConfidenceBreakdown, ConfidenceScorer, ContextMember};
