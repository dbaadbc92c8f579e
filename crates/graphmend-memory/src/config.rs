use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Weight multiplier for edges in a winning context.
    pub success_factor: f32,
    /// Weight multiplier for edges in a failed context.
    pub failure_factor: f32,
    /// Per-day retention applied by decay: `weight *= decay_per_day ^ days`.
    pub decay_per_day: f64,
    /// Patterns unused for longer than this many days are prune candidates.
    pub prune_age_days: i64,
    /// Prune candidates below this success rate are removed.
    pub prune_success_threshold: f32,
    /// Floor of the rolling success-rate step size.
    pub rolling_alpha: f32,
    /// Minimum signature similarity for a pattern to match.
    pub min_match_similarity: f32,
    pub max_matches: usize,
    /// Fix templates kept per pattern.
    pub max_templates: usize,
    /// Period of the scheduled decay task, in seconds.
    pub decay_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            success_factor: 1.1,
            failure_factor: 0.9,
            decay_per_day: 0.99,
            prune_age_days: 365,
            prune_success_threshold: 0.3,
            rolling_alpha: 0.1,
            min_match_similarity: 0.3,
            max_matches: 5,
            max_templates: 8,
            decay_interval_secs: 3600,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), MemoryError> {
        let bad = |msg: String| Err(MemoryError::InvalidConfig(msg));
        if !(self.success_factor >= 1.0) {
            return bad(format!("success_factor must be >= 1, got {}", self.success_factor));
        }
        if !(0.0..=1.0).contains(&self.failure_factor) {
            return bad(format!("failure_factor must be in [0, 1], got {}", self.failure_factor));
        }
        if !(self.decay_per_day > 0.0 && self.decay_per_day <= 1.0) {
            return bad(format!("decay_per_day must be in (0, 1], got {}", self.decay_per_day));
        }
        for (name, value) in [
            ("prune_success_threshold", self.prune_success_threshold),
            ("rolling_alpha", self.rolling_alpha),
            ("min_match_similarity", self.min_match_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return bad(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if self.prune_age_days < 0 {
            return bad("prune_age_days must not be negative".into());
        }
        if self.max_templates == 0 || self.max_matches == 0 {
            return bad("max_templates and max_matches must be positive".into());
        }
        if self.decay_interval_secs == 0 {
            return bad("decay_interval_secs must be positive".into());
        }
        Ok(())
    }
}
