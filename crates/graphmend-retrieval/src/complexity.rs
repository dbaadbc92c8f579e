//! Query complexity and the depth strategy.
//!
//! [`complexity_score`] combines normalised sub-signals into a score in
//! [0, 1]; [`initial_depth`] maps that score to a traversal depth through a
//! fixed step table. Both are pure.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use graphmend_core::DebugQuery;

use crate::config::{ComplexityWeights, HARD_MAX_HOPS};

/// Token count at which the length signal saturates.
const LENGTH_SATURATION: f32 = 80.0;
/// Distinct error signals at which the error signal saturates.
const ERROR_SIGNAL_SATURATION: f32 = 3.0;
/// Files touched by a prior fix at which the history signal saturates.
const MULTI_FILE_SATURATION: f32 = 4.0;

const ERROR_MARKERS: &[&str] = &[
    "error",
    "exception",
    "panic",
    "panicked",
    "traceback",
    "segfault",
    "overflow",
    "timeout",
    "deadlock",
    "assertion",
    "undefined",
    "null",
    "nil",
    "abort",
    "fatal",
    "failed",
];

/// Normalised complexity sub-signals, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComplexitySignals {
    pub length: f32,
    pub technicality: f32,
    pub error_signals: f32,
    pub multi_file_history: f32,
}

impl ComplexitySignals {
    /// Extracts signals from the query text and the number of files the
    /// closest historical fix touched (0 when memory has no match).
    pub fn from_query(query: &DebugQuery, historical_files: usize) -> Self {
        let text = query.full_text();
        let words: Vec<&str> = text.split_whitespace().collect();

        let length = (words.len() as f32 / LENGTH_SATURATION).min(1.0);

        let technical = words.iter().filter(|w| is_technical(w)).count();
        let technicality = if words.is_empty() {
            0.0
        } else {
            // A third of technical words already reads as a very technical report.
            (technical as f32 / words.len() as f32 * 3.0).min(1.0)
        };

        let error_signals =
            (distinct_error_signals(&text).len() as f32 / ERROR_SIGNAL_SATURATION).min(1.0);

        let multi_file_history = if historical_files <= 1 {
            0.0
        } else {
            ((historical_files - 1) as f32 / (MULTI_FILE_SATURATION - 1.0)).min(1.0)
        };

        ComplexitySignals {
            length,
            technicality,
            error_signals,
            multi_file_history,
        }
    }
}

/// Identifier-like words: paths, qualified names, call syntax, snake_case,
/// camelCase, or alphanumerics mixing letters and digits.
fn is_technical(word: &str) -> bool {
    let word = word.trim_matches(|c: char| matches!(c, ',' | ';' | '\'' | '"' | '`'));
    if word.len() < 2 {
        return false;
    }
    if word.contains("::")
        || word.contains("()")
        || word.contains('_')
        || word.contains('/')
        || word.contains("->")
    {
        return true;
    }
    let has_digit = word.chars().any(|c| c.is_ascii_digit());
    let has_alpha = word.chars().any(|c| c.is_ascii_alphabetic());
    let inner_upper = word.chars().skip(1).any(|c| c.is_ascii_uppercase())
        && word.chars().any(|c| c.is_ascii_lowercase());
    (has_digit && has_alpha) || inner_upper
}

/// Distinct error kinds mentioned in the text: words such as
/// `NullPointerException` or `TypeError`, plus generic markers.
fn distinct_error_signals(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .filter_map(|w| {
            let lower = w.to_lowercase();
            let named = lower.len() > "error".len()
                && (lower.ends_with("error") || lower.ends_with("exception"));
            if named || ERROR_MARKERS.contains(&lower.as_str()) {
                Some(lower)
            } else {
                None
            }
        })
        .collect()
}

/// Weighted mean of the sub-signals, in [0, 1].
pub fn complexity_score(signals: &ComplexitySignals, weights: &ComplexityWeights) -> f32 {
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let sum = signals.length * weights.length
        + signals.technicality * weights.technicality
        + signals.error_signals * weights.error_signals
        + signals.multi_file_history * weights.multi_file_history;
    (sum / total).clamp(0.0, 1.0)
}

/// Depth chosen for a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthPlan {
    /// Target depth.
    pub initial_k: usize,
    /// Depth the traversal may grow to while confidence keeps improving.
    pub k_max: usize,
}

impl DepthPlan {
    /// Widens both bounds by `extra` hops, never past `cap`.
    pub fn widened(self, extra: usize, cap: usize) -> Self {
        let cap = cap.min(HARD_MAX_HOPS);
        DepthPlan {
            initial_k: (self.initial_k + extra).min(cap),
            k_max: (self.k_max + extra).min(cap),
        }
    }
}

/// (upper bound exclusive, initial k, k max). Scores at or above the last
/// bound use [`ADAPTIVE_BAND`].
const DEPTH_BANDS: [(f32, usize, usize); 3] = [(0.3, 1, 1), (0.6, 2, 2), (0.8, 3, 3)];
const ADAPTIVE_BAND: DepthPlan = DepthPlan {
    initial_k: 3,
    k_max: HARD_MAX_HOPS,
};

/// Maps a complexity score to a depth plan. Monotonic in `score`.
pub fn initial_depth(score: f32) -> DepthPlan {
    DEPTH_BANDS
        .iter()
        .find(|(bound, _, _)| score < *bound)
        .map(|&(_, initial_k, k_max)| DepthPlan { initial_k, k_max })
        .unwrap_or(ADAPTIVE_BAND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_table() {
        let cases = [
            (0.0, 1, 1),
            (0.2, 1, 1),
            (0.3, 2, 2),
            (0.59, 2, 2),
            (0.6, 3, 3),
            (0.79, 3, 3),
            (0.8, 3, 5),
            (1.0, 3, 5),
        ];
        for (score, initial_k, k_max) in cases {
            assert_eq!(
                initial_depth(score),
                DepthPlan { initial_k, k_max },
                "score {score}"
            );
        }
    }

    #[test]
    fn depth_is_monotonic() {
        let mut previous = initial_depth(0.0);
        for step in 1..=100 {
            let plan = initial_depth(step as f32 / 100.0);
            assert!(plan.initial_k >= previous.initial_k);
            assert!(plan.k_max >= previous.k_max);
            previous = plan;
        }
    }

    #[test]
    fn widened_respects_hard_cap() {
        let plan = DepthPlan {
            initial_k: 3,
            k_max: 5,
        };
        assert_eq!(plan.widened(2, 5), DepthPlan { initial_k: 5, k_max: 5 });
        let plan = DepthPlan {
            initial_k: 1,
            k_max: 1,
        };
        assert_eq!(plan.widened(1, 5), DepthPlan { initial_k: 2, k_max: 2 });
    }

    #[test]
    fn short_plain_query_is_simple() {
        let query = DebugQuery::new("login button does nothing");
        let signals = ComplexitySignals::from_query(&query, 0);
        let score = complexity_score(&signals, &ComplexityWeights::default());
        assert!(score < 0.3, "score {score}");
    }

    #[test]
    fn technical_trace_with_history_is_complex() {
        let query = DebugQuery::new(
            "parse_config() panics with NullPointerException after TypeError in loader::init",
        )
        .with_error_trace("thread 'main' panicked at src/loader.rs:42: assertion failed; timeout");
        let signals = ComplexitySignals::from_query(&query, 5);
        assert_eq!(signals.multi_file_history, 1.0);
        assert_eq!(signals.error_signals, 1.0);
        assert!(signals.technicality > 0.5);
        let score = complexity_score(&signals, &ComplexityWeights::default());
        assert!(score >= 0.6, "score {score}");
    }

    #[test]
    fn error_signals_are_distinct() {
        let found = distinct_error_signals("TypeError TypeError typeerror: null null");
        assert_eq!(found.len(), 2);
    }
}
