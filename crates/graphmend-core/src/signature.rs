//! Bug signatures derived from the shape of a query or error trace.
//!
//! Two reports of the same bug rarely share exact text: line numbers,
//! addresses, ids and quoted values differ. The signature keeps only the
//! shape-bearing tokens (error class names, identifiers, verbs) so that
//! recurrences land on the same stored pattern, and compares signatures by
//! token-set overlap for fuzzy matches.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "but", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "so", "that", "the", "then", "this", "to", "was", "were",
    "when", "with",
];

/// Splits text into lowercase word tokens (alphanumerics and `_`).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Extracts the shape-bearing token set of an error text.
///
/// Quoted literals and path-like words are dropped before tokenising;
/// purely numeric, hex-like and stop-word tokens are dropped after.
pub fn error_shape_tokens(text: &str) -> BTreeSet<String> {
    let unquoted = strip_quoted(text);
    let mut tokens = BTreeSet::new();
    for word in unquoted.split_whitespace() {
        if word.contains('/') || word.contains('\\') {
            continue;
        }
        for token in tokenize(word) {
            if is_masked_literal(&token) || STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            tokens.insert(token);
        }
    }
    tokens
}

fn strip_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Option<char> = None;
    for c in text.chars() {
        match open {
            Some(q) if c == q => {
                open = None;
                out.push(' ');
            }
            Some(_) => {}
            None if c == '"' || c == '`' => open = Some(c),
            None => out.push(c),
        }
    }
    out
}

fn is_masked_literal(token: &str) -> bool {
    if token.chars().all(|c| c.is_ascii_digit() || c == '_') {
        return true;
    }
    if let Some(hex) = token.strip_prefix("0x") {
        return hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    token.len() >= 8
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && token.chars().any(|c| c.is_ascii_digit())
}

/// A normalised bug signature: a stable digest plus the token set it was
/// computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugSignature {
    /// blake3 hex digest of the sorted token set.
    pub digest: String,
    pub tokens: BTreeSet<String>,
}

impl BugSignature {
    /// Computes the signature of `text`. Returns `None` when no
    /// shape-bearing token survives normalisation.
    pub fn from_text(text: &str) -> Option<Self> {
        let tokens = error_shape_tokens(text);
        if tokens.is_empty() {
            return None;
        }
        Some(Self::from_tokens(tokens))
    }

    pub fn from_tokens(tokens: BTreeSet<String>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for token in &tokens {
            hasher.update(token.as_bytes());
            hasher.update(&[0]);
        }
        BugSignature {
            digest: hasher.finalize().to_hex().to_string(),
            tokens,
        }
    }

    /// Jaccard similarity of the two token sets, in [0, 1].
    pub fn similarity(&self, other: &BugSignature) -> f32 {
        if self.digest == other.digest {
            return 1.0;
        }
        let intersection = self.tokens.intersection(&other.tokens).count();
        let union = self.tokens.union(&other.tokens).count();
        if union == 0 {
            0.0
        } else {
            intersection as f32 / union as f32
        }
    }
}
