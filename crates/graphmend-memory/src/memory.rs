//! Pattern matching, outcome recording and edge reinforcement.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use graphmend_core::{
    BugPattern, BugSignature, DebugQuery, EdgeAdjustment, EdgeKey, FixTemplate, NodeId,
    ReinforcementRecord,
};
use graphmend_retrieval::{HistoricalHint, PatternHints};
use graphmend_storage::{GraphStore, PatternStore, StorageError, WeightUpdate};

use crate::config::MemoryConfig;
use crate::error::MemoryError;

/// The fix a session applied, as recorded in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFix {
    pub approach: String,
    pub transformation_ref: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// A stored pattern ranked against a query signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: BugPattern,
    pub similarity: f32,
    /// similarity × success rate.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReinforcementSummary {
    /// Edges whose weight was written, with the stored weight.
    pub updated: Vec<(EdgeKey, f32)>,
    /// Edges that no longer exist in the graph.
    pub missing: Vec<EdgeKey>,
}

pub struct DebugMemory {
    pub(crate) graph: Arc<dyn GraphStore>,
    pub(crate) patterns: Arc<dyn PatternStore>,
    pub(crate) config: MemoryConfig,
    /// One lock per signature digest; serialises read-modify-write of a
    /// pattern without blocking unrelated signatures.
    pub(crate) signature_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serialises every edge-weight read-modify-write (reinforcement and
    /// decay).
    pub(crate) weight_lock: Mutex<()>,
    /// Set while a decay pass runs.
    pub(crate) decay_running: AtomicBool,
}

impl DebugMemory {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        patterns: Arc<dyn PatternStore>,
        config: MemoryConfig,
    ) -> Result<Self, MemoryError> {
        config.validate()?;
        Ok(DebugMemory {
            graph,
            patterns,
            config,
            signature_locks: DashMap::new(),
            weight_lock: Mutex::new(()),
            decay_running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Runs `f` while holding the lock for `digest`.
    ///
    /// The lock entry is dropped again once no other caller holds or waits
    /// on it, so the map only tracks signatures with writes in flight.
    pub(crate) fn with_signature_lock<T>(&self, digest: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .signature_locks
            .entry(digest.to_string())
            .or_default()
            .clone();
        let out = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.signature_locks
            .remove_if(digest, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Stored patterns similar to `signature`, ordered by
    /// similarity × success rate descending. Ties go to the most recently
    /// used pattern, then to the smaller digest.
    pub fn match_patterns(&self, signature: &BugSignature) -> Result<Vec<PatternMatch>, MemoryError> {
        let mut matches = self.similar_patterns(signature)?;
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.pattern.last_used.cmp(&a.pattern.last_used))
                .then_with(|| a.pattern.digest().cmp(b.pattern.digest()))
        });
        matches.truncate(self.config.max_matches);
        Ok(matches)
    }

    fn similar_patterns(&self, signature: &BugSignature) -> Result<Vec<PatternMatch>, StorageError> {
        Ok(self
            .patterns
            .list_patterns()?
            .into_iter()
            .filter_map(|pattern| {
                let similarity = signature.similarity(&pattern.signature);
                (similarity >= self.config.min_match_similarity).then(|| PatternMatch {
                    score: similarity * pattern.success_rate,
                    similarity,
                    pattern,
                })
            })
            .collect())
    }

    /// Fix templates of the best matching patterns, best first, without
    /// duplicates.
    pub fn suggest_templates(
        &self,
        query: &DebugQuery,
        limit: usize,
    ) -> Result<Vec<FixTemplate>, MemoryError> {
        let Some(signature) = query.signature() else {
            return Ok(Vec::new());
        };
        let mut seen = BTreeSet::new();
        let mut templates = Vec::new();
        for m in self.match_patterns(&signature)? {
            for template in m.pattern.fix_templates {
                if templates.len() >= limit {
                    return Ok(templates);
                }
                if seen.insert(template.id.clone()) {
                    templates.push(template);
                }
            }
        }
        Ok(templates)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Records one session outcome against the query's signature.
    ///
    /// Creates or updates exactly one pattern and always increments its
    /// occurrence count. On success with a fix, the matching template is
    /// created or reinforced. Calls for the same signature are serialised.
    pub fn record_outcome(
        &self,
        query: &DebugQuery,
        context_used: &[NodeId],
        fix_applied: Option<&AppliedFix>,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<BugPattern, MemoryError> {
        let signature = query.signature().ok_or(MemoryError::InvalidSignature)?;
        let digest = signature.digest.clone();
        self.with_signature_lock(&digest, || {
            self.update_pattern(signature, context_used, fix_applied, success, now)
        })
    }

    /// Read-modify-write of one pattern. Callers hold its signature lock.
    fn update_pattern(
        &self,
        signature: BugSignature,
        context_used: &[NodeId],
        fix_applied: Option<&AppliedFix>,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<BugPattern, MemoryError> {
        let mut pattern = self
            .patterns
            .get_pattern(&signature.digest)?
            .unwrap_or_else(|| BugPattern::new(signature, now));

        pattern.occurrences += 1;
        if success {
            pattern.successes += 1;
        }
        let outcome = if success { 1.0 } else { 0.0 };
        let alpha = (1.0 / pattern.occurrences as f32).max(self.config.rolling_alpha);
        pattern.success_rate =
            (pattern.success_rate + alpha * (outcome - pattern.success_rate)).clamp(0.0, 1.0);
        pattern.last_used = now;
        pattern.last_context = context_used.to_vec();

        if let (true, Some(fix)) = (success, fix_applied) {
            let id = FixTemplate::id_for(&fix.approach);
            match pattern.fix_templates.iter_mut().find(|t| t.id == id) {
                Some(template) => {
                    template.uses += 1;
                    template.last_used = now;
                    template.transformation_ref = fix.transformation_ref.clone();
                    template.files = fix.files.clone();
                }
                None => pattern.fix_templates.push(FixTemplate {
                    id,
                    approach: fix.approach.clone(),
                    transformation_ref: fix.transformation_ref.clone(),
                    files: fix.files.clone(),
                    reusability: 0.0,
                    uses: 1,
                    last_used: now,
                }),
            }
        }

        let occurrences = pattern.occurrences as f32;
        for template in &mut pattern.fix_templates {
            template.reusability = (template.uses as f32 / occurrences).min(1.0);
        }
        pattern.fix_templates.sort_by(|a, b| {
            b.reusability
                .total_cmp(&a.reusability)
                .then_with(|| b.last_used.cmp(&a.last_used))
                .then_with(|| a.id.cmp(&b.id))
        });
        pattern.fix_templates.truncate(self.config.max_templates);

        self.patterns.put_pattern(&pattern)?;
        tracing::debug!(
            digest = %pattern.digest(),
            occurrences = pattern.occurrences,
            success_rate = pattern.success_rate,
            success,
            "recorded outcome"
        );
        Ok(pattern)
    }

    /// Multiplies each used edge's weight by the success or failure factor,
    /// clamped to [0, 1], and appends the adjustment to its history.
    ///
    /// Each edge is adjusted once per call even if listed repeatedly.
    /// Edges that have disappeared from the graph are reported, not fatal.
    pub fn reinforce_edges(
        &self,
        edges_used: &[EdgeKey],
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<ReinforcementSummary, MemoryError> {
        let factor = if success {
            self.config.success_factor
        } else {
            self.config.failure_factor
        };
        let unique: BTreeSet<&EdgeKey> = edges_used.iter().collect();

        let _weights = self.weight_lock.lock();
        let mut summary = ReinforcementSummary::default();
        let mut updates = Vec::with_capacity(unique.len());
        for key in unique {
            match self.graph.get_edge(key) {
                Ok(edge) => updates.push(WeightUpdate {
                    key: key.clone(),
                    weight: edge.weight * factor,
                    reinforced_at: Some(now),
                }),
                Err(err) if err.is_not_found() => {
                    tracing::warn!(edge = %key, "reinforcing an edge that no longer exists");
                    summary.missing.push(key.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }

        let stored = self.graph.set_edge_weights(&updates)?;
        for (update, weight_after) in updates.into_iter().zip(stored) {
            self.append_adjustment(&update.key, now, factor, weight_after)?;
            summary.updated.push((update.key, weight_after));
        }
        Ok(summary)
    }

    pub(crate) fn append_adjustment(
        &self,
        key: &EdgeKey,
        at: DateTime<Utc>,
        factor: f32,
        weight_after: f32,
    ) -> Result<(), StorageError> {
        let mut record = self
            .patterns
            .get_reinforcement(key)?
            .unwrap_or_else(|| ReinforcementRecord::new(key.clone()));
        record.push(EdgeAdjustment {
            at,
            factor,
            weight_after,
        });
        self.patterns.put_reinforcement(&record)
    }
}

impl PatternHints for DebugMemory {
    /// The most similar stored pattern, regardless of its success rate.
    fn closest_pattern(&self, query: &DebugQuery) -> Result<Option<HistoricalHint>, StorageError> {
        let Some(signature) = query.signature() else {
            return Ok(None);
        };
        let closest = self.similar_patterns(&signature)?.into_iter().max_by(|a, b| {
            a.similarity
                .total_cmp(&b.similarity)
                .then_with(|| a.pattern.last_used.cmp(&b.pattern.last_used))
                .then_with(|| b.pattern.digest().cmp(a.pattern.digest()))
        });
        Ok(closest.map(|m| HistoricalHint {
            digest: m.pattern.digest().to_string(),
            similarity: m.similarity,
            success_rate: m.pattern.success_rate,
            max_files_touched: m.pattern.max_files_touched(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use graphmend_core::{Edge, EdgeType, Embedding, GraphSnapshot, Node, NodeKind};
    use graphmend_storage::InMemoryStore;

    fn memory_with_graph() -> (Arc<InMemoryStore>, DebugMemory) {
        let store = Arc::new(InMemoryStore::new());
        store
            .import_snapshot(GraphSnapshot {
                nodes: ["a", "b", "c"]
                    .into_iter()
                    .map(|id| Node::new(id, NodeKind::Function, id, Embedding::new(vec![1.0])))
                    .collect(),
                edges: vec![
                    Edge::new("a", "b", EdgeType::DependsOn, 0.95).unwrap(),
                    Edge::new("b", "c", EdgeType::TestedBy, 0.5).unwrap(),
                ],
            })
            .unwrap();
        let memory = DebugMemory::new(store.clone(), store.clone(), MemoryConfig::default()).unwrap();
        (store, memory)
    }

    fn fix(approach: &str, files: &[&str]) -> AppliedFix {
        AppliedFix {
            approach: approach.into(),
            transformation_ref: format!("patch:{approach}"),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn empty_query_is_invalid_signature() {
        let (_, memory) = memory_with_graph();
        let err = memory
            .record_outcome(&DebugQuery::new("   "), &[], None, true, Utc::now())
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidSignature));
        assert!(err.is_recoverable());
    }

    #[test]
    fn record_outcome_updates_one_pattern() {
        let (store, memory) = memory_with_graph();
        let query = DebugQuery::new("KeyError: 'user_id' in session lookup");
        let now = Utc::now();

        let p = memory
            .record_outcome(&query, &["a".into()], Some(&fix("guard missing key", &["src/a.rs"])), true, now)
            .unwrap();
        assert_eq!(p.occurrences, 1);
        assert_eq!(p.success_rate, 1.0);
        assert_eq!(p.fix_templates.len(), 1);
        assert_eq!(p.fix_templates[0].reusability, 1.0);

        let p = memory
            .record_outcome(&query, &["a".into()], Some(&fix("retry lookup", &[])), false, now)
            .unwrap();
        assert_eq!(p.occurrences, 2);
        assert_eq!(p.successes, 1);
        assert!((p.success_rate - 0.5).abs() < 1e-6);
        // Failures never create templates, but dilute reusability.
        assert_eq!(p.fix_templates.len(), 1);
        assert!((p.fix_templates[0].reusability - 0.5).abs() < 1e-6);

        assert_eq!(store.list_patterns().unwrap().len(), 1);
    }

    #[test]
    fn rolling_rate_uses_exponential_window_after_warmup() {
        let (_, memory) = memory_with_graph();
        let query = DebugQuery::new("segfault in allocator");
        let now = Utc::now();
        for _ in 0..20 {
            memory.record_outcome(&query, &[], None, true, now).unwrap();
        }
        let p = memory.record_outcome(&query, &[], None, false, now).unwrap();
        // alpha = max(1/21, 0.1) = 0.1
        assert!((p.success_rate - 0.9).abs() < 1e-5);
    }

    #[test]
    fn repeated_template_gains_reusability() {
        let (_, memory) = memory_with_graph();
        let query = DebugQuery::new("connection refused on port 5432");
        let now = Utc::now();
        memory
            .record_outcome(&query, &[], Some(&fix("Restart pool", &[])), true, now)
            .unwrap();
        memory
            .record_outcome(&query, &[], Some(&fix("bump timeout", &[])), true, now)
            .unwrap();
        let p = memory
            .record_outcome(&query, &[], Some(&fix("restart  pool", &[])), true, now + Duration::seconds(1))
            .unwrap();
        assert_eq!(p.fix_templates.len(), 2);
        assert_eq!(p.fix_templates[0].approach, "Restart pool");
        assert_eq!(p.fix_templates[0].uses, 2);
    }

    #[test]
    fn concurrent_outcomes_for_one_signature_are_not_lost() {
        let (_, memory) = memory_with_graph();
        let memory = Arc::new(memory);
        let query = DebugQuery::new("TimeoutError while fetching manifest");
        std::thread::scope(|scope| {
            for _ in 0..100 {
                let memory = memory.clone();
                let query = query.clone();
                scope.spawn(move || {
                    memory
                        .record_outcome(&query, &[], None, true, Utc::now())
                        .unwrap();
                });
            }
        });
        let sig = query.signature().unwrap();
        let matches = memory.match_patterns(&sig).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern.occurrences, 100);
        assert_eq!(matches[0].pattern.successes, 100);
        // Locks are released once no writer needs them.
        assert!(memory.signature_locks.is_empty());
    }

    #[test]
    fn matches_ordered_by_score_then_recency() {
        let (store, memory) = memory_with_graph();
        let now = Utc::now();
        let base = BugSignature::from_text("IndexError list index out of range").unwrap();

        let mut strong = BugPattern::new(base.clone(), now);
        strong.success_rate = 0.9;
        store.put_pattern(&strong).unwrap();

        // Same token overlap and rate: ordered by recency.
        let mut older = BugPattern::new(
            BugSignature::from_text("IndexError list index out of range parser").unwrap(),
            now - Duration::days(2),
        );
        older.success_rate = 0.5;
        let mut newer = BugPattern::new(
            BugSignature::from_text("IndexError list index out of range lexer").unwrap(),
            now,
        );
        newer.success_rate = 0.5;
        store.put_pattern(&older).unwrap();
        store.put_pattern(&newer).unwrap();

        let unrelated = BugPattern::new(BugSignature::from_text("disk quota exceeded").unwrap(), now);
        store.put_pattern(&unrelated).unwrap();

        let ranked: Vec<String> = memory
            .match_patterns(&base)
            .unwrap()
            .into_iter()
            .map(|m| m.pattern.digest().to_string())
            .collect();
        assert_eq!(
            ranked,
            vec![
                strong.digest().to_string(),
                newer.digest().to_string(),
                older.digest().to_string()
            ]
        );
    }

    #[test]
    fn reinforcement_is_clamped_and_logged() {
        let (store, memory) = memory_with_graph();
        let ab = EdgeKey::new("a", "b", EdgeType::DependsOn);
        let bc = EdgeKey::new("b", "c", EdgeType::TestedBy);
        let gone = EdgeKey::new("c", "a", EdgeType::Documents);

        let summary = memory
            .reinforce_edges(&[ab.clone(), bc.clone(), ab.clone(), gone.clone()], true, Utc::now())
            .unwrap();
        assert_eq!(summary.missing, vec![gone]);
        assert_eq!(store.get_edge(&ab).unwrap().weight, 1.0);
        assert!((store.get_edge(&bc).unwrap().weight - 0.55).abs() < 1e-6);

        memory.reinforce_edges(&[bc.clone()], false, Utc::now()).unwrap();
        assert!((store.get_edge(&bc).unwrap().weight - 0.495).abs() < 1e-6);

        let history = store.get_reinforcement(&bc).unwrap().unwrap();
        assert_eq!(history.history.len(), 2);
        assert_eq!(history.latest().unwrap().factor, 0.9);
        assert_eq!(store.get_reinforcement(&ab).unwrap().unwrap().history.len(), 1);
    }

    #[test]
    fn closest_pattern_ignores_success_rate() {
        let (store, memory) = memory_with_graph();
        let now = Utc::now();
        let exact_text = "null pointer dereference in renderer";
        let mut exact = BugPattern::new(BugSignature::from_text(exact_text).unwrap(), now);
        exact.success_rate = 0.0;
        exact.fix_templates.push(FixTemplate {
            id: FixTemplate::id_for("x"),
            approach: "x".into(),
            transformation_ref: "x".into(),
            files: vec!["a".into(), "b".into(), "c".into()],
            reusability: 0.0,
            uses: 0,
            last_used: now,
        });
        store.put_pattern(&exact).unwrap();

        let hint = memory
            .closest_pattern(&DebugQuery::new(exact_text))
            .unwrap()
            .unwrap();
        assert_eq!(hint.similarity, 1.0);
        assert_eq!(hint.success_rate, 0.0);
        assert_eq!(hint.max_files_touched, 3);

        assert!(memory.closest_pattern(&DebugQuery::new("")).unwrap().is_none());
    }

    #[test]
    fn suggest_templates_dedupes() {
        let (_, memory) = memory_with_graph();
        let query = DebugQuery::new("OutOfMemoryError in image cache");
        let now = Utc::now();
        memory
            .record_outcome(&query, &[], Some(&fix("evict eagerly", &[])), true, now)
            .unwrap();
        memory
            .record_outcome(&query, &[], Some(&fix("shrink buffers", &[])), true, now)
            .unwrap();
        let templates = memory.suggest_templates(&query, 1).unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(memory.suggest_templates(&query, 10).unwrap().len(), 2);
    }
}
