//! SQLite implementation of [`GraphStore`] and [`PatternStore`].
//!
//! [`SqliteStore`] persists the code graph and the debug memory in one
//! database file, so both survive process restarts. Writes that touch more
//! than one row run inside a transaction. Embeddings and memory records
//! are stored as JSON TEXT columns via serde_json.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use graphmend_core::edge::validate_weight;
use graphmend_core::graph::sort_neighbors;
use graphmend_core::{
    clamp_weight, BugPattern, ContentRef, CoreError, Edge, EdgeKey, EdgeType,
    EdgeTypeSet, Embedding, Node, NodeId, NodeKind, ReinforcementRecord,
};

use crate::error::StorageError;
use crate::traits::{GraphStore, PatternStore};
use crate::types::{SizeEstimate, WeightUpdate};

const META_DIMENSION: &str = "embedding_dimension";
const META_LAST_DECAY: &str = "last_decay";

/// SQLite-backed store. The connection is serialised behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Raw column values of a node row, decoded outside the rusqlite closure.
struct NodeRow {
    id: String,
    kind: String,
    content_ref: String,
    last_modified: DateTime<Utc>,
    embedding_json: String,
}

impl NodeRow {
    fn decode(self) -> Result<Node, StorageError> {
        Ok(Node {
            id: NodeId(self.id),
            kind: NodeKind::from_str(&self.kind)?,
            content_ref: ContentRef(self.content_ref),
            last_modified: self.last_modified,
            embedding: serde_json::from_str::<Embedding>(&self.embedding_json)?,
        })
    }
}

struct EdgeRow {
    from_id: String,
    to_id: String,
    edge_type: String,
    weight: f64,
    last_reinforced: DateTime<Utc>,
}

impl EdgeRow {
    fn decode(self) -> Result<Edge, StorageError> {
        Ok(Edge {
            from: NodeId(self.from_id),
            to: NodeId(self.to_id),
            edge_type: EdgeType::from_str(&self.edge_type)?,
            weight: self.weight as f32,
            last_reinforced: self.last_reinforced,
        })
    }
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>, StorageError> {
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn node_exists(conn: &Connection, id: &str) -> Result<bool, StorageError> {
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    fn load_node(conn: &Connection, id: &str) -> Result<Option<Node>, StorageError> {
        let row = conn
            .query_row(
                "SELECT id, kind, content_ref, last_modified, embedding_json
                 FROM nodes WHERE id = ?1",
                params![id],
                |row| {
                    Ok(NodeRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        content_ref: row.get(2)?,
                        last_modified: row.get(3)?,
                        embedding_json: row.get(4)?,
                    })
                },
            )
            .optional()?;
        row.map(NodeRow::decode).transpose()
    }

    fn load_edge(conn: &Connection, key: &EdgeKey) -> Result<Option<Edge>, StorageError> {
        let row = conn
            .query_row(
                "SELECT from_id, to_id, edge_type, weight, last_reinforced
                 FROM edges WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
                params![key.from.as_str(), key.to.as_str(), key.edge_type.as_str()],
                |row| {
                    Ok(EdgeRow {
                        from_id: row.get(0)?,
                        to_id: row.get(1)?,
                        edge_type: row.get(2)?,
                        weight: row.get(3)?,
                        last_reinforced: row.get(4)?,
                    })
                },
            )
            .optional()?;
        row.map(EdgeRow::decode).transpose()
    }

    fn write_weight(
        tx: &Transaction<'_>,
        update: &WeightUpdate,
    ) -> Result<f32, StorageError> {
        let weight = clamp_weight(update.weight);
        let key = &update.key;
        let changed = match update.reinforced_at {
            Some(at) => tx.execute(
                "UPDATE edges SET weight = ?4, last_reinforced = ?5
                 WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
                params![
                    key.from.as_str(),
                    key.to.as_str(),
                    key.edge_type.as_str(),
                    weight as f64,
                    at
                ],
            )?,
            None => tx.execute(
                "UPDATE edges SET weight = ?4
                 WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
                params![
                    key.from.as_str(),
                    key.to.as_str(),
                    key.edge_type.as_str(),
                    weight as f64
                ],
            )?,
        };
        if changed == 0 {
            return Err(StorageError::EdgeNotFound {
                key: key.to_string(),
            });
        }
        Ok(weight)
    }
}

impl GraphStore for SqliteStore {
    fn get_node(&self, id: &NodeId) -> Result<Node, StorageError> {
        let conn = self.conn.lock();
        Self::load_node(&conn, id.as_str())?
            .ok_or_else(|| StorageError::NodeNotFound { id: id.0.clone() })
    }

    fn neighbors(
        &self,
        id: &NodeId,
        edge_types: &EdgeTypeSet,
        min_weight: f32,
    ) -> Result<Vec<(Edge, Node)>, StorageError> {
        let conn = self.conn.lock();
        if !Self::node_exists(&conn, id.as_str())? {
            return Err(StorageError::NodeNotFound { id: id.0.clone() });
        }

        let mut stmt = conn.prepare_cached(
            "SELECT e.from_id, e.to_id, e.edge_type, e.weight, e.last_reinforced,
                    n.id, n.kind, n.content_ref, n.last_modified, n.embedding_json
             FROM edges e LEFT JOIN nodes n ON n.id = e.to_id
             WHERE e.from_id = ?1 AND e.weight >= ?2
             ORDER BY e.weight DESC, e.to_id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str(), min_weight as f64], |row| {
            let edge = EdgeRow {
                from_id: row.get(0)?,
                to_id: row.get(1)?,
                edge_type: row.get(2)?,
                weight: row.get(3)?,
                last_reinforced: row.get(4)?,
            };
            let node_id: Option<String> = row.get(5)?;
            let node = match node_id {
                Some(node_id) => Some(NodeRow {
                    id: node_id,
                    kind: row.get(6)?,
                    content_ref: row.get(7)?,
                    last_modified: row.get(8)?,
                    embedding_json: row.get(9)?,
                }),
                None => None,
            };
            Ok((edge, node))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (edge, node) = row?;
            let edge = edge.decode()?;
            if !edge_types.contains(edge.edge_type) {
                continue;
            }
            match node {
                Some(node) => result.push((edge, node.decode()?)),
                None => tracing::warn!(edge = %edge.key(), "skipping edge to missing node"),
            }
        }
        sort_neighbors(&mut result);
        Ok(result)
    }

    fn size_estimate(&self) -> Result<SizeEstimate, StorageError> {
        let conn = self.conn.lock();
        let node_count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        let edge_count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
        Ok(SizeEstimate {
            node_count: node_count as usize,
            edge_count: edge_count as usize,
        })
    }

    fn scan_nodes(&self) -> Result<Vec<Node>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, kind, content_ref, last_modified, embedding_json
             FROM nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NodeRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                content_ref: row.get(2)?,
                last_modified: row.get(3)?,
                embedding_json: row.get(4)?,
            })
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?.decode()?);
        }
        Ok(nodes)
    }

    fn get_edge(&self, key: &EdgeKey) -> Result<Edge, StorageError> {
        let conn = self.conn.lock();
        Self::load_edge(&conn, key)?.ok_or_else(|| StorageError::EdgeNotFound {
            key: key.to_string(),
        })
    }

    fn list_edges(&self) -> Result<Vec<Edge>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT from_id, to_id, edge_type, weight, last_reinforced FROM edges",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EdgeRow {
                from_id: row.get(0)?,
                to_id: row.get(1)?,
                edge_type: row.get(2)?,
                weight: row.get(3)?,
                last_reinforced: row.get(4)?,
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?.decode()?);
        }
        // EdgeType's Ord is declaration order, not the stored string order.
        edges.sort_by_key(|e| e.key());
        Ok(edges)
    }

    fn upsert_node(&self, node: Node) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let actual = node.embedding.dim();
        match Self::meta_get(&tx, META_DIMENSION)? {
            Some(stored) => {
                let expected: usize = stored.parse().map_err(|_| StorageError::IntegrityError {
                    reason: format!("bad embedding dimension in meta: {stored}"),
                })?;
                if expected != actual {
                    return Err(CoreError::DimensionMismatch { expected, actual }.into());
                }
            }
            None => Self::meta_set(&tx, META_DIMENSION, &actual.to_string())?,
        }

        let embedding_json = serde_json::to_string(&node.embedding)?;
        let created = match Self::load_node(&tx, node.id.as_str())? {
            Some(existing) => {
                if !existing.same_artifact(&node) {
                    return Err(CoreError::NodeIdentityChanged { id: node.id }.into());
                }
                tx.execute(
                    "UPDATE nodes SET last_modified = ?2, embedding_json = ?3 WHERE id = ?1",
                    params![node.id.as_str(), node.last_modified, embedding_json],
                )?;
                false
            }
            None => {
                tx.execute(
                    "INSERT INTO nodes (id, kind, content_ref, last_modified, embedding_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        node.id.as_str(),
                        node.kind.as_str(),
                        node.content_ref.0,
                        node.last_modified,
                        embedding_json
                    ],
                )?;
                true
            }
        };
        tx.commit()?;
        Ok(created)
    }

    fn upsert_edge(&self, edge: Edge) -> Result<bool, StorageError> {
        validate_weight(edge.weight)?;
        let key = edge.key();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for endpoint in [&edge.from, &edge.to] {
            if !Self::node_exists(&tx, endpoint.as_str())? {
                return Err(CoreError::DanglingEdge {
                    key,
                    missing: endpoint.clone(),
                }
                .into());
            }
        }

        let existed = Self::load_edge(&tx, &key)?.is_some();
        tx.execute(
            "INSERT INTO edges (from_id, to_id, edge_type, weight, last_reinforced)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_id, to_id, edge_type)
             DO UPDATE SET weight = excluded.weight, last_reinforced = excluded.last_reinforced",
            params![
                edge.from.as_str(),
                edge.to.as_str(),
                edge.edge_type.as_str(),
                edge.weight as f64,
                edge.last_reinforced
            ],
        )?;
        tx.commit()?;
        Ok(!existed)
    }

    fn set_edge_weights(&self, updates: &[WeightUpdate]) -> Result<Vec<f32>, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stored = Vec::with_capacity(updates.len());
        for update in updates {
            // An error drops the transaction, rolling back the whole batch.
            stored.push(Self::write_weight(&tx, update)?);
        }
        tx.commit()?;
        Ok(stored)
    }
}

impl PatternStore for SqliteStore {
    fn get_pattern(&self, digest: &str) -> Result<Option<BugPattern>, StorageError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT pattern_json FROM bug_patterns WHERE digest = ?1",
                params![digest],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn put_pattern(&self, pattern: &BugPattern) -> Result<(), StorageError> {
        let json = serde_json::to_string(pattern)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bug_patterns (digest, pattern_json, success_rate, last_used)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(digest) DO UPDATE SET
                pattern_json = excluded.pattern_json,
                success_rate = excluded.success_rate,
                last_used = excluded.last_used",
            params![
                pattern.digest(),
                json,
                pattern.success_rate as f64,
                pattern.last_used
            ],
        )?;
        Ok(())
    }

    fn delete_pattern(&self, digest: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM bug_patterns WHERE digest = ?1", params![digest])?;
        Ok(removed > 0)
    }

    fn list_patterns(&self) -> Result<Vec<BugPattern>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT pattern_json FROM bug_patterns ORDER BY digest")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(serde_json::from_str(&row?)?);
        }
        Ok(patterns)
    }

    fn get_reinforcement(&self, key: &EdgeKey) -> Result<Option<ReinforcementRecord>, StorageError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM edge_reinforcements
                 WHERE from_id = ?1 AND to_id = ?2 AND edge_type = ?3",
                params![key.from.as_str(), key.to.as_str(), key.edge_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn put_reinforcement(&self, record: &ReinforcementRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record)?;
        let key = &record.edge;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO edge_reinforcements (from_id, to_id, edge_type, record_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(from_id, to_id, edge_type) DO UPDATE SET record_json = excluded.record_json",
            params![key.from.as_str(), key.to.as_str(), key.edge_type.as_str(), json],
        )?;
        Ok(())
    }

    fn last_decay(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let conn = self.conn.lock();
        let Some(raw) = Self::meta_get(&conn, META_LAST_DECAY)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| StorageError::IntegrityError {
                reason: format!("bad last_decay timestamp {raw}: {e}"),
            })
    }

    fn set_last_decay(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        Self::meta_set(&conn, META_LAST_DECAY, &at.to_rfc3339())
    }
}
