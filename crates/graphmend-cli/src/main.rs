//! graphmend operator CLI.
//!
//! Works directly on a graphmend SQLite database: ingest graph snapshots,
//! run a retrieval, inspect learned patterns, run a decay pass and print
//! store statistics. Results are printed as JSON on stdout.
//!
//! Exit codes: 0 = success, 1 = invalid input, 3 = storage or I/O error.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use graphmend_core::{DebugQuery, GraphSnapshot, HashingEmbedder};
use graphmend_memory::{DebugMemory, MemoryConfig};
use graphmend_retrieval::{AgrEngine, RetrievalConfig, RetrievalHints};
use graphmend_storage::{GraphStore, PatternStore, SqliteStore};

#[derive(Parser)]
#[command(name = "graphmend", about = "graphmend retrieval and memory tools")]
struct Cli {
    /// Path to the graphmend database file.
    #[arg(short, long, global = true, default_value = "graphmend.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert every node and edge of a JSON graph snapshot.
    Ingest {
        snapshot: PathBuf,
    },

    /// Write the stored graph as a JSON snapshot to stdout.
    Export,

    /// Retrieve context for a bug description.
    Retrieve {
        text: String,

        /// Artifact ids known to be involved.
        #[arg(short, long = "anchor")]
        anchors: Vec<String>,

        /// Error output or stack trace.
        #[arg(short, long)]
        trace: Option<String>,

        /// Extra hops beyond the complexity-derived depth.
        #[arg(long, default_value_t = 0)]
        extra_depth: usize,

        /// Dimension of the query embedder; must match the stored nodes.
        #[arg(long, default_value_t = 256)]
        dim: usize,
    },

    /// List stored bug patterns matching a bug description.
    Patterns {
        text: String,

        #[arg(short, long)]
        trace: Option<String>,
    },

    /// Run one decay pass now.
    Decay,

    /// Print node, edge and pattern counts.
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = match SqliteStore::new(&cli.db) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", cli.db, e);
            process::exit(3);
        }
    };

    let exit_code = match cli.command {
        Commands::Ingest { snapshot } => run_ingest(&store, &snapshot),
        Commands::Export => match store.export_snapshot() {
            Ok(snapshot) => print_json(&snapshot),
            Err(e) => fail(3, format!("failed to export graph: {}", e)),
        },
        Commands::Retrieve {
            text,
            anchors,
            trace,
            extra_depth,
            dim,
        } => {
            let mut query = DebugQuery::new(text);
            query.anchors = anchors.into_iter().map(Into::into).collect();
            query.error_trace = trace;
            run_retrieve(store, query, extra_depth, dim)
        }
        Commands::Patterns { text, trace } => {
            let mut query = DebugQuery::new(text);
            query.error_trace = trace;
            run_patterns(store, &query)
        }
        Commands::Decay => match memory(store) {
            Ok(memory) => match memory.decay(Utc::now()) {
                Ok(report) => print_json(&report),
                Err(e) => fail(3, format!("decay failed: {}", e)),
            },
            Err(code) => code,
        },
        Commands::Stats => run_stats(&store),
    };
    process::exit(exit_code);
}

fn fail(code: i32, message: String) -> i32 {
    eprintln!("Error: {}", message);
    code
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => fail(3, format!("failed to serialize result: {}", e)),
    }
}

fn memory(store: Arc<SqliteStore>) -> Result<Arc<DebugMemory>, i32> {
    let graph: Arc<dyn GraphStore> = store.clone();
    let patterns: Arc<dyn PatternStore> = store;
    DebugMemory::new(graph, patterns, MemoryConfig::default())
        .map(Arc::new)
        .map_err(|e| fail(1, format!("invalid memory config: {}", e)))
}

fn run_ingest(store: &SqliteStore, path: &Path) -> i32 {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return fail(3, format!("cannot read '{}': {}", path.display(), e)),
    };
    let snapshot: GraphSnapshot = match serde_json::from_str(&text) {
        Ok(snapshot) => snapshot,
        Err(e) => return fail(1, format!("invalid snapshot '{}': {}", path.display(), e)),
    };
    let (nodes, edges) = (snapshot.nodes.len(), snapshot.edges.len());
    match store.import_snapshot(snapshot) {
        Ok(size) => {
            tracing::info!(nodes, edges, "snapshot ingested");
            print_json(&size)
        }
        Err(e) if e.is_not_found() => fail(1, format!("snapshot rejected: {}", e)),
        Err(graphmend_storage::StorageError::Invariant(e)) => fail(1, format!("snapshot rejected: {}", e)),
        Err(e) => fail(3, format!("ingest failed: {}", e)),
    }
}

fn run_retrieve(store: Arc<SqliteStore>, query: DebugQuery, extra_depth: usize, dim: usize) -> i32 {
    let memory = match memory(store.clone()) {
        Ok(memory) => memory,
        Err(code) => return code,
    };
    let engine = match AgrEngine::new(
        store,
        Arc::new(HashingEmbedder::new(dim)),
        RetrievalConfig::default(),
    ) {
        Ok(engine) => engine.with_pattern_hints(memory),
        Err(e) => return fail(1, format!("invalid retrieval config: {}", e)),
    };

    let hints = RetrievalHints {
        extra_depth,
        broaden: false,
    };
    match engine.retrieve(&query, &hints) {
        Ok(outcome) => print_json(&outcome),
        Err(e) => fail(3, format!("retrieval failed: {}", e)),
    }
}

fn run_patterns(store: Arc<SqliteStore>, query: &DebugQuery) -> i32 {
    let Some(signature) = query.signature() else {
        return fail(1, "cannot derive a bug signature from the query".to_string());
    };
    let memory = match memory(store) {
        Ok(memory) => memory,
        Err(code) => return code,
    };
    match memory.match_patterns(&signature) {
        Ok(matches) => print_json(&matches),
        Err(e) => fail(3, format!("pattern lookup failed: {}", e)),
    }
}

fn run_stats(store: &SqliteStore) -> i32 {
    let size = match store.size_estimate() {
        Ok(size) => size,
        Err(e) => return fail(3, format!("failed to read graph size: {}", e)),
    };
    let patterns = match store.list_patterns() {
        Ok(patterns) => patterns.len(),
        Err(e) => return fail(3, format!("failed to list patterns: {}", e)),
    };
    let last_decay = match store.last_decay() {
        Ok(at) => at,
        Err(e) => return fail(3, format!("failed to read decay state: {}", e)),
    };
    print_json(&serde_json::json!({
        "node_count": size.node_count,
        "edge_count": size.edge_count,
        "pattern_count": patterns,
        "last_decay": last_decay,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn retrieve_collects_repeated_anchors() {
        let cli = Cli::parse_from([
            "graphmend",
            "--db",
            "x.db",
            "retrieve",
            "panic in parser",
            "--anchor",
            "fn:a",
            "--anchor",
            "fn:b",
        ]);
        assert_eq!(cli.db, "x.db");
        match cli.command {
            Commands::Retrieve { anchors, dim, .. } => {
                assert_eq!(anchors, vec!["fn:a", "fn:b"]);
                assert_eq!(dim, 256);
            }
            _ => panic!("expected retrieve"),
        }
    }
}
