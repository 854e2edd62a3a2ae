//! Query engines and their shared plumbing.
//!
//! Each engine is a pure function of (store snapshot, request) →
//! response. Guardrail violations clamp, unknown symbols yield empty
//! well-formed responses, and only store failures surface as errors.

pub mod blast;
pub mod change_impact;
pub mod context;
pub mod data_flow;
pub mod guards;
pub mod hybrid;
pub mod planner;
pub mod references;
pub mod search;
pub mod structure;
pub mod tokenizer;

use std::path::Path;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Shared symbol resolution
// ---------------------------------------------------------------------------

/// A resolved query target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSymbol {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Resolve a symbol by name. Exact qualified-name match wins; otherwise
/// the highest-PageRank symbol with a matching short name.
pub(crate) fn resolve_symbol(conn: &Connection, symbol_name: &str) -> Result<Option<ResolvedSymbol>> {
    for sql in [
        "SELECT id, name, qualified_name, kind, file_path, start_line, end_line, signature
         FROM symbols WHERE qualified_name = ?1
         ORDER BY pagerank_score DESC, id ASC LIMIT 1;",
        "SELECT id, name, qualified_name, kind, file_path, start_line, end_line, signature
         FROM symbols WHERE name = ?1
         ORDER BY pagerank_score DESC, id ASC LIMIT 1;",
    ] {
        match conn.query_row(sql, rusqlite::params![symbol_name], |row| {
            Ok(ResolvedSymbol {
                id: row.get(0)?,
                name: row.get(1)?,
                qualified_name: row.get(2)?,
                kind: row.get(3)?,
                file_path: row.get(4)?,
                start_line: row.get(5)?,
                end_line: row.get(6)?,
                signature: row.get(7)?,
            })
        }) {
            Ok(symbol) => return Ok(Some(symbol)),
            Err(rusqlite::Error::QueryReturnedNoRows) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Per-request wall-clock budget. BFS loops check between hops and
/// return best-effort partial results with a truncation flag on expiry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub fn from_ms(deadline_ms: Option<u64>) -> Self {
        Self(deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms)))
    }

    pub fn expired(&self) -> bool {
        self.0.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Source reads
// ---------------------------------------------------------------------------

/// Read lines `[start..=end]` (1-based, inclusive) of a repo-relative
/// file. IO failures yield an empty string; source enrichment is
/// best-effort.
pub(crate) fn read_source_fragment(
    repo_root: &Path,
    file_path: &str,
    start_line: i64,
    end_line: i64,
) -> String {
    let content = match std::fs::read_to_string(repo_root.join(file_path)) {
        Ok(c) => c,
        Err(_) => return String::new(),
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = (start_line.max(1) - 1) as usize;
    let end = (end_line.max(1) as usize).min(lines.len());
    if start >= lines.len() || start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO files(path, language, content_hash) VALUES ('m.py', 'python', 'h');
                 INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line, pagerank_score)
                 VALUES ('f', 'm.f', 'function', 'm.py', 1, 2, 0.1),
                        ('f', 'other.f', 'function', 'm.py', 5, 6, 0.9);",
            )
            .unwrap();
        store
    }

    #[test]
    fn exact_qualified_match_wins() {
        let store = seeded_store();
        let symbol = resolve_symbol(store.conn(), "m.f").unwrap().unwrap();
        assert_eq!(symbol.qualified_name, "m.f");
    }

    #[test]
    fn short_name_falls_back_to_highest_pagerank() {
        let store = seeded_store();
        let symbol = resolve_symbol(store.conn(), "f").unwrap().unwrap();
        assert_eq!(symbol.qualified_name, "other.f");
    }

    #[test]
    fn unknown_symbol_is_none() {
        let store = seeded_store();
        assert!(resolve_symbol(store.conn(), "ghost").unwrap().is_none());
    }

    #[test]
    fn deadline_none_never_expires() {
        let deadline = Deadline::from_ms(None);
        assert!(!deadline.expired());
        let expired = Deadline::from_ms(Some(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(expired.expired());
    }

    #[test]
    fn source_fragment_slices_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.py"), "l1\nl2\nl3\nl4\n").unwrap();
        assert_eq!(read_source_fragment(dir.path(), "x.py", 2, 3), "l2\nl3");
        assert_eq!(read_source_fragment(dir.path(), "missing.py", 1, 2), "");
        assert_eq!(read_source_fragment(dir.path(), "x.py", 10, 20), "");
    }
}
