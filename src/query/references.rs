//! Reference traversal: callers, callees, implementors, and supers.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{
    adaptive_graph_cap, clamp_depth, truncate_query, MAX_GRAPH_EDGES, MAX_GRAPH_VISITED,
    MAX_REFERENCE_DEPTH,
};
use crate::query::{read_source_fragment, resolve_symbol, Deadline, ResolvedSymbol};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesRequest {
    pub symbol: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_depth")]
    pub depth: i64,
    #[serde(default)]
    pub include_source: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_depth() -> i64 {
    1
}

impl ReferencesRequest {
    pub fn new(symbol: &str, direction: &str, depth: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: direction.to_string(),
            depth,
            include_source: false,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub line_number: i64,
    pub depth: i64,
    pub relationship: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Per-direction reference lists. A missing target yields the empty
/// response, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferencesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ResolvedSymbol>,
    pub callers: Vec<ReferenceEntry>,
    pub callees: Vec<ReferenceEntry>,
    pub implementors: Vec<ReferenceEntry>,
    pub supers: Vec<ReferenceEntry>,
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// BFS walk
// ---------------------------------------------------------------------------

struct WalkEntry {
    next_id: i64,
    line_number: Option<i64>,
    depth: i64,
    relationship: &'static str,
}

fn walk(
    conn: &Connection,
    start_id: i64,
    direction: &str,
    max_depth: i64,
    max_edges: i64,
    max_visited: i64,
    deadline: &Deadline,
    truncated: &mut bool,
) -> Result<Vec<WalkEntry>> {
    let (sql, relationship) = match direction {
        "callers" => (
            "SELECT source_id, line_number FROM edges
             WHERE relationship = 'CALLS' AND source_type = 'symbol'
               AND target_type = 'symbol' AND target_id = ?1;",
            "CALLS",
        ),
        "callees" => (
            "SELECT target_id, line_number FROM edges
             WHERE relationship = 'CALLS' AND source_type = 'symbol'
               AND target_type = 'symbol' AND source_id = ?1;",
            "CALLS",
        ),
        "implementors" => (
            "SELECT source_id, line_number FROM edges
             WHERE relationship = 'IMPLEMENTS' AND source_type = 'symbol'
               AND target_type = 'symbol' AND target_id = ?1;",
            "IMPLEMENTS",
        ),
        "supers" => (
            "SELECT target_id, line_number FROM edges
             WHERE relationship IN ('EXTENDS', 'IMPLEMENTS') AND source_type = 'symbol'
               AND target_type = 'symbol' AND source_id = ?1;",
            "EXTENDS_OR_IMPLEMENTS",
        ),
        _ => return Ok(Vec::new()),
    };

    let mut stmt = conn.prepare(sql)?;
    let mut results: Vec<WalkEntry> = Vec::new();
    let mut visited: HashSet<i64> = HashSet::new();
    visited.insert(start_id);
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    queue.push_back((start_id, 0));

    while let Some((current_id, depth)) = queue.pop_front() {
        if results.len() as i64 >= max_edges || visited.len() as i64 >= max_visited {
            *truncated = true;
            break;
        }
        if deadline.expired() {
            *truncated = true;
            break;
        }
        if depth >= max_depth {
            continue;
        }
        let rows: Vec<(i64, Option<i64>)> = stmt
            .query_map(rusqlite::params![current_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        for (next_id, line_number) in rows {
            if results.len() as i64 >= max_edges || visited.len() as i64 >= max_visited {
                *truncated = true;
                break;
            }
            if !visited.insert(next_id) {
                continue;
            }
            let next_depth = depth + 1;
            results.push(WalkEntry {
                next_id,
                line_number,
                depth: next_depth,
                relationship,
            });
            queue.push_back((next_id, next_depth));
        }
    }
    Ok(results)
}

fn load_symbol(conn: &Connection, id: i64) -> Result<Option<ResolvedSymbol>> {
    match conn.query_row(
        "SELECT id, name, qualified_name, kind, file_path, start_line, end_line, signature
         FROM symbols WHERE id = ?1;",
        rusqlite::params![id],
        |row| {
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
        },
    ) {
        Ok(symbol) => Ok(Some(symbol)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Walk the reference graph around one symbol.
pub fn get_references(
    store: &Store,
    repo_root: &Path,
    request: &ReferencesRequest,
) -> Result<ReferencesResponse> {
    let conn = store.conn();
    let normalized_symbol = truncate_query(&request.symbol);
    let bounded_depth = clamp_depth(request.depth, MAX_REFERENCE_DEPTH);
    let deadline = Deadline::from_ms(request.deadline_ms);

    let Some(target) = resolve_symbol(conn, &normalized_symbol)? else {
        return Ok(ReferencesResponse::default());
    };

    let total_symbols = store.symbol_count()?;
    let visited_cap = adaptive_graph_cap(total_symbols, MAX_GRAPH_VISITED, 200);
    let edge_cap = 256i64.max(MAX_GRAPH_EDGES.min(visited_cap * 2));

    let directions: Vec<&str> = match request.direction.as_str() {
        "callers" => vec!["callers"],
        "callees" => vec!["callees"],
        "implementors" => vec!["implementors"],
        "supers" => vec!["supers"],
        _ => vec!["callers", "callees"],
    };

    let mut response = ReferencesResponse {
        target: Some(target),
        ..Default::default()
    };

    for direction in directions {
        let entries = walk(
            conn,
            response.target.as_ref().unwrap().id,
            direction,
            bounded_depth,
            edge_cap,
            visited_cap,
            &deadline,
            &mut response.truncated,
        )?;
        for entry in entries {
            let Some(symbol) = load_symbol(conn, entry.next_id)? else {
                continue;
            };
            let source = if request.include_source {
                Some(read_source_fragment(
                    repo_root,
                    &symbol.file_path,
                    symbol.start_line,
                    symbol.end_line,
                ))
            } else {
                None
            };
            let reference = ReferenceEntry {
                id: symbol.id,
                name: symbol.name,
                qualified_name: symbol.qualified_name,
                file_path: symbol.file_path,
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                signature: symbol.signature,
                line_number: entry.line_number.unwrap_or(0),
                depth: entry.depth,
                relationship: entry.relationship.to_string(),
                source,
            };
            match direction {
                "callers" => response.callers.push(reference),
                "callees" => response.callees.push(reference),
                "implementors" => response.implementors.push(reference),
                "supers" => response.supers.push(reference),
                _ => {}
            }
        }
    }

    Ok(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
