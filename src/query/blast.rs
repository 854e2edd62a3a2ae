//! Blast radius: who breaks when this symbol changes.
//!
//! Reverse BFS over CALLS, IMPLEMENTS, and EXTENDS edges. The risk
//! bucket follows dependent counts, bumped one level when test files
//! depend on the target (a change there invalidates the safety net).

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{
    adaptive_graph_cap, clamp_depth, truncate_query, MAX_BLAST_DEPTH, MAX_GRAPH_EDGES,
    MAX_GRAPH_VISITED,
};
use crate::query::{resolve_symbol, Deadline, ResolvedSymbol};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastRadiusRequest {
    pub symbol: String,
    #[serde(default = "default_change_type")]
    pub change_type: String,
    #[serde(default = "default_depth")]
    pub max_depth: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

fn default_change_type() -> String {
    "behavior".to_string()
}

fn default_depth() -> i64 {
    3
}

impl BlastRadiusRequest {
    pub fn new(symbol: &str, change_type: &str, max_depth: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            change_type: change_type.to_string(),
            max_depth,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependent {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: i64,
    pub depth: i64,
    pub relationship: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlastRadiusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ResolvedSymbol>,
    pub change_type: String,
    pub max_depth: i64,
    pub direct_dependents: Vec<Dependent>,
    pub transitive_dependents: Vec<Dependent>,
    pub affected_files: Vec<String>,
    pub total_affected_symbols: i64,
    pub includes_tests: bool,
    pub risk_level: String,
    pub summary: String,
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

/// Path heuristic for test code.
pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("test") || lower.contains("spec") || lower.contains("__tests__")
}

fn risk_level(direct: usize, transitive: usize, includes_tests: bool) -> &'static str {
    let total = direct + transitive;
    let base = if total >= 10 {
        2
    } else if total >= 3 {
        1
    } else {
        0
    };
    let bumped = if includes_tests { (base + 1).min(2) } else { base };
    ["low", "medium", "high"][bumped]
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compute the blast radius of a change to one symbol.
pub fn get_blast_radius(store: &Store, request: &BlastRadiusRequest) -> Result<BlastRadiusResponse> {
    let conn = store.conn();
    let normalized_symbol = truncate_query(&request.symbol);
    let bounded_depth = clamp_depth(request.max_depth, MAX_BLAST_DEPTH);
    let deadline = Deadline::from_ms(request.deadline_ms);

    let mut response = BlastRadiusResponse {
        change_type: request.change_type.clone(),
        max_depth: bounded_depth,
        risk_level: "low".to_string(),
        ..Default::default()
    };

    let Some(target) = resolve_symbol(conn, &normalized_symbol)? else {
        response.summary = "Symbol not found; nothing is affected.".to_string();
        return Ok(response);
    };

    let total_symbols = store.symbol_count()?;
    let visited_cap = adaptive_graph_cap(total_symbols, MAX_GRAPH_VISITED, 128);
    let edge_cap = 256i64.max(MAX_GRAPH_EDGES.min(visited_cap * 2));

    let mut stmt = conn.prepare(
        "SELECT e.source_id, e.line_number, e.relationship, s.name, s.qualified_name, s.file_path
         FROM edges e JOIN symbols s ON s.id = e.source_id
         WHERE e.relationship IN ('CALLS', 'IMPLEMENTS', 'EXTENDS')
           AND e.source_type = 'symbol' AND e.target_type = 'symbol'
           AND e.target_id = ?1;",
    )?;

    let mut visited: HashSet<i64> = HashSet::new();
    visited.insert(target.id);
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    queue.push_back((target.id, 0));

    while let Some((current, depth)) = queue.pop_front() {
        let collected =
            (response.direct_dependents.len() + response.transitive_dependents.len()) as i64;
        if collected >= edge_cap || visited.len() as i64 >= visited_cap {
            response.truncated = true;
            break;
        }
        if deadline.expired() {
            response.truncated = true;
            break;
        }
        if depth >= bounded_depth {
            continue;
        }
        let rows: Vec<(i64, Option<i64>, String, String, String, String)> = stmt
            .query_map(rusqlite::params![current], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        for (source_id, line, relationship, name, qualified_name, file_path) in rows {
            if !visited.insert(source_id) {
                continue;
            }
            let next_depth = depth + 1;
            let dependent = Dependent {
                id: source_id,
                name,
                qualified_name,
                file_path,
                line: line.unwrap_or(0),
                depth: next_depth,
                relationship,
            };
            if next_depth == 1 {
                response.direct_dependents.push(dependent);
            } else {
                response.transitive_dependents.push(dependent);
            }
            queue.push_back((source_id, next_depth));
        }
    }

    let mut affected: HashSet<String> = HashSet::new();
    affected.insert(target.file_path.clone());
    for dependent in response
        .direct_dependents
        .iter()
        .chain(response.transitive_dependents.iter())
    {
        affected.insert(dependent.file_path.clone());
    }
    response.includes_tests = response
        .direct_dependents
        .iter()
        .chain(response.transitive_dependents.iter())
        .any(|d| is_test_path(&d.file_path));

    let mut affected: Vec<String> = affected.into_iter().collect();
    affected.sort();
    response.total_affected_symbols =
        (response.direct_dependents.len() + response.transitive_dependents.len()) as i64;
    response.risk_level = risk_level(
        response.direct_dependents.len(),
        response.transitive_dependents.len(),
        response.includes_tests,
    )
    .to_string();
    response.summary = format!(
        "{} - {} direct dependents, {} transitive dependents across {} files",
        response.risk_level,
        response.direct_dependents.len(),
        response.transitive_dependents.len(),
        affected.len()
    );
    response.affected_files = affected;
    response.target = Some(target);
    Ok(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
