//! Change impact: reverse call BFS plus EXTENDS/IMPLEMENTS dependents of
//! every affected class or interface.

use std::collections::{HashSet, VecDeque};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{
    adaptive_graph_cap, clamp_depth, truncate_query, MAX_GRAPH_EDGES, MAX_GRAPH_VISITED,
    MAX_IMPACT_DEPTH,
};
use crate::query::{resolve_symbol, Deadline, ResolvedSymbol};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeImpactRequest {
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

impl ChangeImpactRequest {
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
pub struct ImpactedSymbol {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: i64,
    pub depth: i64,
    pub impact_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeImpactResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ResolvedSymbol>,
    pub change_type: String,
    pub max_depth: i64,
    pub summary: String,
    pub direct_callers: Vec<ImpactedSymbol>,
    pub transitive_callers: Vec<ImpactedSymbol>,
    pub type_dependents: Vec<ImpactedSymbol>,
    pub affected_files: Vec<String>,
    pub total_affected_symbols: i64,
    pub risk_level: String,
    pub truncated: bool,
}

fn risk_level(direct: usize, transitive: usize, type_deps: usize) -> &'static str {
    let total = direct + transitive + type_deps;
    if total >= 12 {
        "high"
    } else if total >= 4 {
        "medium"
    } else {
        "low"
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Compute the change impact set for one symbol.
pub fn change_impact(store: &Store, request: &ChangeImpactRequest) -> Result<ChangeImpactResponse> {
    let conn = store.conn();
    let normalized_symbol = truncate_query(&request.symbol);
    let bounded_depth = clamp_depth(request.max_depth, MAX_IMPACT_DEPTH);
    let deadline = Deadline::from_ms(request.deadline_ms);

    let mut response = ChangeImpactResponse {
        change_type: request.change_type.clone(),
        max_depth: bounded_depth,
        risk_level: "low".to_string(),
        ..Default::default()
    };

    let Some(target) = resolve_symbol(conn, &normalized_symbol)? else {
        response.summary = "Symbol not found; no impact.".to_string();
        return Ok(response);
    };

    let total_symbols = store.symbol_count()?;
    let visited_cap = adaptive_graph_cap(total_symbols, MAX_GRAPH_VISITED, 128);
    let edge_cap = 256i64.max(MAX_GRAPH_EDGES.min(visited_cap * 2));

    let mut caller_stmt = conn.prepare(
        "SELECT e.source_id, COALESCE(e.line_number, 0), s.name, s.qualified_name, s.file_path, s.kind
         FROM edges e JOIN symbols s ON s.id = e.source_id
         WHERE e.relationship = 'CALLS' AND e.source_type = 'symbol'
           AND e.target_type = 'symbol' AND e.target_id = ?1;",
    )?;

    // Reverse call BFS. Classes encountered along the way feed the
    // type-dependent pass below.
    let mut visited: HashSet<i64> = HashSet::new();
    visited.insert(target.id);
    let mut class_ids: Vec<i64> = Vec::new();
    if target.kind == "class" || target.kind == "interface" {
        class_ids.push(target.id);
    }
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    queue.push_back((target.id, 0));

    while let Some((current, depth)) = queue.pop_front() {
        let collected = (response.direct_callers.len() + response.transitive_callers.len()) as i64;
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
        let rows: Vec<(i64, i64, String, String, String, String)> = caller_stmt
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
        for (source_id, line, name, qualified_name, file_path, kind) in rows {
            if !visited.insert(source_id) {
                continue;
            }
            if kind == "class" || kind == "interface" {
                class_ids.push(source_id);
            }
            let next_depth = depth + 1;
            let impacted = ImpactedSymbol {
                id: source_id,
                name,
                qualified_name,
                file_path,
                line,
                depth: next_depth,
                impact_reason: format!("call_dependency:depth={next_depth}"),
            };
            if next_depth == 1 {
                response.direct_callers.push(impacted);
            } else {
                response.transitive_callers.push(impacted);
            }
            queue.push_back((source_id, next_depth));
        }
    }

    // Type dependents of every affected class/interface.
    let mut type_seen: HashSet<i64> = HashSet::new();
    for class_id in class_ids {
        for dependent in type_dependents(conn, class_id)? {
            if dependent.id != target.id && type_seen.insert(dependent.id) {
                response.type_dependents.push(dependent);
            }
        }
    }

    let mut affected: HashSet<String> = HashSet::new();
    affected.insert(target.file_path.clone());
    for impacted in response
        .direct_callers
        .iter()
        .chain(response.transitive_callers.iter())
        .chain(response.type_dependents.iter())
    {
        affected.insert(impacted.file_path.clone());
    }
    let mut affected: Vec<String> = affected.into_iter().collect();
    affected.sort();

    response.risk_level = risk_level(
        response.direct_callers.len(),
        response.transitive_callers.len(),
        response.type_dependents.len(),
    )
    .to_string();
    response.total_affected_symbols = (response.direct_callers.len()
        + response.transitive_callers.len()
        + response.type_dependents.len()) as i64;
    response.summary = format!(
        "Impact={}; direct={}, transitive={}, type_dependents={}, files={}",
        response.risk_level,
        response.direct_callers.len(),
        response.transitive_callers.len(),
        response.type_dependents.len(),
        affected.len()
    );
    response.affected_files = affected;
    response.target = Some(target);
    Ok(response)
}

fn type_dependents(conn: &Connection, class_id: i64) -> Result<Vec<ImpactedSymbol>> {
    let mut stmt = conn.prepare_cached(
        "SELECT e.source_id, e.relationship, COALESCE(e.line_number, 0),
                s.name, s.qualified_name, s.file_path
         FROM edges e JOIN symbols s ON s.id = e.source_id
         WHERE e.target_type = 'symbol' AND e.source_type = 'symbol'
           AND e.target_id = ?1
           AND e.relationship IN ('EXTENDS', 'IMPLEMENTS')
         ORDER BY s.qualified_name;",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![class_id], |row| {
            let relationship: String = row.get(1)?;
            Ok(ImpactedSymbol {
                id: row.get(0)?,
                name: row.get(3)?,
                qualified_name: row.get(4)?,
                file_path: row.get(5)?,
                line: row.get(2)?,
                depth: 1,
                impact_reason: format!("type_dependency:{relationship}"),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Animal <- Dog, Cat (EXTENDS) plus feed() -> Animal call.
    fn hierarchy_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO files(path, language, content_hash) VALUES ('zoo.py', 'python', 'h');
                 INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line)
                 VALUES ('Animal', 'zoo.Animal', 'class', 'zoo.py', 1, 4),
                        ('Dog', 'zoo.Dog', 'class', 'zoo.py', 6, 9),
                        ('Cat', 'zoo.Cat', 'class', 'zoo.py', 11, 14),
                        ('feed', 'zoo.feed', 'function', 'zoo.py', 16, 18);
                 INSERT INTO edges(source_id, target_id, source_type, target_type, relationship, file_path, line_number)
                 VALUES (2, 1, 'symbol', 'symbol', 'EXTENDS', 'zoo.py', 6),
                        (3, 1, 'symbol', 'symbol', 'EXTENDS', 'zoo.py', 11),
                        (4, 1, 'symbol', 'symbol', 'CALLS', 'zoo.py', 17);",
            )
            .unwrap();
        store
    }

    #[test]
    fn signature_change_on_base_includes_subclasses() {
        let store = hierarchy_store();
        let response = change_impact(
            &store,
            &ChangeImpactRequest::new("Animal", "signature", 1),
        )
        .unwrap();

        let type_names: Vec<&str> = response
            .type_dependents
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert!(type_names.contains(&"Dog"));
        assert!(type_names.contains(&"Cat"));
        assert!(response
            .type_dependents
            .iter()
            .all(|d| d.impact_reason.starts_with("type_dependency:")));
        assert_eq!(response.direct_callers.len(), 1);
        assert_eq!(response.direct_callers[0].name, "feed");
    }

    #[test]
    fn unknown_symbol_is_empty() {
        let store = hierarchy_store();
        let response =
            change_impact(&store, &ChangeImpactRequest::new("ghost", "behavior", 2)).unwrap();
        assert!(response.target.is_none());
        assert_eq!(response.total_affected_symbols, 0);
    }

    #[test]
    fn affected_files_include_target_file() {
        let store = hierarchy_store();
        let response =
            change_impact(&store, &ChangeImpactRequest::new("Animal", "delete", 2)).unwrap();
        assert_eq!(response.affected_files, vec!["zoo.py"]);
    }

    #[test]
    fn depth_clamped_to_impact_cap() {
        let store = hierarchy_store();
        let response =
            change_impact(&store, &ChangeImpactRequest::new("Animal", "behavior", 40)).unwrap();
        assert_eq!(response.max_depth, MAX_IMPACT_DEPTH);
    }

    #[test]
    fn risk_scales_with_dependents() {
        let store = hierarchy_store();
        let response =
            change_impact(&store, &ChangeImpactRequest::new("Animal", "behavior", 2)).unwrap();
        // 1 caller + 2 type dependents = 3 -> still low; 4 would be medium.
        assert_eq!(response.risk_level, "low");
        assert_eq!(response.total_affected_symbols, 3);
    }
}
