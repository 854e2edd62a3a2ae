//! Data-flow tracing: bidirectional BFS over CALLS edges only, returning
//! the reached node set and the simple paths within depth, each tagged
//! with its direction.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{
    adaptive_graph_cap, clamp_depth, truncate_query, MAX_FLOW_DEPTH, MAX_GRAPH_EDGES,
    MAX_GRAPH_VISITED,
};
use crate::query::{resolve_symbol, Deadline, ResolvedSymbol};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFlowRequest {
    pub symbol: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default = "default_depth")]
    pub max_depth: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_depth() -> i64 {
    3
}

impl DataFlowRequest {
    pub fn new(symbol: &str, direction: &str, max_depth: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction: direction.to_string(),
            max_depth,
            deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPath {
    pub from_id: i64,
    pub from_name: String,
    pub to_id: i64,
    pub to_name: String,
    pub line: i64,
    pub depth: i64,
    pub direction: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFlowResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ResolvedSymbol>,
    pub direction: String,
    pub max_depth: i64,
    pub summary: String,
    pub nodes: Vec<FlowNode>,
    pub paths: Vec<FlowPath>,
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Trace call flow upstream (callers) and/or downstream (callees).
pub fn trace_data_flow(store: &Store, request: &DataFlowRequest) -> Result<DataFlowResponse> {
    let conn = store.conn();
    let normalized_symbol = truncate_query(&request.symbol);
    let bounded_depth = clamp_depth(request.max_depth, MAX_FLOW_DEPTH);
    let deadline = Deadline::from_ms(request.deadline_ms);

    let mut response = DataFlowResponse {
        direction: request.direction.clone(),
        max_depth: bounded_depth,
        ..Default::default()
    };

    let Some(target) = resolve_symbol(conn, &normalized_symbol)? else {
        response.summary = "Symbol not found; no flow to trace.".to_string();
        return Ok(response);
    };

    let total_symbols = store.symbol_count()?;
    let visited_cap = adaptive_graph_cap(total_symbols, MAX_GRAPH_VISITED, 128);
    let edge_cap = 256i64.max(MAX_GRAPH_EDGES.min(visited_cap * 2));

    let mut nodes: HashMap<i64, FlowNode> = HashMap::new();
    nodes.insert(
        target.id,
        FlowNode {
            id: target.id,
            name: target.name.clone(),
            qualified_name: target.qualified_name.clone(),
            file_path: target.file_path.clone(),
            role: "target".to_string(),
        },
    );

    let mut paths: Vec<FlowPath> = Vec::new();
    let mut seen: HashSet<(i64, &'static str)> = HashSet::new();
    let mut queue: VecDeque<(i64, i64)> = VecDeque::new();
    seen.insert((target.id, "upstream"));
    seen.insert((target.id, "downstream"));
    queue.push_back((target.id, 0));

    let trace_upstream = request.direction == "upstream" || request.direction == "both";
    let trace_downstream = request.direction == "downstream" || request.direction == "both";

    while let Some((current, depth)) = queue.pop_front() {
        if paths.len() as i64 >= edge_cap || nodes.len() as i64 >= visited_cap {
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
        let current_name = nodes
            .get(&current)
            .map(|n| n.name.clone())
            .unwrap_or_default();

        if trace_upstream {
            for (neighbor_id, line, name, qualified_name, file_path) in
                call_neighbors(conn, current, true)?
            {
                if paths.len() as i64 >= edge_cap || nodes.len() as i64 >= visited_cap {
                    response.truncated = true;
                    break;
                }
                nodes.entry(neighbor_id).or_insert_with(|| FlowNode {
                    id: neighbor_id,
                    name: name.clone(),
                    qualified_name,
                    file_path,
                    role: "upstream".to_string(),
                });
                paths.push(FlowPath {
                    from_id: neighbor_id,
                    from_name: name,
                    to_id: current,
                    to_name: current_name.clone(),
                    line,
                    depth: depth + 1,
                    direction: "upstream".to_string(),
                });
                if seen.insert((neighbor_id, "upstream")) {
                    queue.push_back((neighbor_id, depth + 1));
                }
            }
        }

        if trace_downstream {
            for (neighbor_id, line, name, qualified_name, file_path) in
                call_neighbors(conn, current, false)?
            {
                if paths.len() as i64 >= edge_cap || nodes.len() as i64 >= visited_cap {
                    response.truncated = true;
                    break;
                }
                nodes.entry(neighbor_id).or_insert_with(|| FlowNode {
                    id: neighbor_id,
                    name: name.clone(),
                    qualified_name,
                    file_path,
                    role: "downstream".to_string(),
                });
                paths.push(FlowPath {
                    from_id: current,
                    from_name: current_name.clone(),
                    to_id: neighbor_id,
                    to_name: name,
                    line,
                    depth: depth + 1,
                    direction: "downstream".to_string(),
                });
                if seen.insert((neighbor_id, "downstream")) {
                    queue.push_back((neighbor_id, depth + 1));
                }
            }
        }
    }

    paths.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.line.cmp(&b.line)));
    let mut node_list: Vec<FlowNode> = nodes.into_values().collect();
    node_list.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.name.cmp(&b.name)));

    response.summary = format!(
        "Traced {} call edges across {} symbols (direction={}, depth<={}).",
        paths.len(),
        node_list.len(),
        request.direction,
        bounded_depth
    );
    response.nodes = node_list;
    response.paths = paths;
    response.target = Some(target);
    Ok(response)
}

type Neighbor = (i64, i64, String, String, String);

fn call_neighbors(conn: &Connection, symbol_id: i64, upstream: bool) -> Result<Vec<Neighbor>> {
    let sql = if upstream {
        "SELECT e.source_id, COALESCE(e.line_number, 0), s.name, s.qualified_name, s.file_path
         FROM edges e JOIN symbols s ON s.id = e.source_id
         WHERE e.relationship = 'CALLS' AND e.source_type = 'symbol'
           AND e.target_type = 'symbol' AND e.target_id = ?1;"
    } else {
        "SELECT e.target_id, COALESCE(e.line_number, 0), s.name, s.qualified_name, s.file_path
         FROM edges e JOIN symbols s ON s.id = e.target_id
         WHERE e.relationship = 'CALLS' AND e.source_type = 'symbol'
           AND e.target_type = 'symbol' AND e.source_id = ?1;"
    };
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![symbol_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
