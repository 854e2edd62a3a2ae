//! Global PageRank over the symbol graph.
//!
//! Runs over CALLS, IMPORTS_SYMBOL, EXTENDS, and IMPLEMENTS edges between
//! symbols with damping 0.85 to convergence (sum of absolute deltas below
//! epsilon) or a 50-iteration cap, whichever comes first. Scores are
//! written back in one transaction so readers never see a half-refreshed
//! ranking.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use crate::error::Result;

pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_EPSILON: f64 = 1e-6;
pub const PAGERANK_MAX_ITERATIONS: usize = 50;

const PAGERANK_RELATIONSHIPS: &[&str] = &["CALLS", "IMPORTS_SYMBOL", "EXTENDS", "IMPLEMENTS"];

/// Recompute `pagerank_score` for every symbol.
pub fn recompute_pagerank(conn: &Connection, damping: f64, epsilon: f64) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM symbols ORDER BY id;")?;
    let symbol_ids: Vec<i64> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    if symbol_ids.is_empty() {
        return Ok(());
    }

    let id_set: HashSet<i64> = symbol_ids.iter().copied().collect();
    let mut adjacency: HashMap<i64, Vec<i64>> =
        symbol_ids.iter().map(|&id| (id, Vec::new())).collect();

    let placeholders = PAGERANK_RELATIONSHIPS
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT source_id, target_id FROM edges \
         WHERE source_type = 'symbol' AND target_type = 'symbol' \
         AND relationship IN ({placeholders});"
    );
    let mut edge_stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = PAGERANK_RELATIONSHIPS
        .iter()
        .map(|r| r as &dyn rusqlite::types::ToSql)
        .collect();
    let edges: Vec<(i64, i64)> = edge_stmt
        .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();

    for (source, target) in edges {
        if id_set.contains(&source) && id_set.contains(&target) {
            adjacency.entry(source).or_default().push(target);
        }
    }

    let node_count = symbol_ids.len() as f64;
    let base_score = 1.0 / node_count;
    let mut scores: HashMap<i64, f64> = symbol_ids.iter().map(|&id| (id, base_score)).collect();

    for _ in 0..PAGERANK_MAX_ITERATIONS {
        let mut next_scores: HashMap<i64, f64> = symbol_ids
            .iter()
            .map(|&id| (id, (1.0 - damping) / node_count))
            .collect();

        // Dangling nodes redistribute their mass uniformly.
        let dangling_mass: f64 = adjacency
            .iter()
            .filter(|(_, targets)| targets.is_empty())
            .map(|(id, _)| scores[id])
            .sum();
        let dangling_contribution = damping * dangling_mass / node_count;
        for &id in &symbol_ids {
            *next_scores.get_mut(&id).unwrap() += dangling_contribution;
        }

        for (&source, targets) in &adjacency {
            if targets.is_empty() {
                continue;
            }
            let share = damping * scores[&source] / targets.len() as f64;
            for &target in targets {
                *next_scores.get_mut(&target).unwrap() += share;
            }
        }

        let delta: f64 = symbol_ids
            .iter()
            .map(|id| (next_scores[id] - scores[id]).abs())
            .sum();
        scores = next_scores;
        if delta <= epsilon {
            break;
        }
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut update = tx.prepare("UPDATE symbols SET pagerank_score = ?1 WHERE id = ?2;")?;
        for &id in &symbol_ids {
            update.execute(rusqlite::params![scores[&id], id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn seed_chain(store: &Store) {
        // a -> b -> c
        store
            .conn()
            .execute_batch(
                "INSERT INTO files(path, language, content_hash) VALUES ('x.py', 'python', 'h');
                 INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line)
                 VALUES ('a', 'x.a', 'function', 'x.py', 1, 2),
                        ('b', 'x.b', 'function', 'x.py', 3, 4),
                        ('c', 'x.c', 'function', 'x.py', 5, 6);
                 INSERT INTO edges(source_id, target_id, source_type, target_type, relationship, file_path, line_number)
                 VALUES (1, 2, 'symbol', 'symbol', 'CALLS', 'x.py', 2),
                        (2, 3, 'symbol', 'symbol', 'CALLS', 'x.py', 4);",
            )
            .unwrap();
    }

    fn scores(store: &Store) -> Vec<(String, f64)> {
        let conn = store.conn();
        let mut stmt = conn
            .prepare("SELECT name, pagerank_score FROM symbols ORDER BY id;")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn sink_outranks_source() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON).unwrap();

        let by_name: std::collections::HashMap<String, f64> = scores(&store).into_iter().collect();
        assert!(by_name["c"] > by_name["b"]);
        assert!(by_name["b"] > by_name["a"]);
    }

    #[test]
    fn recompute_is_deterministic() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON).unwrap();
        let first = scores(&store);
        recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON).unwrap();
        let second = scores(&store);
        for ((_, a), (_, b)) in first.iter().zip(second.iter()) {
            assert!((a - b).abs() < PAGERANK_EPSILON);
        }
    }

    #[test]
    fn empty_store_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON).unwrap();
    }

    #[test]
    fn cycles_converge() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO files(path, language, content_hash) VALUES ('x.py', 'python', 'h');
                 INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line)
                 VALUES ('a', 'x.a', 'function', 'x.py', 1, 2),
                        ('b', 'x.b', 'function', 'x.py', 3, 4);
                 INSERT INTO edges(source_id, target_id, source_type, target_type, relationship, file_path, line_number)
                 VALUES (1, 2, 'symbol', 'symbol', 'CALLS', 'x.py', 2),
                        (2, 1, 'symbol', 'symbol', 'CALLS', 'x.py', 4);",
            )
            .unwrap();
        recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON).unwrap();
        let by_name: std::collections::HashMap<String, f64> = scores(&store).into_iter().collect();
        // Symmetric cycle: equal scores, both positive.
        assert!((by_name["a"] - by_name["b"]).abs() < 1e-9);
        assert!(by_name["a"] > 0.0);
    }
}
