//! Symbol search: FTS match with a LIKE fallback, ranked by the hybrid
//! scorer.

use indexmap::IndexMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{clamp_limit, truncate_query, MAX_SEARCH_LIMIT};
use crate::query::hybrid::rank_symbol;
use crate::store::Store;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_kind() -> String {
    "any".to_string()
}

fn default_limit() -> i64 {
    20
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            kind: default_kind(),
            file_pattern: None,
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub qualified_name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    pub importance_score: f64,
    pub callers_count: i64,
    pub callees_count: i64,
    pub match_strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub symbols: Vec<SearchHit>,
    pub total_matches: i64,
}

// ---------------------------------------------------------------------------
// Row plumbing
// ---------------------------------------------------------------------------

struct SymbolRow {
    id: i64,
    name: String,
    qualified_name: String,
    kind: String,
    file_path: String,
    start_line: i64,
    end_line: i64,
    signature: Option<String>,
    docstring: Option<String>,
    visibility: Option<String>,
    pagerank_score: f64,
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRow> {
    Ok(SymbolRow {
        id: row.get(0)?,
        name: row.get(1)?,
        qualified_name: row.get(2)?,
        kind: row.get(3)?,
        file_path: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        signature: row.get(7)?,
        docstring: row.get(8)?,
        visibility: row.get(9)?,
        pagerank_score: row.get::<_, f64>(10).unwrap_or(0.0),
    })
}

const SYMBOL_COLUMNS: &str = "id, name, qualified_name, kind, file_path, start_line, end_line, \
                              signature, docstring, visibility, pagerank_score";

fn count_refs(conn: &Connection, symbol_id: i64) -> Result<(i64, i64)> {
    let callers: i64 = conn.query_row(
        "SELECT COUNT(*) FROM edges
         WHERE relationship = 'CALLS' AND target_type = 'symbol' AND target_id = ?1;",
        rusqlite::params![symbol_id],
        |row| row.get(0),
    )?;
    let callees: i64 = conn.query_row(
        "SELECT COUNT(*) FROM edges
         WHERE relationship = 'CALLS' AND source_type = 'symbol' AND source_id = ?1;",
        rusqlite::params![symbol_id],
        |row| row.get(0),
    )?;
    Ok((callers, callees))
}

fn search_with_like(
    conn: &Connection,
    query: &str,
    kind: &str,
    file_pattern: Option<&str>,
    limit: i64,
) -> Result<Vec<SymbolRow>> {
    let needle = format!("%{}%", query.to_lowercase());
    let mut sql = format!(
        "SELECT {SYMBOL_COLUMNS} FROM symbols
         WHERE (LOWER(name) LIKE ?1 OR LOWER(qualified_name) LIKE ?2)"
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(needle.clone()), Box::new(needle)];
    let mut index = 3;
    if kind != "any" {
        sql.push_str(&format!(" AND kind = ?{index}"));
        params.push(Box::new(kind.to_string()));
        index += 1;
    }
    if let Some(pattern) = file_pattern {
        sql.push_str(&format!(" AND file_path LIKE ?{index}"));
        params.push(Box::new(pattern.replace('*', "%")));
        index += 1;
    }
    sql.push_str(&format!(
        " ORDER BY pagerank_score DESC, qualified_name ASC LIMIT ?{index}"
    ));
    params.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), row_to_symbol)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

fn search_with_fts(
    conn: &Connection,
    query: &str,
    kind: &str,
    file_pattern: Option<&str>,
    limit: i64,
) -> Vec<SymbolRow> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    // FTS syntax errors (stray punctuation and the like) just mean the
    // LIKE path carries the request.
    let attempt = || -> Result<Vec<SymbolRow>> {
        let mut sql = String::from(
            "SELECT s.id, s.name, s.qualified_name, s.kind, s.file_path, s.start_line, s.end_line,
                    s.signature, s.docstring, s.visibility, s.pagerank_score
             FROM symbol_fts f JOIN symbols s ON s.id = f.symbol_id
             WHERE symbol_fts MATCH ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(query.to_string())];
        let mut index = 2;
        if kind != "any" {
            sql.push_str(&format!(" AND s.kind = ?{index}"));
            params.push(Box::new(kind.to_string()));
            index += 1;
        }
        if let Some(pattern) = file_pattern {
            sql.push_str(&format!(" AND s.file_path LIKE ?{index}"));
            params.push(Box::new(pattern.replace('*', "%")));
            index += 1;
        }
        sql.push_str(&format!(
            " ORDER BY rank ASC, s.pagerank_score DESC LIMIT ?{index}"
        ));
        params.push(Box::new(limit));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_symbol)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    };
    attempt().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Search symbols by free text, ranked by the hybrid scorer.
pub fn search_symbols(store: &Store, request: &SearchRequest) -> Result<SearchResponse> {
    let conn = store.conn();
    let normalized_query = truncate_query(&request.query);
    let bounded_limit = clamp_limit(request.limit, MAX_SEARCH_LIMIT);
    if bounded_limit == 0 {
        return Ok(SearchResponse {
            symbols: Vec::new(),
            total_matches: 0,
        });
    }
    // Over-fetch so ranking can reorder before the final cut.
    let expanded_limit = clamp_limit(bounded_limit * 3, MAX_SEARCH_LIMIT).max(bounded_limit);

    let fts_rows = search_with_fts(
        conn,
        &normalized_query,
        &request.kind,
        request.file_pattern.as_deref(),
        expanded_limit,
    );
    let like_rows = search_with_like(
        conn,
        &normalized_query,
        &request.kind,
        request.file_pattern.as_deref(),
        expanded_limit,
    )?;

    // FTS hits take precedence over LIKE hits for the same symbol.
    let mut combined: IndexMap<i64, (SymbolRow, &'static str)> = IndexMap::new();
    for row in like_rows {
        combined.entry(row.id).or_insert((row, "like"));
    }
    for row in fts_rows {
        combined.insert(row.id, (row, "fts"));
    }

    let mut scored: Vec<(f64, SearchHit)> = Vec::new();
    for (_, (row, strategy)) in combined {
        let (callers_count, callees_count) = count_refs(conn, row.id)?;
        let score = rank_symbol(
            &normalized_query,
            &row.name,
            &row.qualified_name,
            row.signature.as_deref(),
            row.docstring.as_deref(),
            row.pagerank_score,
            callers_count,
            callees_count,
        );
        scored.push((
            score,
            SearchHit {
                name: row.name,
                qualified_name: row.qualified_name,
                kind: row.kind,
                file_path: row.file_path,
                start_line: row.start_line,
                end_line: row.end_line,
                signature: row.signature,
                visibility: row.visibility,
                importance_score: row.pagerank_score,
                callers_count,
                callees_count,
                match_strategy: strategy.to_string(),
            },
        ));
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.qualified_name.cmp(&b.1.qualified_name))
            .then_with(|| a.1.file_path.cmp(&b.1.file_path))
    });

    let symbols: Vec<SearchHit> = scored
        .into_iter()
        .take(bounded_limit as usize)
        .map(|(_, hit)| hit)
        .collect();
    let total_matches = symbols.len() as i64;
    Ok(SearchResponse {
        symbols,
        total_matches,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO files(path, language, content_hash)
                 VALUES ('auth.py', 'python', 'h1'), ('db.py', 'python', 'h2');
                 INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line, signature, docstring, visibility, pagerank_score)
                 VALUES ('login', 'auth.login', 'function', 'auth.py', 1, 10, 'def login(user)', 'Authenticate a user.', 'public', 0.4),
                        ('logout', 'auth.logout', 'function', 'auth.py', 12, 20, 'def logout(user)', NULL, 'public', 0.2),
                        ('connect', 'db.connect', 'function', 'db.py', 1, 8, 'def connect()', 'Open a connection.', 'public', 0.3);
                 INSERT INTO symbol_fts(symbol_id, name, qualified_name, docstring, signature)
                 VALUES (1, 'login', 'auth.login', 'Authenticate a user.', 'def login(user)'),
                        (2, 'logout', 'auth.logout', '', 'def logout(user)'),
                        (3, 'connect', 'db.connect', 'Open a connection.', 'def connect()');",
            )
            .unwrap();
        store
    }

    #[test]
    fn exact_name_ranks_first() {
        let store = seeded_store();
        let response = search_symbols(&store, &SearchRequest::new("login")).unwrap();
        assert!(!response.symbols.is_empty());
        assert_eq!(response.symbols[0].name, "login");
        assert_eq!(response.symbols[0].match_strategy, "fts");
    }

    #[test]
    fn docstring_terms_match_via_fts() {
        let store = seeded_store();
        let response = search_symbols(&store, &SearchRequest::new("authenticate")).unwrap();
        assert!(response
            .symbols
            .iter()
            .any(|hit| hit.qualified_name == "auth.login"));
    }

    #[test]
    fn kind_filter_applies() {
        let store = seeded_store();
        let mut request = SearchRequest::new("login");
        request.kind = "class".to_string();
        let response = search_symbols(&store, &request).unwrap();
        assert!(response.symbols.is_empty());
    }

    #[test]
    fn file_glob_filters() {
        let store = seeded_store();
        let mut request = SearchRequest::new("connect");
        request.file_pattern = Some("db*".to_string());
        let response = search_symbols(&store, &request).unwrap();
        assert_eq!(response.symbols.len(), 1);
        assert_eq!(response.symbols[0].file_path, "db.py");
    }

    #[test]
    fn limit_zero_returns_empty_not_error() {
        let store = seeded_store();
        let mut request = SearchRequest::new("login");
        request.limit = 0;
        let response = search_symbols(&store, &request).unwrap();
        assert!(response.symbols.is_empty());
        assert_eq!(response.total_matches, 0);
    }

    #[test]
    fn limit_is_clamped_not_rejected() {
        let store = seeded_store();
        let mut request = SearchRequest::new("o");
        request.limit = 10_000;
        let response = search_symbols(&store, &request).unwrap();
        assert!(response.symbols.len() <= MAX_SEARCH_LIMIT as usize);
    }

    #[test]
    fn no_match_is_empty_response() {
        let store = seeded_store();
        let response = search_symbols(&store, &SearchRequest::new("zzz_nothing")).unwrap();
        assert!(response.symbols.is_empty());
    }

    #[test]
    fn punctuation_query_falls_back_to_like() {
        let store = seeded_store();
        // This breaks FTS MATCH syntax but should still hit via LIKE.
        let response = search_symbols(&store, &SearchRequest::new("login(")).unwrap();
        let _ = response; // no panic, well-formed response
    }

    #[test]
    fn includes_reference_counts() {
        let store = seeded_store();
        store
            .conn()
            .execute_batch(
                "INSERT INTO edges(source_id, target_id, source_type, target_type, relationship, file_path, line_number)
                 VALUES (2, 1, 'symbol', 'symbol', 'CALLS', 'auth.py', 13);",
            )
            .unwrap();
        let response = search_symbols(&store, &SearchRequest::new("login")).unwrap();
        let login = response
            .symbols
            .iter()
            .find(|h| h.name == "login")
            .unwrap();
        assert_eq!(login.callers_count, 1);
        assert_eq!(login.callees_count, 0);
    }
}
