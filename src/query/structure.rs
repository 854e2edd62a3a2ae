//! Structure rendering: a hierarchical view of files under a sub-path,
//! listing top symbols by PageRank per file, stopping at the token
//! budget.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::guards::{
    clamp_budget, MAX_STRUCTURE_TOKEN_BUDGET, MIN_STRUCTURE_TOKEN_BUDGET,
};
use crate::query::tokenizer::estimate_tokens;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureRequest {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_budget")]
    pub token_budget: i64,
    #[serde(default = "default_signatures")]
    pub include_signatures: bool,
}

fn default_path() -> String {
    ".".to_string()
}

fn default_budget() -> i64 {
    4000
}

fn default_signatures() -> bool {
    true
}

impl StructureRequest {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            token_budget: default_budget(),
            include_signatures: default_signatures(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureResponse {
    pub rendered: String,
    pub tokens_used: i64,
    pub token_budget: i64,
    pub files_included: i64,
}

/// Render the repository structure under `path` within the token budget.
pub fn get_structure(store: &Store, request: &StructureRequest) -> Result<StructureResponse> {
    let conn = store.conn();
    let budget = clamp_budget(
        request.token_budget,
        MIN_STRUCTURE_TOKEN_BUDGET,
        MAX_STRUCTURE_TOKEN_BUDGET,
    );

    let path_like = if request.path.is_empty() || request.path == "." {
        "%".to_string()
    } else if request.path.ends_with('%') {
        request.path.clone()
    } else {
        format!("{}/%", request.path.trim_end_matches('/'))
    };

    let mut stmt = conn.prepare_cached(
        "SELECT file_path, name, kind, signature, pagerank_score
         FROM symbols WHERE file_path LIKE ?1
         ORDER BY pagerank_score DESC, file_path ASC, start_line ASC;",
    )?;
    let rows: Vec<(String, String, String, Option<String>, f64)> = stmt
        .query_map(rusqlite::params![path_like], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get::<_, f64>(4).unwrap_or(0.0),
            ))
        })?
        .filter_map(|r| r.ok())
        .collect();

    // Group by file; the per-file ordering inherits the global
    // PageRank-descending row order.
    let mut grouped: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();
    for (file_path, name, kind, signature, _score) in rows {
        grouped
            .entry(file_path)
            .or_default()
            .push((name, kind, signature.unwrap_or_default()));
    }

    let mut lines: Vec<(bool, String)> = Vec::new(); // (is_file_header, text)
    let mut rank = 0usize;
    for (file_path, symbols) in &grouped {
        lines.push((true, file_path.clone()));
        for (name, kind, signature) in symbols {
            rank += 1;
            let marker = if rank <= 10 { "[TOP] " } else { "" };
            let detail = if request.include_signatures && !signature.is_empty() {
                signature.clone()
            } else {
                format!("{kind} {name}")
            };
            lines.push((false, format!("  {marker}{detail}  [rank:{rank}]")));
        }
    }

    let mut rendered_lines: Vec<String> = Vec::new();
    let mut tokens_used = 0i64;
    let mut files_included = 0i64;
    for (is_file_header, line) in lines {
        let cost = estimate_tokens(&line);
        if tokens_used + cost > budget {
            break;
        }
        if is_file_header {
            files_included += 1;
        }
        tokens_used += cost;
        rendered_lines.push(line);
    }

    Ok(StructureResponse {
        rendered: rendered_lines.join("\n"),
        tokens_used,
        token_budget: budget,
        files_included,
    })
}
