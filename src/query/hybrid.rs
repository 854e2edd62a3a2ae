//! Hybrid scoring: lexical similarity, structural importance, and a
//! lightweight semantic overlap, combined 0.55 / 0.35 / 0.10.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]+").unwrap());

fn tokens(value: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(value)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Lexical similarity between the query and a symbol's names.
/// Exact match 1.0, name containment 0.9, qualified containment 0.8,
/// otherwise token overlap in [0, 1].
pub fn lexical_score(query: &str, name: &str, qualified_name: &str) -> f64 {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0.0;
    }
    let n = name.to_lowercase();
    let qn = qualified_name.to_lowercase();
    if q == n || q == qn {
        return 1.0;
    }
    if n.contains(&q) {
        return 0.9;
    }
    if qn.contains(&q) {
        return 0.8;
    }
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let target_tokens = tokens(&format!("{name} {qualified_name}"));
    if target_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens.intersection(&target_tokens).count();
    overlap as f64 / query_tokens.len().max(1) as f64
}

/// Structural importance: PageRank plus log-damped call traffic.
pub fn structural_score(pagerank: f64, callers: i64, callees: i64) -> f64 {
    let pagerank_component = pagerank.max(0.0);
    let traffic_component = ((callers.max(0) + callees.max(0)) as f64 + 1.0).ln();
    pagerank_component + traffic_component * 0.1
}

/// Token overlap between the query and a symbol's signature + docstring.
pub fn semantic_score(query: &str, signature: Option<&str>, docstring: Option<&str>) -> f64 {
    let query_tokens = tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let corpus = format!("{} {}", signature.unwrap_or(""), docstring.unwrap_or(""));
    let corpus_tokens = tokens(&corpus);
    if corpus_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens.intersection(&corpus_tokens).count();
    overlap as f64 / query_tokens.len().max(1) as f64
}

/// Combined ranking score for a search candidate.
#[allow(clippy::too_many_arguments)]
pub fn rank_symbol(
    query: &str,
    name: &str,
    qualified_name: &str,
    signature: Option<&str>,
    docstring: Option<&str>,
    pagerank: f64,
    callers: i64,
    callees: i64,
) -> f64 {
    let lexical = lexical_score(query, name, qualified_name);
    let structural = structural_score(pagerank, callers, callees);
    let semantic = semantic_score(query, signature, docstring);
    lexical * 0.55 + structural * 0.35 + semantic * 0.10
}
