//! Call-graph edge construction.
//!
//! Call sites come from the extractor; targets are resolved against the
//! full symbol table with a cascading lookup: same-file, receiver-typed
//! class scope, alias/import scope, qualified-name suffix, then global
//! name match. The first tier that yields candidates wins. Ties inside a
//! tier break by descending PageRank then ascending symbol id, and the
//! winner carries the tier's ambiguous confidence (<1). Unresolved sites
//! produce no edge and are counted for the run's ambiguity statistics.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::indexer::extract::CallSiteRecord;
use crate::models::{EdgeRecord, Relationship};

// ---------------------------------------------------------------------------
// Symbol summaries
// ---------------------------------------------------------------------------

/// The slice of a symbol row the resolver needs.
#[derive(Debug, Clone)]
pub struct SymbolSummary {
    pub id: i64,
    pub name: String,
    pub qualified_name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub pagerank_score: f64,
}

/// Output of resolving one file's call sites.
#[derive(Debug, Default)]
pub struct CallResolution {
    pub edges: Vec<EdgeRecord>,
    pub ambiguous_count: i64,
    pub unresolved_count: i64,
}

// ---------------------------------------------------------------------------
// Import scanning (aliases + module hints)
// ---------------------------------------------------------------------------

static PY_FROM_ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([A-Za-z0-9_\.]+)\s+import\s+(.+)$").unwrap());

static PY_IMPORT_ALIAS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+([A-Za-z0-9_\.]+)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?\s*$").unwrap()
});

static TS_NAMED_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import(?:\s+type)?\s+\{([^}]*)\}\s+from\s+['"][^'"]+['"]"#).unwrap()
});

static TS_DEFAULT_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*import(?:\s+type)?\s+([A-Za-z_][A-Za-z0-9_]*)\s+from\s+['"][^'"]+['"]"#)
        .unwrap()
});

static TS_IMPORT_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import(?:\s+type)?\s+.*?\s+from\s+['"]([^'"]+)['"]"#).unwrap());

static JAVA_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"import\s+(?:static\s+)?([A-Za-z0-9_.*]+);").unwrap());

static GO_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"]+)""#).unwrap());

static PY_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+([A-Za-z0-9_\.]+)\s+import").unwrap());

static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"import\s+([A-Za-z0-9_\.]+)").unwrap());

/// Module-name hints from every import style: full names plus their
/// trailing components.
pub fn import_hints(source: &str) -> HashSet<String> {
    let mut hints = HashSet::new();
    let mut push = |value: &str, separator: char| {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        hints.insert(value.to_string());
        if let Some(last) = value.rsplit(separator).next() {
            hints.insert(last.to_string());
        }
    };

    for line in source.lines() {
        let normalized = line.trim();
        if let Some(caps) = PY_FROM_RE.captures(normalized) {
            push(&caps[1], '.');
        }
        if normalized.starts_with("import ") {
            if let Some(caps) = PY_IMPORT_RE.captures(normalized) {
                push(&caps[1], '.');
            }
        }
        if let Some(caps) = TS_IMPORT_HINT_RE.captures(normalized) {
            push(&caps[1], '/');
        }
        if let Some(caps) = JAVA_IMPORT_RE.captures(normalized) {
            push(caps[1].trim_end_matches(".*"), '.');
        }
        if normalized.starts_with("import") && normalized.contains('"') {
            if let Some(caps) = GO_IMPORT_RE.captures(normalized) {
                push(&caps[1], '/');
            }
        }
    }
    hints
}

/// Alias map: local visible name -> possible original names.
pub fn import_aliases(source: &str) -> HashMap<String, HashSet<String>> {
    let mut aliases: HashMap<String, HashSet<String>> = HashMap::new();

    for raw_line in source.lines() {
        let normalized = raw_line.trim();
        if normalized.is_empty() {
            continue;
        }

        if let Some(caps) = PY_FROM_ALIAS_RE.captures(normalized) {
            for chunk in caps[2].split(',') {
                let token = chunk.trim();
                if token.is_empty() {
                    continue;
                }
                let parts: Vec<&str> = token.splitn(2, " as ").map(|s| s.trim()).collect();
                let imported = parts[0];
                let alias = if parts.len() > 1 { parts[1] } else { imported };
                let last = imported.rsplit('.').next().unwrap_or(imported);
                aliases
                    .entry(alias.to_string())
                    .or_default()
                    .insert(last.to_string());
            }
            continue;
        }

        if let Some(caps) = PY_IMPORT_ALIAS_RE.captures(normalized) {
            let module = &caps[1];
            let last = module.rsplit('.').next().unwrap_or(module);
            let alias = caps.get(2).map(|m| m.as_str()).unwrap_or(last);
            aliases
                .entry(alias.to_string())
                .or_default()
                .insert(last.to_string());
            continue;
        }

        if let Some(caps) = TS_NAMED_IMPORT_RE.captures(normalized) {
            for chunk in caps[1].split(',') {
                let token = chunk.trim();
                if token.is_empty() {
                    continue;
                }
                let parts: Vec<&str> = token.splitn(2, " as ").map(|s| s.trim()).collect();
                let imported = parts[0];
                let alias = if parts.len() > 1 { parts[1] } else { imported };
                aliases
                    .entry(alias.to_string())
                    .or_default()
                    .insert(imported.to_string());
            }
            continue;
        }

        if let Some(caps) = TS_DEFAULT_IMPORT_RE.captures(normalized) {
            let alias = &caps[1];
            aliases
                .entry(alias.to_string())
                .or_default()
                .insert(alias.to_string());
        }
    }
    aliases
}

// ---------------------------------------------------------------------------
// Lexical receiver-type hints
// ---------------------------------------------------------------------------

static PY_ASSIGN_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
});

static JAVA_NEW_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([A-Za-z_][A-Za-z0-9_<>?,\s]*)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*new\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .unwrap()
});

static TS_NEW_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*([A-Za-z_][A-Za-z0-9_<>]*))?\s*=\s*new\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .unwrap()
});

static GO_SHORT_DECL_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*:=\s*&?([A-Za-z_][A-Za-z0-9_]*)\s*\{").unwrap()
});

/// Scan backwards (up to `window` lines) for assignments revealing the
/// receiver's type.
pub fn lexical_receiver_type_hints(
    source: &str,
    receiver_name: Option<&str>,
    line_number: i64,
    window: usize,
) -> HashSet<String> {
    let receiver = match receiver_name {
        Some(r) => r.trim(),
        None => return HashSet::new(),
    };
    if receiver.is_empty() {
        return HashSet::new();
    }

    let lines: Vec<&str> = source.lines().collect();
    let end_index = ((line_number - 1).max(0) as usize).min(lines.len());
    let begin_index = end_index.saturating_sub(window);
    let mut hints = HashSet::new();

    for line in lines[begin_index..end_index].iter().rev() {
        if let Some(caps) = PY_ASSIGN_TYPE_RE.captures(line) {
            if &caps[1] == receiver {
                hints.insert(caps[2].to_string());
            }
        }
        if let Some(caps) = JAVA_NEW_TYPE_RE.captures(line) {
            if &caps[2] == receiver {
                let declared = caps[1].trim().split('<').next().unwrap_or("").to_string();
                if !declared.is_empty() {
                    hints.insert(declared);
                }
                hints.insert(caps[3].trim().to_string());
            }
        }
        if let Some(caps) = TS_NEW_TYPE_RE.captures(line) {
            if &caps[1] == receiver {
                if let Some(declared) = caps.get(2) {
                    let declared = declared.as_str().trim().split('<').next().unwrap_or("");
                    if !declared.is_empty() {
                        hints.insert(declared.to_string());
                    }
                }
                hints.insert(caps[3].trim().to_string());
            }
        }
        if let Some(caps) = GO_SHORT_DECL_TYPE_RE.captures(line) {
            if &caps[1] == receiver {
                hints.insert(caps[2].to_string());
            }
        }
    }
    hints
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

/// Smallest symbol whose line range contains the call site.
fn caller_for_line<'a>(line_number: i64, file_symbols: &'a [SymbolSummary]) -> Option<&'a SymbolSummary> {
    let mut best: Option<&SymbolSummary> = None;
    for symbol in file_symbols {
        if symbol.start_line <= line_number && line_number <= symbol.end_line {
            match best {
                None => best = Some(symbol),
                Some(current) => {
                    if symbol.end_line - symbol.start_line < current.end_line - current.start_line {
                        best = Some(symbol);
                    }
                }
            }
        }
    }
    best
}

/// Owner (class) component of a method's qualified name.
fn method_owner_name(symbol: &SymbolSummary) -> &str {
    let parts: Vec<&str> = symbol.qualified_name.split('.').collect();
    if parts.len() < 2 {
        ""
    } else {
        parts[parts.len() - 2]
    }
}

/// Lowercased tokens of a type name, splitting on `.`, `::`, and `/`.
fn type_name_tokens(type_name: &str) -> HashSet<String> {
    let value = type_name.trim();
    if value.is_empty() {
        return HashSet::new();
    }
    let mut tokens = HashSet::new();
    tokens.insert(value.to_lowercase());
    for separator in [".", "::", "/"] {
        if value.contains(separator) {
            if let Some(last) = value.rsplit(separator).next() {
                tokens.insert(last.to_lowercase());
            }
        }
    }
    tokens
}

/// Best candidate by descending PageRank, ascending id.
fn tie_break<'a>(candidates: &[&'a SymbolSummary]) -> &'a SymbolSummary {
    let mut sorted: Vec<&SymbolSummary> = candidates.to_vec();
    sorted.sort_by(|a, b| {
        b.pagerank_score
            .partial_cmp(&a.pagerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    sorted[0]
}

struct ResolutionContext<'a> {
    import_hint_set: &'a HashSet<String>,
    alias_hints: &'a HashMap<String, HashSet<String>>,
    semantic_hints: &'a HashMap<(i64, String), HashSet<String>>,
}

/// Cascading resolution. Returns the winning target and confidence, or
/// `None` when no tier matches.
fn resolve_target<'a>(
    callsite: &CallSiteRecord,
    caller: &SymbolSummary,
    candidates: &'a [SymbolSummary],
    source: &str,
    ctx: &ResolutionContext<'_>,
) -> Option<(&'a SymbolSummary, f64)> {
    let mut candidate_names: HashSet<&str> = HashSet::new();
    candidate_names.insert(callsite.callee_name.as_str());
    if let Some(alias_set) = ctx.alias_hints.get(callsite.callee_name.as_str()) {
        for alias in alias_set {
            candidate_names.insert(alias.as_str());
        }
    }

    let matches: Vec<&SymbolSummary> = candidates
        .iter()
        .filter(|s| candidate_names.contains(s.name.as_str()))
        .collect();
    if matches.is_empty() {
        return None;
    }

    let receiver = callsite
        .receiver_name
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();

    // Tier 1: same-file symbols.
    let same_file: Vec<&SymbolSummary> = matches
        .iter()
        .filter(|s| s.file_path == caller.file_path)
        .copied()
        .collect();
    if !same_file.is_empty() {
        let confidence = if same_file.len() == 1 { 1.0 } else { 0.8 };
        return Some((tie_break(&same_file), confidence));
    }

    // Tier 2: class-scoped via receiver type hints (semantic sidecars,
    // lexical scan, and self/cls/this mapping to the caller's own class).
    let mut type_hints: HashSet<String> = lexical_receiver_type_hints(
        source,
        callsite.receiver_name.as_deref(),
        callsite.line_number,
        60,
    );
    let semantic_key = (callsite.line_number, receiver.clone());
    if let Some(hints) = ctx.semantic_hints.get(&semantic_key) {
        type_hints.extend(hints.iter().cloned());
    }
    if matches!(receiver.as_str(), "self" | "cls" | "this") && caller.kind == "method" {
        type_hints.insert(method_owner_name(caller).to_string());
    }
    if !type_hints.is_empty() {
        let mut hint_tokens: HashSet<String> = HashSet::new();
        for hint in &type_hints {
            hint_tokens.extend(type_name_tokens(hint));
        }
        let typed: Vec<&SymbolSummary> = matches
            .iter()
            .filter(|s| {
                s.kind == "method"
                    && !type_name_tokens(method_owner_name(s)).is_disjoint(&hint_tokens)
            })
            .copied()
            .collect();
        if !typed.is_empty() {
            let confidence = if typed.len() == 1 { 1.0 } else { 0.84 };
            return Some((tie_break(&typed), confidence));
        }
    }

    // Tier 3: alias/import-scoped.
    let import_scoped: Vec<&SymbolSummary> = matches
        .iter()
        .filter(|s| {
            ctx.import_hint_set.iter().any(|hint| {
                if hint.is_empty() {
                    return false;
                }
                hint.contains(&s.qualified_name)
                    || s.qualified_name.contains(hint.as_str())
                    || s.file_path.ends_with(&format!("/{hint}.py"))
                    || s.file_path.ends_with(&format!("/{hint}.ts"))
                    || s.file_path.ends_with(&format!("/{hint}.go"))
                    || s.file_path == format!("{hint}.py")
                    || s.file_path == format!("{hint}.ts")
                    || s.file_path == format!("{hint}.go")
            })
        })
        .copied()
        .collect();
    if !import_scoped.is_empty() {
        let confidence = if import_scoped.len() == 1 { 1.0 } else { 0.7 };
        return Some((tie_break(&import_scoped), confidence));
    }

    // Tier 4: qualified-name suffix against the receiver.
    if !receiver.is_empty() && !matches!(receiver.as_str(), "self" | "cls" | "this") {
        let suffix = format!("{receiver}.{}", callsite.callee_name);
        let needle = format!(".{receiver}.");
        let receiver_scoped: Vec<&SymbolSummary> = matches
            .iter()
            .filter(|s| s.qualified_name.ends_with(&suffix) || s.qualified_name.contains(&needle))
            .copied()
            .collect();
        if !receiver_scoped.is_empty() {
            let confidence = if receiver_scoped.len() == 1 { 1.0 } else { 0.75 };
            return Some((tie_break(&receiver_scoped), confidence));
        }
    }

    // Tier 5: global name match, inherently ambiguous.
    let confidence = if matches.len() == 1 { 0.9 } else { 0.5 };
    Some((tie_break(&matches), confidence))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Resolve a file's call sites into CALLS edges.
///
/// Edges are deduplicated per (source, target, line) and sorted by
/// (line, source_id, target_id) so output order is run-independent.
pub fn resolve_call_edges(
    source: &str,
    file_path: &str,
    call_sites: &[CallSiteRecord],
    file_symbols: &[SymbolSummary],
    candidate_symbols: &[SymbolSummary],
    semantic_hints: &HashMap<(i64, String), HashSet<String>>,
) -> CallResolution {
    let hints = import_hints(source);
    let aliases = import_aliases(source);
    let ctx = ResolutionContext {
        import_hint_set: &hints,
        alias_hints: &aliases,
        semantic_hints,
    };

    let mut result = CallResolution::default();
    let mut seen: HashSet<(i64, i64, i64)> = HashSet::new();

    for callsite in call_sites {
        let Some(caller) = caller_for_line(callsite.line_number, file_symbols) else {
            continue;
        };
        match resolve_target(callsite, caller, candidate_symbols, source, &ctx) {
            None => {
                result.unresolved_count += 1;
            }
            Some((target, confidence)) => {
                if target.id == caller.id {
                    continue; // recursion and shadowed self-matches add no signal
                }
                if confidence < 1.0 {
                    result.ambiguous_count += 1;
                }
                let key = (caller.id, target.id, callsite.line_number);
                if !seen.insert(key) {
                    continue;
                }
                result.edges.push(EdgeRecord {
                    source_id: caller.id,
                    target_id: target.id,
                    source_type: "symbol".to_string(),
                    target_type: "symbol".to_string(),
                    relationship: Relationship::Calls.as_str().to_string(),
                    file_path: Some(file_path.to_string()),
                    line_number: Some(callsite.line_number),
                    confidence,
                });
            }
        }
    }

    result.edges.sort_by(|a, b| {
        a.line_number
            .cmp(&b.line_number)
            .then(a.source_id.cmp(&b.source_id))
            .then(a.target_id.cmp(&b.target_id))
    });
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
