//! Indexing pipeline orchestration.
//!
//! Two entry points: [`full_index`] processes every enumerated file,
//! [`incremental_index`] processes a supplied changeset. Both share the
//! same machinery: change detection against stored hashes, parallel
//! extraction on a rayon pool, a deterministic merge (results sorted by
//! file path, symbols sorted by (start_line, qualified_name)), edge
//! resolution once all symbols exist, a PageRank refresh, and a final
//! cache-epoch bump. A run that detects no changes performs no store
//! mutations at all, which is what makes reindex idempotence observable
//! via the cache-epoch delta.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{default_workers, DEFAULT_MAX_FILE_BYTES};
use crate::error::{Error, Result};
use crate::indexer::callgraph::{resolve_call_edges, SymbolSummary};
use crate::indexer::extract::{extract, FileExtraction};
use crate::indexer::filesystem::{
    compute_content_hash, detect_language, iter_repo_files, ScanOptions,
};
use crate::indexer::imports::{external_dep, resolve_imports};
use crate::indexer::pagerank::{recompute_pagerank, PAGERANK_DAMPING, PAGERANK_EPSILON};
use crate::indexer::parser::verify_grammars;
use crate::indexer::semantic::load_receiver_type_hints;
use crate::models::{
    stable_file_id, FileChange, FileRecord, IndexStats, IndexTelemetry, Language, ProgressSnapshot,
    Relationship, SymbolRecord,
};
use crate::models::EdgeRecord;
use crate::store::Store;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag checked between files.
pub type CancelFlag = Arc<AtomicBool>;

/// Options for one index run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub workers: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub sensitive_exclusion_enabled: bool,
    pub max_file_bytes: u64,
    pub strict: bool,
    pub semantic_hints_path: Option<PathBuf>,
    pub cancel: Option<CancelFlag>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            include: Vec::new(),
            exclude: Vec::new(),
            sensitive_exclusion_enabled: true,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            strict: false,
            semantic_hints_path: None,
            cancel: None,
        }
    }
}

impl IndexOptions {
    /// Derive run options from resolved engine settings.
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            workers: settings.workers,
            include: settings.include.clone(),
            exclude: settings.exclude.clone(),
            sensitive_exclusion_enabled: settings.sensitive_exclusion_enabled,
            max_file_bytes: settings.max_file_bytes,
            strict: settings.runtime_profile == crate::config::RuntimeProfile::Strict,
            semantic_hints_path: settings.semantic_hints_path.clone(),
            cancel: None,
        }
    }
}

fn cancelled(options: &IndexOptions) -> bool {
    options
        .cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Worker output
// ---------------------------------------------------------------------------

struct ExtractionJob {
    path: String,
    language: Language,
    source: String,
    extraction: FileExtraction,
}

fn extract_file_worker(repo_root: &Path, path: &str, language: Language) -> ExtractionJob {
    let absolute = repo_root.join(path);
    let source = match std::fs::read_to_string(&absolute) {
        Ok(s) => s,
        Err(e) => {
            let mut extraction = FileExtraction::default();
            extraction
                .diagnostics
                .push(crate::indexer::extract::ExtractionDiagnostic {
                    stage: "parse",
                    category: "io_error",
                    severity: "error",
                    message: e.to_string(),
                    hint: "Check filesystem health and path accessibility.",
                });
            return ExtractionJob {
                path: path.to_string(),
                language,
                source: String::new(),
                extraction,
            };
        }
    };
    let extraction = extract(&source, path, language);
    ExtractionJob {
        path: path.to_string(),
        language,
        source,
        extraction,
    }
}

fn parallel_extract(
    repo_root: &Path,
    jobs: &[(String, Language)],
    workers: usize,
) -> (Vec<ExtractionJob>, IndexTelemetry) {
    let started = Instant::now();
    let workers = workers.max(1);

    let mut results: Vec<ExtractionJob> = if workers <= 1 || jobs.len() <= 1 {
        jobs.iter()
            .map(|(path, language)| extract_file_worker(repo_root, path, *language))
            .collect()
    } else {
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| {
                jobs.par_iter()
                    .map(|(path, language)| extract_file_worker(repo_root, path, *language))
                    .collect()
            }),
            Err(_) => jobs
                .iter()
                .map(|(path, language)| extract_file_worker(repo_root, path, *language))
                .collect(),
        }
    };

    // Determinism is restored at the merge boundary: apply in path order
    // regardless of worker completion order.
    results.sort_by(|a, b| a.path.cmp(&b.path));

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let telemetry = IndexTelemetry {
        worker_count: workers,
        jobs_total: jobs.len(),
        extract_elapsed_ms: (elapsed * 1000.0) as i64,
        files_per_second: ((jobs.len() as f64 / elapsed) * 100.0).round() / 100.0,
    };
    (results, telemetry)
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

struct ScanOutcome {
    files_seen: i64,
    records: Vec<FileRecord>,
    languages: HashMap<String, Language>,
    oversized: Vec<(String, u64)>,
    unreadable: Vec<(String, String)>,
}

fn scan_repo(repo_root: &Path, options: &IndexOptions) -> ScanOutcome {
    let scan_options = ScanOptions {
        include: options.include.clone(),
        exclude: options.exclude.clone(),
        sensitive_exclusion_enabled: options.sensitive_exclusion_enabled,
    };
    let mut outcome = ScanOutcome {
        files_seen: 0,
        records: Vec::new(),
        languages: HashMap::new(),
        oversized: Vec::new(),
        unreadable: Vec::new(),
    };
    for absolute in iter_repo_files(repo_root, &scan_options) {
        outcome.files_seen += 1;
        let Some(language) = detect_language(&absolute) else {
            continue;
        };
        let rel = absolute
            .strip_prefix(repo_root)
            .unwrap_or(&absolute)
            .to_string_lossy()
            .replace('\\', "/");
        let size = absolute.metadata().map(|m| m.len()).unwrap_or(0);
        if size > options.max_file_bytes {
            outcome.oversized.push((rel, size));
            continue;
        }
        let content_hash = match compute_content_hash(&absolute) {
            Ok(hash) => hash,
            Err(e) => {
                outcome.unreadable.push((rel, e.to_string()));
                continue;
            }
        };
        outcome.languages.insert(rel.clone(), language);
        outcome.records.push(FileRecord {
            path: rel,
            language: language.as_str().to_string(),
            content_hash,
            size_bytes: Some(size as i64),
        });
    }
    outcome
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Index the full tree, skipping files whose stored hash is unchanged.
pub fn full_index(repo_root: &Path, store: &Store, options: &IndexOptions) -> Result<IndexStats> {
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    if options.strict {
        verify_grammars()?;
    }

    let scan = scan_repo(repo_root, options);
    record_scan_diagnostics(store, &run_id, &scan)?;

    let stored = store.files_map()?;
    let scanned_paths: HashSet<&str> = scan.records.iter().map(|r| r.path.as_str()).collect();
    let changed: Vec<FileRecord> = scan
        .records
        .iter()
        .filter(|record| {
            stored
                .get(&record.path)
                .map(|existing| existing.content_hash != record.content_hash)
                .unwrap_or(true)
        })
        .cloned()
        .collect();
    let deleted: Vec<String> = stored
        .keys()
        .filter(|path| !scanned_paths.contains(path.as_str()))
        .cloned()
        .collect();

    if changed.is_empty() && deleted.is_empty() {
        info!(run_id = %run_id, files_seen = scan.files_seen, "full index: no changes");
        return Ok(finish_stats(
            store,
            run_id,
            "full",
            scan.files_seen,
            0,
            0,
            0,
            started,
            IndexTelemetry::default(),
            false,
        ));
    }

    let outcome = apply_changes(
        repo_root,
        store,
        &run_id,
        changed,
        deleted,
        Vec::new(),
        &scan.languages,
        options,
    )?;

    Ok(finish_stats(
        store,
        run_id,
        "full",
        scan.files_seen,
        outcome.files_indexed,
        outcome.symbols_indexed,
        outcome.edges_indexed,
        started,
        outcome.telemetry,
        outcome.cancelled,
    ))
}

/// Apply a supplied changeset (added/modified/deleted/renamed files).
pub fn incremental_index(
    repo_root: &Path,
    store: &Store,
    changes: &[FileChange],
    options: &IndexOptions,
) -> Result<IndexStats> {
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().simple().to_string();
    if options.strict {
        verify_grammars()?;
    }

    let stored = store.files_map()?;
    let mut changed: Vec<FileRecord> = Vec::new();
    let mut languages: HashMap<String, Language> = HashMap::new();
    let mut deleted: Vec<String> = Vec::new();
    let mut renamed: Vec<(String, String)> = Vec::new();

    for change in changes {
        match change.status.to_uppercase().as_str() {
            "D" => {
                if stored.contains_key(&change.path) {
                    deleted.push(change.path.clone());
                }
            }
            "R" => {
                if let Some(old_path) = &change.old_path {
                    renamed.push((old_path.clone(), change.path.clone()));
                }
            }
            "A" | "M" => {
                let absolute = repo_root.join(&change.path);
                if !absolute.is_file() {
                    continue;
                }
                let Some(language) = detect_language(&absolute) else {
                    continue;
                };
                let size = absolute.metadata().map(|m| m.len()).unwrap_or(0);
                if size > options.max_file_bytes {
                    store.record_indexing_diagnostic(
                        &run_id,
                        "scan",
                        "file_too_large",
                        "warning",
                        &format!("{} is {} bytes", change.path, size),
                        Some("Raise max_file_bytes or exclude the file."),
                        Some(&change.path),
                        Some(language.as_str()),
                    )?;
                    continue;
                }
                let Ok(content_hash) = compute_content_hash(&absolute) else {
                    continue;
                };
                languages.insert(change.path.clone(), language);
                changed.push(FileRecord {
                    path: change.path.clone(),
                    language: language.as_str().to_string(),
                    content_hash,
                    size_bytes: Some(size as i64),
                });
            }
            _ => {}
        }
    }

    // Languages for unchanged files that may need edge re-resolution.
    for (path, record) in &stored {
        if let Some(language) = Language::from_str_loose(&record.language) {
            languages.entry(path.clone()).or_insert(language);
        }
    }

    let files_seen = changes.len() as i64;
    if changed.is_empty() && deleted.is_empty() && renamed.is_empty() {
        return Ok(finish_stats(
            store,
            run_id,
            "incremental",
            files_seen,
            0,
            0,
            0,
            started,
            IndexTelemetry::default(),
            false,
        ));
    }

    let outcome = apply_changes(
        repo_root, store, &run_id, changed, deleted, renamed, &languages, options,
    )?;

    Ok(finish_stats(
        store,
        run_id,
        "incremental",
        files_seen,
        outcome.files_indexed,
        outcome.symbols_indexed,
        outcome.edges_indexed,
        started,
        outcome.telemetry,
        outcome.cancelled,
    ))
}

// ---------------------------------------------------------------------------
// Core change application
// ---------------------------------------------------------------------------

struct ApplyOutcome {
    files_indexed: i64,
    symbols_indexed: i64,
    edges_indexed: i64,
    telemetry: IndexTelemetry,
    cancelled: bool,
}

#[allow(clippy::too_many_arguments)]
fn apply_changes(
    repo_root: &Path,
    store: &Store,
    run_id: &str,
    changed: Vec<FileRecord>,
    deleted: Vec<String>,
    renamed: Vec<(String, String)>,
    languages: &HashMap<String, Language>,
    options: &IndexOptions,
) -> Result<ApplyOutcome> {
    let mut re_resolve: HashSet<String> = changed.iter().map(|r| r.path.clone()).collect();
    let mut was_cancelled = false;

    // Deletions first: capture dependents before their edges vanish.
    let mut deleted_sorted = deleted;
    deleted_sorted.sort();
    for path in &deleted_sorted {
        let old_ids = store.symbol_ids_for_file(path)?;
        for dependent in store.dependent_edge_files(&old_ids)? {
            if dependent != *path {
                re_resolve.insert(dependent);
            }
        }
        store.delete_file_graph(path)?;
        debug!(path = %path, "deleted file graph");
    }

    // Renames migrate rows in place; their edges need re-resolution.
    let mut renamed_sorted = renamed;
    renamed_sorted.sort();
    for (old_path, new_path) in &renamed_sorted {
        let old_ids = store.symbol_ids_for_file(old_path)?;
        for dependent in store.dependent_edge_files(&old_ids)? {
            if dependent != *old_path {
                re_resolve.insert(dependent);
            }
        }
        store.rename_file(old_path, new_path)?;
        re_resolve.remove(old_path);
        re_resolve.insert(new_path.clone());
    }

    store.upsert_files(&changed)?;

    // Parallel extraction of changed files, merged in path order.
    let jobs: Vec<(String, Language)> = changed
        .iter()
        .filter_map(|record| {
            languages
                .get(&record.path)
                .map(|language| (record.path.clone(), *language))
        })
        .collect();
    let (extractions, telemetry) = parallel_extract(repo_root, &jobs, options.workers);
    let mut extraction_by_path: HashMap<String, ExtractionJob> = HashMap::new();

    let mut symbols_indexed = 0i64;
    let mut files_indexed = 0i64;
    for job in extractions {
        if cancelled(options) {
            was_cancelled = true;
            break;
        }
        for diagnostic in &job.extraction.diagnostics {
            store.record_indexing_diagnostic(
                run_id,
                diagnostic.stage,
                diagnostic.category,
                diagnostic.severity,
                &diagnostic.message,
                Some(diagnostic.hint),
                Some(&job.path),
                Some(job.language.as_str()),
            )?;
            if options.strict && diagnostic.severity == "error" {
                return Err(Error::Parse(diagnostic.message.clone()));
            }
        }

        let old_ids = store.symbol_ids_for_file(&job.path)?;
        for dependent in store.dependent_edge_files(&old_ids)? {
            if dependent != job.path {
                re_resolve.insert(dependent);
            }
        }

        let mut symbols: Vec<SymbolRecord> = job.extraction.symbols.clone();
        symbols.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
        });
        match store.replace_file_symbols(&job.path, &symbols) {
            Ok(()) => {
                symbols_indexed += symbols.len() as i64;
                files_indexed += 1;
            }
            Err(e) => {
                warn!(path = %job.path, error = %e, "symbol store write failed");
                store.record_indexing_diagnostic(
                    run_id,
                    "store_symbols",
                    "database_write_failure",
                    "error",
                    &e.to_string(),
                    Some("Check SQLite schema compatibility and writable storage."),
                    Some(&job.path),
                    Some(job.language.as_str()),
                )?;
                if options.strict {
                    return Err(e);
                }
                continue;
            }
        }
        extraction_by_path.insert(job.path.clone(), job);
    }

    // Edge resolution after all symbols for the run exist.
    let mut edges_indexed = 0i64;
    if !was_cancelled {
        edges_indexed = resolve_edges(
            repo_root,
            store,
            run_id,
            &re_resolve,
            &mut extraction_by_path,
            languages,
            options,
            &mut was_cancelled,
        )?;
    }

    // Rank refresh is unconditional for any run that mutated the store.
    if !was_cancelled {
        if let Err(e) = recompute_pagerank(store.conn(), PAGERANK_DAMPING, PAGERANK_EPSILON) {
            store.record_indexing_diagnostic(
                run_id,
                "pagerank",
                "pagerank_failure",
                "error",
                &e.to_string(),
                Some("Inspect graph integrity before recomputing PageRank."),
                None,
                None,
            )?;
            if options.strict {
                return Err(e);
            }
        }
        // Final step: invalidate the response cache.
        store.bump_cache_epoch()?;
    }

    Ok(ApplyOutcome {
        files_indexed,
        symbols_indexed,
        edges_indexed,
        telemetry,
        cancelled: was_cancelled,
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve_edges(
    repo_root: &Path,
    store: &Store,
    run_id: &str,
    re_resolve: &HashSet<String>,
    extraction_by_path: &mut HashMap<String, ExtractionJob>,
    languages: &HashMap<String, Language>,
    options: &IndexOptions,
    was_cancelled: &mut bool,
) -> Result<i64> {
    let files_map = store.files_map()?;
    let file_languages: HashMap<String, String> = files_map
        .iter()
        .map(|(path, record)| (path.clone(), record.language.clone()))
        .collect();
    let all_symbols = store.symbol_summaries()?;
    let mut by_file: HashMap<&str, Vec<SymbolSummary>> = HashMap::new();
    for summary in &all_symbols {
        by_file
            .entry(summary.file_path.as_str())
            .or_default()
            .push(summary.clone());
    }
    let mut by_qualified: HashMap<(String, String), i64> = HashMap::new();
    for summary in &all_symbols {
        by_qualified
            .entry((summary.qualified_name.clone(), summary.file_path.clone()))
            .and_modify(|id| *id = (*id).min(summary.id))
            .or_insert(summary.id);
    }

    let mut paths: Vec<String> = re_resolve
        .iter()
        .filter(|path| files_map.contains_key(*path))
        .cloned()
        .collect();
    paths.sort();

    let mut edges_indexed = 0i64;
    for path in paths {
        if cancelled(options) {
            *was_cancelled = true;
            break;
        }
        let Some(language) = languages
            .get(&path)
            .copied()
            .or_else(|| Language::from_str_loose(&file_languages[&path]))
        else {
            continue;
        };

        let job = match extraction_by_path.remove(&path) {
            Some(job) => job,
            None => extract_file_worker(repo_root, &path, language),
        };
        if job
            .extraction
            .diagnostics
            .iter()
            .any(|d| d.severity == "error")
        {
            // Unreadable or unparseable dependents keep no stale edges.
            store.replace_file_edges(&path, &[])?;
            continue;
        }

        let file_id = stable_file_id(&path);
        let mut edges: Vec<EdgeRecord> = Vec::new();
        let empty = Vec::new();
        let file_symbols = by_file.get(path.as_str()).unwrap_or(&empty);

        // Imports: file-level IMPORTS plus symbol-level IMPORTS_SYMBOL.
        let resolved_imports = resolve_imports(
            &repo_root.to_string_lossy(),
            &path,
            language,
            &job.extraction.imports,
            &file_languages,
        );
        let mut external = Vec::new();
        for resolved in &resolved_imports {
            match &resolved.resolved_path {
                None => external.push(external_dep(resolved)),
                Some(target_path) => {
                    edges.push(EdgeRecord {
                        source_id: file_id,
                        target_id: stable_file_id(target_path),
                        source_type: "file".into(),
                        target_type: "file".into(),
                        relationship: Relationship::Imports.as_str().into(),
                        file_path: Some(path.clone()),
                        line_number: Some(resolved.record.line_number),
                        confidence: 1.0,
                    });
                    for name in &resolved.record.imported_names {
                        if name == "*" {
                            continue;
                        }
                        let target_symbol = by_file
                            .get(target_path.as_str())
                            .and_then(|symbols| symbols.iter().find(|s| &s.name == name));
                        if let Some(target) = target_symbol {
                            edges.push(EdgeRecord {
                                source_id: file_id,
                                target_id: target.id,
                                source_type: "file".into(),
                                target_type: "symbol".into(),
                                relationship: Relationship::ImportsSymbol.as_str().into(),
                                file_path: Some(path.clone()),
                                line_number: Some(resolved.record.line_number),
                                confidence: 1.0,
                            });
                        }
                    }
                }
            }
        }

        // DEFINES for top-level symbols, HAS_METHOD from parent links.
        let parent_links = store.parent_links_for_file(&path)?;
        let child_ids: HashSet<i64> = parent_links.iter().map(|(_, child, _)| *child).collect();
        for summary in file_symbols {
            if !child_ids.contains(&summary.id) {
                edges.push(EdgeRecord {
                    source_id: file_id,
                    target_id: summary.id,
                    source_type: "file".into(),
                    target_type: "symbol".into(),
                    relationship: Relationship::Defines.as_str().into(),
                    file_path: Some(path.clone()),
                    line_number: Some(summary.start_line),
                    confidence: 1.0,
                });
            }
        }
        for (parent_id, child_id, child_line) in &parent_links {
            edges.push(EdgeRecord {
                source_id: *parent_id,
                target_id: *child_id,
                source_type: "symbol".into(),
                target_type: "symbol".into(),
                relationship: Relationship::HasMethod.as_str().into(),
                file_path: Some(path.clone()),
                line_number: Some(*child_line),
                confidence: 1.0,
            });
        }

        // Heritage: EXTENDS / IMPLEMENTS by supertype name.
        for heritage in &job.extraction.heritage {
            let Some(&subtype_id) =
                by_qualified.get(&(heritage.subtype_qualified.clone(), path.clone()))
            else {
                continue;
            };
            let candidates: Vec<&SymbolSummary> = all_symbols
                .iter()
                .filter(|s| {
                    s.name == heritage.supertype_name
                        && (s.kind == "class" || s.kind == "interface")
                        && s.id != subtype_id
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let same_file: Vec<&SymbolSummary> = candidates
                .iter()
                .filter(|s| s.file_path == path)
                .copied()
                .collect();
            let pool = if same_file.is_empty() {
                &candidates
            } else {
                &same_file
            };
            let mut sorted = pool.clone();
            sorted.sort_by(|a, b| {
                b.pagerank_score
                    .partial_cmp(&a.pagerank_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
            let target = sorted[0];
            edges.push(EdgeRecord {
                source_id: subtype_id,
                target_id: target.id,
                source_type: "symbol".into(),
                target_type: "symbol".into(),
                relationship: heritage.relationship.into(),
                file_path: Some(path.clone()),
                line_number: Some(heritage.line_number),
                confidence: if pool.len() == 1 { 1.0 } else { 0.8 },
            });
        }

        // Calls through the cascading resolver.
        let hints =
            load_receiver_type_hints(repo_root, &path, options.semantic_hints_path.as_deref());
        let resolution = resolve_call_edges(
            &job.source,
            &path,
            &job.extraction.call_sites,
            file_symbols,
            &all_symbols,
            &hints,
        );
        edges.extend(resolution.edges);

        if let Err(e) = store
            .replace_external_deps(&path, &external)
            .and_then(|_| store.replace_file_edges(&path, &edges))
        {
            store.record_indexing_diagnostic(
                run_id,
                "store_edges",
                "database_write_failure",
                "error",
                &e.to_string(),
                Some("Check SQLite schema compatibility and writable storage."),
                Some(&path),
                Some(language.as_str()),
            )?;
            if options.strict {
                return Err(e);
            }
            continue;
        }
        edges_indexed += edges.len() as i64;
    }
    Ok(edges_indexed)
}

// ---------------------------------------------------------------------------
// Stats assembly
// ---------------------------------------------------------------------------

fn record_scan_diagnostics(store: &Store, run_id: &str, scan: &ScanOutcome) -> Result<()> {
    for (path, size) in &scan.oversized {
        store.record_indexing_diagnostic(
            run_id,
            "scan",
            "file_too_large",
            "warning",
            &format!("{path} is {size} bytes"),
            Some("Raise max_file_bytes or exclude the file."),
            Some(path),
            None,
        )?;
    }
    for (path, message) in &scan.unreadable {
        store.record_indexing_diagnostic(
            run_id,
            "scan",
            "io_error",
            "error",
            message,
            Some("Ensure the engine can read this path and rerun indexing."),
            Some(path),
            None,
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish_stats(
    store: &Store,
    run_id: String,
    mode: &str,
    files_seen: i64,
    files_indexed: i64,
    symbols_indexed: i64,
    edges_indexed: i64,
    started: Instant,
    telemetry: IndexTelemetry,
    was_cancelled: bool,
) -> IndexStats {
    let elapsed_ms = started.elapsed().as_millis() as i64;
    let diagnostics_total = store
        .summarize_indexing_diagnostics(Some(&run_id))
        .map(|s| s.total)
        .unwrap_or(0);
    info!(
        run_id = %run_id,
        mode, files_seen, files_indexed, symbols_indexed, edges_indexed, elapsed_ms,
        "index run complete"
    );
    IndexStats {
        run_id,
        files_seen,
        files_indexed,
        symbols_indexed,
        edges_indexed,
        elapsed_ms,
        cancelled: was_cancelled,
        telemetry,
        progress_snapshots: progress_snapshots(
            mode,
            files_seen,
            files_indexed,
            symbols_indexed,
            edges_indexed,
            elapsed_ms,
        ),
        diagnostics_total,
    }
}

fn progress_snapshots(
    mode: &str,
    files_seen: i64,
    files_indexed: i64,
    symbols_indexed: i64,
    edges_indexed: i64,
    elapsed_ms: i64,
) -> Vec<ProgressSnapshot> {
    let _ = (mode, symbols_indexed);
    vec![
        ProgressSnapshot {
            step: "scan".into(),
            completed: files_seen,
            total: files_seen,
            progress_pct: 20,
            elapsed_ms: None,
        },
        ProgressSnapshot {
            step: "extract_symbols".into(),
            completed: files_indexed,
            total: files_indexed,
            progress_pct: 55,
            elapsed_ms: None,
        },
        ProgressSnapshot {
            step: "build_edges".into(),
            completed: edges_indexed,
            total: edges_indexed,
            progress_pct: 85,
            elapsed_ms: None,
        },
        ProgressSnapshot {
            step: "complete".into(),
            completed: files_indexed,
            total: files_indexed,
            progress_pct: 100,
            elapsed_ms: Some(elapsed_ms),
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
