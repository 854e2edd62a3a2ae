//! The graph store: a typed handle over the embedded SQLite database.
//!
//! The store owns a single connection in WAL mode; statements go through
//! `prepare_cached` so hot paths reuse compiled statements. Mutation is
//! exposed only as whole-file operations (replace, delete, rename), each
//! running in one transaction and each bumping the cache epoch, which
//! keeps re-indexing idempotent and the response cache honest.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::indexer::callgraph::SymbolSummary;
use crate::indexer::extract::to_module_name;
use crate::models::{
    EdgeContractRecord, EdgeRecord, ExternalDepRecord, FileRecord, SymbolKey, SymbolRecord,
};
use crate::store::schema;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One pending entry of the sync outbound queue.
#[derive(Debug, Clone, Serialize)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub repo_id: String,
    pub local_snapshot: String,
    pub payload_json: String,
    pub status: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
}

/// One quarantined artifact.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineRow {
    pub artifact_id: String,
    pub reason: String,
    pub quarantined_at: Option<String>,
}

/// Persisted circuit-breaker state for a remote.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerRow {
    pub state: String,
    pub failure_count: i64,
    pub opened_at_utc: Option<String>,
}

/// One indexing diagnostic row.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRow {
    pub id: i64,
    pub run_id: String,
    pub stage: String,
    pub category: String,
    pub severity: String,
    pub file_path: Option<String>,
    pub language: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

/// Aggregated diagnostics for a run (or the whole store).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsSummary {
    pub total: i64,
    pub by_stage: HashMap<String, i64>,
    pub by_category: HashMap<String, i64>,
    pub by_severity: HashMap<String, i64>,
    pub latest_run_id: Option<String>,
}

/// One recorded tool-metric observation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetricRow {
    pub repo_id: Option<String>,
    pub tool_name: String,
    pub latency_ms: f64,
    pub success: bool,
    pub mode: String,
    pub result_size: Option<i64>,
    pub error_message: Option<String>,
}

/// A trusted signing key row.
#[derive(Debug, Clone, Serialize)]
pub struct SigningKeyRow {
    pub repo_id: String,
    pub key_id: String,
    pub algorithm: String,
    pub public_key: String,
    pub purpose: String,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Typed handle over the Bombe SQLite store.
pub struct Store {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("db_path", &self.db_path).finish()
    }
}

impl Store {
    /// Open (or create) the store at `db_path`, apply the schema, and run
    /// pending migrations. Fails with `SCHEMA_INCOMPATIBLE` when the file
    /// was written by a newer version of the code.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::initialize(conn, Some(db_path.to_path_buf()))
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        for stmt in schema::FTS_STATEMENTS {
            // Best-effort: builds without FTS5 fall back to LIKE search.
            let _ = conn.execute_batch(stmt);
        }
        schema::migrate_schema(&conn)?;
        Ok(Self { conn, db_path })
    }

    /// Raw connection for read-side query engines.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -------------------------------------------------------------------
    // repo_meta / cache epoch
    // -------------------------------------------------------------------

    pub fn get_repo_meta(&self, key: &str) -> Result<Option<String>> {
        match self.conn.query_row(
            "SELECT value FROM repo_meta WHERE key = ?1 LIMIT 1;",
            params![key],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_repo_meta(&self, key: &str, value: &str) -> Result<()> {
        set_meta(&self.conn, key, value)
    }

    /// Current cache epoch, initialising to 1 if absent.
    pub fn cache_epoch(&self) -> Result<i64> {
        match self.get_repo_meta("cache_epoch")? {
            None => {
                self.set_repo_meta("cache_epoch", "1")?;
                Ok(1)
            }
            Some(v) => Ok(v.parse::<i64>().unwrap_or(1).max(1)),
        }
    }

    /// Increment the cache epoch and return the new value.
    pub fn bump_cache_epoch(&self) -> Result<i64> {
        bump_epoch(&self.conn)
    }

    // -------------------------------------------------------------------
    // Files
    // -------------------------------------------------------------------

    pub fn upsert_files(&self, records: &[FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO files (path, language, content_hash, size_bytes)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                     language = excluded.language,
                     content_hash = excluded.content_hash,
                     size_bytes = excluded.size_bytes,
                     last_indexed_at = CURRENT_TIMESTAMP;",
            )?;
            for record in records {
                stmt.execute(params![
                    record.path,
                    record.language,
                    record.content_hash,
                    record.size_bytes
                ])?;
            }
        }
        bump_epoch(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// All stored file records keyed by path.
    pub fn files_map(&self) -> Result<HashMap<String, FileRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path, language, content_hash, size_bytes FROM files;")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                language: row.get(1)?,
                content_hash: row.get(2)?,
                size_bytes: row.get(3)?,
            })
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let record = row?;
            map.insert(record.path.clone(), record);
        }
        Ok(map)
    }

    // -------------------------------------------------------------------
    // Whole-file mutators
    // -------------------------------------------------------------------

    /// Atomically replace every symbol (with parameters and FTS rows) for
    /// one file. Edges pointing into the replaced symbol set, from any
    /// file, are removed in the same transaction.
    pub fn replace_file_symbols(&self, file_path: &str, symbols: &[SymbolRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let old_ids = symbol_ids_for_file_tx(&tx, file_path)?;
            for id in &old_ids {
                delete_symbol_refs(&tx, *id)?;
            }
            tx.execute(
                "DELETE FROM parameters WHERE symbol_id IN
                 (SELECT id FROM symbols WHERE file_path = ?1);",
                params![file_path],
            )?;
            tx.execute("UPDATE symbols SET parent_symbol_id = NULL WHERE file_path = ?1;", params![file_path])?;
            tx.execute("DELETE FROM symbols WHERE file_path = ?1;", params![file_path])?;

            let mut seen: HashSet<(String, i64, i64)> = HashSet::new();
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO symbols (
                     name, qualified_name, kind, file_path, start_line, end_line,
                     signature, return_type, visibility, is_async, is_static,
                     parent_symbol_id, docstring, pagerank_score
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, ?13);",
            )?;
            let mut insert_param = tx.prepare_cached(
                "INSERT INTO parameters (symbol_id, name, type, position, default_value)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for symbol in symbols {
                let identity = (
                    symbol.qualified_name.clone(),
                    symbol.start_line,
                    symbol.end_line,
                );
                if !seen.insert(identity) {
                    continue;
                }
                let inserted = insert.execute(params![
                    symbol.name,
                    symbol.qualified_name,
                    symbol.kind,
                    file_path,
                    symbol.start_line,
                    symbol.end_line,
                    symbol.signature,
                    symbol.return_type,
                    symbol.visibility,
                    symbol.is_async as i64,
                    symbol.is_static as i64,
                    symbol.docstring,
                    symbol.pagerank_score,
                ])?;
                if inserted == 0 {
                    continue;
                }
                let symbol_id = tx.last_insert_rowid();
                for parameter in &symbol.parameters {
                    insert_param.execute(params![
                        symbol_id,
                        parameter.name,
                        parameter.type_,
                        parameter.position,
                        parameter.default_value,
                    ])?;
                }
                let _ = tx.execute(
                    "INSERT INTO symbol_fts(symbol_id, name, qualified_name, docstring, signature)
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        symbol_id,
                        symbol.name,
                        symbol.qualified_name,
                        symbol.docstring.as_deref().unwrap_or(""),
                        symbol.signature.as_deref().unwrap_or(""),
                    ],
                );
            }

            // Link methods to their innermost containing class.
            tx.execute(
                "UPDATE symbols SET parent_symbol_id = (
                     SELECT p.id FROM symbols p
                     WHERE p.file_path = symbols.file_path
                       AND p.id != symbols.id
                       AND p.kind IN ('class', 'interface')
                       AND p.start_line <= symbols.start_line
                       AND p.end_line >= symbols.end_line
                     ORDER BY (p.end_line - p.start_line) ASC
                     LIMIT 1
                 )
                 WHERE file_path = ?1 AND kind = 'method';",
                params![file_path],
            )?;
        }
        bump_epoch(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Atomically replace every edge recorded against one file.
    pub fn replace_file_edges(&self, file_path: &str, edges: &[EdgeRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            tx.execute("DELETE FROM edges WHERE file_path = ?1;", params![file_path])?;
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO edges (
                     source_id, target_id, source_type, target_type, relationship,
                     file_path, line_number, confidence
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            )?;
            for edge in edges {
                stmt.execute(params![
                    edge.source_id,
                    edge.target_id,
                    edge.source_type,
                    edge.target_type,
                    edge.relationship,
                    edge.file_path,
                    edge.line_number,
                    edge.confidence,
                ])?;
            }
        }
        bump_epoch(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Atomically replace external dependency records for one file.
    pub fn replace_external_deps(&self, file_path: &str, deps: &[ExternalDepRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            tx.execute(
                "DELETE FROM external_deps WHERE file_path = ?1;",
                params![file_path],
            )?;
            let mut stmt = tx.prepare_cached(
                "INSERT INTO external_deps (file_path, import_statement, module_name, line_number)
                 VALUES (?1, ?2, ?3, ?4);",
            )?;
            for dep in deps {
                stmt.execute(params![
                    dep.file_path,
                    dep.import_statement,
                    dep.module_name,
                    dep.line_number
                ])?;
            }
        }
        bump_epoch(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every trace of one file: symbols, parameters, FTS rows,
    /// edges (including edges from other files into its symbols),
    /// external deps, and the file row itself.
    pub fn delete_file_graph(&self, file_path: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let old_ids = symbol_ids_for_file_tx(&tx, file_path)?;
            for id in &old_ids {
                delete_symbol_refs(&tx, *id)?;
            }
            tx.execute("DELETE FROM edges WHERE file_path = ?1;", params![file_path])?;
            tx.execute(
                "DELETE FROM external_deps WHERE file_path = ?1;",
                params![file_path],
            )?;
            tx.execute(
                "DELETE FROM parameters WHERE symbol_id IN
                 (SELECT id FROM symbols WHERE file_path = ?1);",
                params![file_path],
            )?;
            tx.execute("UPDATE symbols SET parent_symbol_id = NULL WHERE file_path = ?1;", params![file_path])?;
            tx.execute("DELETE FROM symbols WHERE file_path = ?1;", params![file_path])?;
            tx.execute("DELETE FROM files WHERE path = ?1;", params![file_path])?;
        }
        bump_epoch(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Move a file's graph to a new path. Path-derived qualified names
    /// (Python and TypeScript modules) are recomputed; package-derived
    /// names are untouched. A missing source path is a no-op.
    pub fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let moved = {
            let source = tx.query_row(
                "SELECT language, content_hash, size_bytes, last_indexed_at
                 FROM files WHERE path = ?1;",
                params![old_path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            );
            let (language, content_hash, size_bytes, last_indexed_at) = match source {
                Ok(v) => v,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            tx.execute(
                "INSERT INTO files (path, language, content_hash, size_bytes, last_indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET
                     language = excluded.language,
                     content_hash = excluded.content_hash,
                     size_bytes = excluded.size_bytes,
                     last_indexed_at = excluded.last_indexed_at;",
                params![new_path, language, content_hash, size_bytes, last_indexed_at],
            )?;
            tx.execute(
                "UPDATE symbols SET file_path = ?1 WHERE file_path = ?2;",
                params![new_path, old_path],
            )?;

            if language == "python" || language == "typescript" {
                let old_module = to_module_name(old_path);
                let new_module = to_module_name(new_path);
                tx.execute(
                    "UPDATE symbols
                     SET qualified_name = ?1 || substr(qualified_name, ?2)
                     WHERE file_path = ?3
                       AND (qualified_name = ?4 OR qualified_name LIKE ?4 || '.%');",
                    params![
                        new_module,
                        old_module.len() as i64 + 1,
                        new_path,
                        old_module
                    ],
                )?;
            }

            tx.execute(
                "UPDATE edges SET file_path = ?1 WHERE file_path = ?2;",
                params![new_path, old_path],
            )?;
            tx.execute(
                "UPDATE external_deps SET file_path = ?1 WHERE file_path = ?2;",
                params![new_path, old_path],
            )?;
            tx.execute("DELETE FROM files WHERE path = ?1;", params![old_path])?;

            // Refresh FTS rows so searches see the recomputed names.
            let ids = symbol_ids_for_file_tx(&tx, new_path)?;
            for id in &ids {
                let _ = tx.execute("DELETE FROM symbol_fts WHERE symbol_id = ?1;", params![id]);
            }
            let rows: Vec<(i64, String, String, String, String)> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id, name, qualified_name, COALESCE(docstring, ''),
                            COALESCE(signature, '')
                     FROM symbols WHERE file_path = ?1;",
                )?;
                let collected = stmt
                    .query_map(params![new_path], |row| {
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
                collected
            };
            for (id, name, qualified_name, docstring, signature) in rows {
                let _ = tx.execute(
                    "INSERT INTO symbol_fts(symbol_id, name, qualified_name, docstring, signature)
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![id, name, qualified_name, docstring, signature],
                );
            }
            true
        };
        if moved {
            bump_epoch(&tx)?;
        }
        tx.commit()?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Symbol / edge reads
    // -------------------------------------------------------------------

    /// Resolver-grade summaries of every symbol.
    pub fn symbol_summaries(&self) -> Result<Vec<SymbolSummary>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, qualified_name, kind, file_path, start_line, end_line,
                    pagerank_score
             FROM symbols ORDER BY id;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SymbolSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                qualified_name: row.get(2)?,
                kind: row.get(3)?,
                file_path: row.get(4)?,
                start_line: row.get(5)?,
                end_line: row.get(6)?,
                pagerank_score: row.get::<_, f64>(7).unwrap_or(0.0),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn symbol_ids_for_file(&self, file_path: &str) -> Result<Vec<i64>> {
        symbol_ids_for_file_tx(&self.conn, file_path)
    }

    /// Files (other than the given set) whose edges reference any of the
    /// given symbol ids. These need edge re-resolution after a replace.
    pub fn dependent_edge_files(&self, symbol_ids: &[i64]) -> Result<HashSet<String>> {
        let mut dependents = HashSet::new();
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT file_path FROM edges
             WHERE file_path IS NOT NULL
               AND ((source_type = 'symbol' AND source_id = ?1)
                 OR (target_type = 'symbol' AND target_id = ?1));",
        )?;
        for id in symbol_ids {
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            for row in rows {
                dependents.insert(row?);
            }
        }
        Ok(dependents)
    }

    /// (class id, method id, method start line) links for one file.
    pub fn parent_links_for_file(&self, file_path: &str) -> Result<Vec<(i64, i64, i64)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT parent_symbol_id, id, start_line FROM symbols
             WHERE file_path = ?1 AND parent_symbol_id IS NOT NULL
             ORDER BY start_line;",
        )?;
        let rows = stmt.query_map(params![file_path], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn symbol_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM symbols;", [], |row| row.get(0))?)
    }

    pub fn edge_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM edges;", [], |row| row.get(0))?)
    }

    /// Identity keys of every symbol, sorted. Used for determinism and
    /// idempotence checks.
    pub fn symbol_keys(&self) -> Result<Vec<SymbolKey>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT qualified_name, file_path, start_line, end_line, signature FROM symbols;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SymbolKey::from_fields(
                &row.get::<_, String>(0)?,
                &row.get::<_, String>(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get::<_, Option<String>>(4)?.as_deref(),
            ))
        })?;
        let mut keys: Vec<SymbolKey> = rows.filter_map(|r| r.ok()).collect();
        keys.sort();
        Ok(keys)
    }

    /// Qualified edge keys (source qname, target qname, relationship),
    /// sorted. File-level endpoints render as `file:<path>`.
    pub fn edge_keys(&self) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT
                 CASE e.source_type WHEN 'symbol'
                     THEN COALESCE(s.qualified_name, 'missing') ELSE 'file:' || COALESCE(e.file_path, '') END,
                 CASE e.target_type WHEN 'symbol'
                     THEN COALESCE(t.qualified_name, 'missing') ELSE 'file:' || CAST(e.target_id AS TEXT) END,
                 e.relationship
             FROM edges e
             LEFT JOIN symbols s ON e.source_type = 'symbol' AND s.id = e.source_id
             LEFT JOIN symbols t ON e.target_type = 'symbol' AND t.id = e.target_id;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut keys: Vec<(String, String, String)> = rows.filter_map(|r| r.ok()).collect();
        keys.sort();
        Ok(keys)
    }

    // -------------------------------------------------------------------
    // Backup / restore
    // -------------------------------------------------------------------

    /// Online backup to `destination` via the SQLite backup API.
    pub fn backup_to(&self, destination: &Path) -> Result<PathBuf> {
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut dst = Connection::open(destination)?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(destination.to_path_buf())
    }

    /// Restore this store's contents from a backup file. Refuses a
    /// missing source.
    pub fn restore_from(&mut self, source: &Path) -> Result<()> {
        if !source.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Backup file does not exist: {}", source.display()),
            )));
        }
        let src = Connection::open(source)?;
        let backup = rusqlite::backup::Backup::new(&src, &mut self.conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Sync queue
    // -------------------------------------------------------------------

    pub fn enqueue_sync_delta(
        &self,
        repo_id: &str,
        local_snapshot: &str,
        payload_json: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_queue(repo_id, local_snapshot, payload_json, status)
             VALUES (?1, ?2, ?3, 'queued');",
            params![repo_id, local_snapshot, payload_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_pending_sync_deltas(&self, repo_id: &str, limit: i64) -> Result<Vec<SyncQueueEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, repo_id, local_snapshot, payload_json, status, attempt_count, last_error
             FROM sync_queue
             WHERE repo_id = ?1 AND status IN ('queued', 'retry')
             ORDER BY created_at ASC, id ASC
             LIMIT ?2;",
        )?;
        let rows = stmt.query_map(params![repo_id, limit.max(1)], |row| {
            Ok(SyncQueueEntry {
                id: row.get(0)?,
                repo_id: row.get(1)?,
                local_snapshot: row.get(2)?,
                payload_json: row.get(3)?,
                status: row.get(4)?,
                attempt_count: row.get(5)?,
                last_error: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn mark_sync_delta_status(
        &self,
        queue_id: i64,
        status: &str,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue
             SET status = ?1, last_error = ?2,
                 attempt_count = attempt_count + 1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3;",
            params![status, last_error, queue_id],
        )?;
        Ok(())
    }

    /// Reset entries with unknown statuses back to 'retry'. Returns the
    /// number of rows fixed.
    pub fn normalize_sync_queue_statuses(&self) -> Result<i64> {
        let fixed = self.conn.execute(
            "UPDATE sync_queue
             SET status = 'retry', updated_at = CURRENT_TIMESTAMP
             WHERE status NOT IN ('queued', 'retry', 'pushed', 'failed');",
            [],
        )?;
        Ok(fixed as i64)
    }

    // -------------------------------------------------------------------
    // Artifacts: quarantine + pins
    // -------------------------------------------------------------------

    pub fn quarantine_artifact(&self, artifact_id: &str, reason: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO artifact_quarantine(artifact_id, reason, quarantined_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(artifact_id) DO UPDATE SET
                 reason = excluded.reason,
                 quarantined_at = excluded.quarantined_at;",
            params![artifact_id, reason],
        )?;
        Ok(())
    }

    pub fn remove_artifact_quarantine(&self, artifact_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM artifact_quarantine WHERE artifact_id = ?1;",
            params![artifact_id],
        )?;
        Ok(())
    }

    pub fn is_artifact_quarantined(&self, artifact_id: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM artifact_quarantine WHERE artifact_id = ?1 LIMIT 1;",
                params![artifact_id],
                |_| Ok(()),
            )
            .is_ok())
    }

    pub fn list_quarantined_artifacts(&self, limit: i64) -> Result<Vec<QuarantineRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT artifact_id, reason, quarantined_at FROM artifact_quarantine
             ORDER BY quarantined_at DESC, artifact_id ASC LIMIT ?1;",
        )?;
        let rows = stmt.query_map(params![limit.max(1)], |row| {
            Ok(QuarantineRow {
                artifact_id: row.get(0)?,
                reason: row.get(1)?,
                quarantined_at: row.get(2)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn set_artifact_pin(&self, repo_id: &str, snapshot_id: &str, artifact_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO artifact_pins(repo_id, snapshot_id, artifact_id, pinned_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(repo_id, snapshot_id) DO UPDATE SET
                 artifact_id = excluded.artifact_id,
                 pinned_at = excluded.pinned_at;",
            params![repo_id, snapshot_id, artifact_id],
        )?;
        Ok(())
    }

    pub fn get_artifact_pin(&self, repo_id: &str, snapshot_id: &str) -> Result<Option<String>> {
        match self.conn.query_row(
            "SELECT artifact_id FROM artifact_pins
             WHERE repo_id = ?1 AND snapshot_id = ?2 LIMIT 1;",
            params![repo_id, snapshot_id],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // -------------------------------------------------------------------
    // Circuit breakers, events, metrics
    // -------------------------------------------------------------------

    pub fn set_circuit_breaker_state(
        &self,
        repo_id: &str,
        state: &str,
        failure_count: i64,
        opened_at_utc: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO circuit_breakers(repo_id, state, failure_count, opened_at_utc)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(repo_id) DO UPDATE SET
                 state = excluded.state,
                 failure_count = excluded.failure_count,
                 opened_at_utc = excluded.opened_at_utc;",
            params![repo_id, state, failure_count.max(0), opened_at_utc],
        )?;
        Ok(())
    }

    pub fn get_circuit_breaker_state(&self, repo_id: &str) -> Result<Option<BreakerRow>> {
        match self.conn.query_row(
            "SELECT state, failure_count, opened_at_utc FROM circuit_breakers
             WHERE repo_id = ?1 LIMIT 1;",
            params![repo_id],
            |row| {
                Ok(BreakerRow {
                    state: row.get(0)?,
                    failure_count: row.get(1)?,
                    opened_at_utc: row.get(2)?,
                })
            },
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record_sync_event(
        &self,
        repo_id: &str,
        level: &str,
        event_type: &str,
        detail: Option<&serde_json::Value>,
    ) -> Result<()> {
        let detail_json = detail.map(crate::observability::canonical_json);
        self.conn.execute(
            "INSERT INTO sync_events(repo_id, level, event_type, detail_json)
             VALUES (?1, ?2, ?3, ?4);",
            params![repo_id, level, event_type, detail_json],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_metric(
        &self,
        tool_name: &str,
        latency_ms: f64,
        success: bool,
        mode: &str,
        repo_id: Option<&str>,
        result_size: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tool_metrics(repo_id, tool_name, latency_ms, success, mode, result_size, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                repo_id,
                tool_name,
                latency_ms,
                success as i64,
                mode,
                result_size,
                error_message
            ],
        )?;
        Ok(())
    }

    /// Most recent metrics for one tool, newest first.
    pub fn recent_tool_metrics(&self, tool_name: &str, limit: i64) -> Result<Vec<ToolMetricRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT repo_id, tool_name, latency_ms, success, mode, result_size, error_message
             FROM tool_metrics WHERE tool_name = ?1
             ORDER BY id DESC LIMIT ?2;",
        )?;
        let rows = stmt.query_map(params![tool_name, limit.max(1)], |row| {
            Ok(ToolMetricRow {
                repo_id: row.get(0)?,
                tool_name: row.get(1)?,
                latency_ms: row.get(2)?,
                success: row.get::<_, i64>(3)? != 0,
                mode: row.get(4)?,
                result_size: row.get(5)?,
                error_message: row.get(6)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // -------------------------------------------------------------------
    // Indexing diagnostics
    // -------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn record_indexing_diagnostic(
        &self,
        run_id: &str,
        stage: &str,
        category: &str,
        severity: &str,
        message: &str,
        hint: Option<&str>,
        file_path: Option<&str>,
        language: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO indexing_diagnostics(
                 run_id, stage, category, severity, file_path, language, message, hint
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![run_id, stage, category, severity, file_path, language, message, hint],
        )?;
        Ok(())
    }

    pub fn list_indexing_diagnostics(
        &self,
        run_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DiagnosticRow>> {
        let (sql, has_run) = match run_id {
            Some(_) => (
                "SELECT id, run_id, stage, category, severity, file_path, language, message, hint
                 FROM indexing_diagnostics WHERE run_id = ?1 ORDER BY id DESC LIMIT ?2;",
                true,
            ),
            None => (
                "SELECT id, run_id, stage, category, severity, file_path, language, message, hint
                 FROM indexing_diagnostics ORDER BY id DESC LIMIT ?1;",
                false,
            ),
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(DiagnosticRow {
                id: row.get(0)?,
                run_id: row.get(1)?,
                stage: row.get(2)?,
                category: row.get(3)?,
                severity: row.get(4)?,
                file_path: row.get(5)?,
                language: row.get(6)?,
                message: row.get(7)?,
                hint: row.get(8)?,
            })
        };
        let rows: Vec<DiagnosticRow> = if has_run {
            stmt.query_map(params![run_id.unwrap(), limit.max(1)], map_row)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt.query_map(params![limit.max(1)], map_row)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(rows)
    }

    pub fn summarize_indexing_diagnostics(&self, run_id: Option<&str>) -> Result<DiagnosticsSummary> {
        let mut summary = DiagnosticsSummary::default();
        let where_sql = if run_id.is_some() { "WHERE run_id = ?1" } else { "" };

        let total_sql = format!("SELECT COUNT(*) FROM indexing_diagnostics {where_sql};");
        summary.total = match run_id {
            Some(rid) => self
                .conn
                .query_row(&total_sql, params![rid], |row| row.get(0))?,
            None => self.conn.query_row(&total_sql, [], |row| row.get(0))?,
        };

        for (column, target) in [
            ("stage", &mut summary.by_stage),
            ("category", &mut summary.by_category),
            ("severity", &mut summary.by_severity),
        ] {
            let sql = format!(
                "SELECT {column}, COUNT(*) FROM indexing_diagnostics {where_sql}
                 GROUP BY {column} ORDER BY {column};"
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows: Vec<(String, i64)> = match run_id {
                Some(rid) => stmt
                    .query_map(params![rid], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .filter_map(|r| r.ok())
                    .collect(),
                None => stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .filter_map(|r| r.ok())
                    .collect(),
            };
            for (key, count) in rows {
                target.insert(key, count);
            }
        }

        summary.latest_run_id = self
            .conn
            .query_row(
                "SELECT run_id FROM indexing_diagnostics ORDER BY id DESC LIMIT 1;",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(summary)
    }

    pub fn clear_indexing_diagnostics(&self, run_id: Option<&str>) -> Result<i64> {
        let deleted = match run_id {
            Some(rid) => self.conn.execute(
                "DELETE FROM indexing_diagnostics WHERE run_id = ?1;",
                params![rid],
            )?,
            None => self.conn.execute("DELETE FROM indexing_diagnostics;", [])?,
        };
        Ok(deleted as i64)
    }

    // -------------------------------------------------------------------
    // Trusted signing keys
    // -------------------------------------------------------------------

    pub fn set_trusted_signing_key(
        &self,
        repo_id: &str,
        key_id: &str,
        algorithm: &str,
        public_key: &str,
        purpose: Option<&str>,
        active: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO trusted_signing_keys(
                 repo_id, key_id, algorithm, public_key, purpose, active, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)
             ON CONFLICT(repo_id, key_id) DO UPDATE SET
                 algorithm = excluded.algorithm,
                 public_key = excluded.public_key,
                 purpose = excluded.purpose,
                 active = excluded.active,
                 updated_at = excluded.updated_at;",
            params![
                repo_id,
                key_id,
                algorithm,
                public_key,
                purpose.unwrap_or("default"),
                active as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_trusted_signing_key(
        &self,
        repo_id: &str,
        key_id: &str,
    ) -> Result<Option<SigningKeyRow>> {
        match self.conn.query_row(
            "SELECT repo_id, key_id, algorithm, public_key, purpose, active
             FROM trusted_signing_keys WHERE repo_id = ?1 AND key_id = ?2 LIMIT 1;",
            params![repo_id, key_id],
            |row| {
                Ok(SigningKeyRow {
                    repo_id: row.get(0)?,
                    key_id: row.get(1)?,
                    algorithm: row.get(2)?,
                    public_key: row.get(3)?,
                    purpose: row.get(4)?,
                    active: row.get::<_, i64>(5)? != 0,
                })
            },
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_trusted_signing_keys(
        &self,
        repo_id: &str,
        active_only: bool,
    ) -> Result<Vec<SigningKeyRow>> {
        let sql = if active_only {
            "SELECT repo_id, key_id, algorithm, public_key, purpose, active
             FROM trusted_signing_keys WHERE repo_id = ?1 AND active = 1 ORDER BY key_id;"
        } else {
            "SELECT repo_id, key_id, algorithm, public_key, purpose, active
             FROM trusted_signing_keys WHERE repo_id = ?1 ORDER BY key_id;"
        };
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(SigningKeyRow {
                repo_id: row.get(0)?,
                key_id: row.get(1)?,
                algorithm: row.get(2)?,
                public_key: row.get(3)?,
                purpose: row.get(4)?,
                active: row.get::<_, i64>(5)? != 0,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // -------------------------------------------------------------------
    // Contract reads for the sync plane
    // -------------------------------------------------------------------

    /// Symbol rows for a set of file paths (parameters omitted).
    pub fn symbols_for_paths(&self, paths: &[String]) -> Result<Vec<SymbolRecord>> {
        let mut out = Vec::new();
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, qualified_name, kind, file_path, start_line, end_line, signature,
                    return_type, visibility, is_async, is_static, parent_symbol_id, docstring,
                    pagerank_score
             FROM symbols WHERE file_path = ?1 ORDER BY start_line;",
        )?;
        for path in paths {
            let rows = stmt.query_map(params![path], |row| {
                Ok(SymbolRecord {
                    name: row.get(0)?,
                    qualified_name: row.get(1)?,
                    kind: row.get(2)?,
                    file_path: row.get(3)?,
                    start_line: row.get(4)?,
                    end_line: row.get(5)?,
                    signature: row.get(6)?,
                    return_type: row.get(7)?,
                    visibility: row.get(8)?,
                    is_async: row.get::<_, i64>(9)? != 0,
                    is_static: row.get::<_, i64>(10)? != 0,
                    parent_symbol_id: row.get(11)?,
                    docstring: row.get(12)?,
                    pagerank_score: row.get::<_, f64>(13).unwrap_or(0.0),
                    parameters: Vec::new(),
                })
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// Symbol-to-symbol edges recorded against a set of file paths as
    /// contract records with full symbol-key endpoints.
    pub fn edges_for_paths(&self, paths: &[String]) -> Result<Vec<EdgeContractRecord>> {
        let mut out = Vec::new();
        let mut stmt = self.conn.prepare_cached(
            "SELECT e.relationship, e.line_number, e.confidence,
                    src.qualified_name, src.file_path, src.start_line, src.end_line, src.signature,
                    dst.qualified_name, dst.file_path, dst.start_line, dst.end_line, dst.signature
             FROM edges e
             JOIN symbols src ON src.id = e.source_id
             JOIN symbols dst ON dst.id = e.target_id
             WHERE e.file_path = ?1
               AND e.source_type = 'symbol' AND e.target_type = 'symbol'
             ORDER BY e.id;",
        )?;
        for path in paths {
            let rows = stmt.query_map(params![path], |row| {
                Ok(EdgeContractRecord {
                    relationship: row.get(0)?,
                    line_number: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    confidence: row.get::<_, f64>(2).unwrap_or(0.0),
                    source: SymbolKey::from_fields(
                        &row.get::<_, String>(3)?,
                        &row.get::<_, String>(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get::<_, Option<String>>(7)?.as_deref(),
                    ),
                    target: SymbolKey::from_fields(
                        &row.get::<_, String>(8)?,
                        &row.get::<_, String>(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get::<_, Option<String>>(12)?.as_deref(),
                    ),
                    provenance: "local".to_string(),
                })
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn external_dep_count_for_paths(&self, paths: &[String]) -> Result<i64> {
        let mut total = 0i64;
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM external_deps WHERE file_path = ?1;")?;
        for path in paths {
            total += stmt.query_row(params![path], |row| row.get::<_, i64>(0))?;
        }
        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// Free helpers shared between mutators
// ---------------------------------------------------------------------------

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![key, value],
    )?;
    Ok(())
}

fn bump_epoch(conn: &Connection) -> Result<i64> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM repo_meta WHERE key = 'cache_epoch';",
            [],
            |row| row.get::<_, String>(0),
        )
        .map(|v| v.parse::<i64>().unwrap_or(0))
        .unwrap_or(0);
    let next = (current + 1).max(1);
    set_meta(conn, "cache_epoch", &next.to_string())?;
    Ok(next)
}

fn symbol_ids_for_file_tx(conn: &Connection, file_path: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM symbols WHERE file_path = ?1 ORDER BY id;")?;
    let rows = stmt.query_map(params![file_path], |row| row.get(0))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Into::into)
}

/// Remove everything hanging off one symbol id: FTS row and edges from
/// any file that point at it.
fn delete_symbol_refs(conn: &Connection, symbol_id: i64) -> Result<()> {
    let _ = conn.execute(
        "DELETE FROM symbol_fts WHERE symbol_id = ?1;",
        params![symbol_id],
    );
    conn.execute(
        "DELETE FROM edges
         WHERE (source_type = 'symbol' AND source_id = ?1)
            OR (target_type = 'symbol' AND target_id = ?1);",
        params![symbol_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
