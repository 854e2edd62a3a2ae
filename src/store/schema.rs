//! SQLite schema DDL and the forward-only migration framework.
//!
//! DDL statements are kept as individual constants executed with
//! `CREATE … IF NOT EXISTS`, so replaying them on an existing database is
//! safe and error reporting points at one statement. Migrations run
//! stepwise (v_n → v_{n+1}); each step executes inside a SAVEPOINT that
//! rolls back on failure, and every attempt is recorded in
//! `migration_history`.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version. Opening a store that reports a newer version
/// fails with `SCHEMA_INCOMPATIBLE`.
pub const SCHEMA_VERSION: i32 = 7;

/// Core DDL: 15 tables + 19 indexes.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- tables ----------------------------------------------------------
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        language TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        size_bytes INTEGER,
        last_indexed_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS symbols (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        kind TEXT NOT NULL,
        file_path TEXT NOT NULL REFERENCES files(path),
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        signature TEXT,
        return_type TEXT,
        visibility TEXT,
        is_async BOOLEAN DEFAULT FALSE,
        is_static BOOLEAN DEFAULT FALSE,
        parent_symbol_id INTEGER REFERENCES symbols(id),
        docstring TEXT,
        pagerank_score REAL DEFAULT 0.0,
        UNIQUE(qualified_name, file_path, start_line, end_line)
    );",
    "CREATE TABLE IF NOT EXISTS parameters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol_id INTEGER NOT NULL REFERENCES symbols(id),
        name TEXT NOT NULL,
        type TEXT,
        position INTEGER NOT NULL,
        default_value TEXT,
        UNIQUE(symbol_id, position)
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id INTEGER NOT NULL,
        target_id INTEGER NOT NULL,
        source_type TEXT NOT NULL,
        target_type TEXT NOT NULL,
        relationship TEXT NOT NULL,
        file_path TEXT,
        line_number INTEGER,
        confidence REAL DEFAULT 1.0,
        UNIQUE(source_id, target_id, source_type, target_type, relationship)
    );",
    "CREATE TABLE IF NOT EXISTS external_deps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL REFERENCES files(path),
        import_statement TEXT NOT NULL,
        module_name TEXT NOT NULL,
        line_number INTEGER
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id TEXT NOT NULL,
        local_snapshot TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS artifact_quarantine (
        artifact_id TEXT PRIMARY KEY,
        reason TEXT NOT NULL,
        quarantined_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS artifact_pins (
        repo_id TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        artifact_id TEXT NOT NULL,
        pinned_at TEXT DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(repo_id, snapshot_id)
    );",
    "CREATE TABLE IF NOT EXISTS circuit_breakers (
        repo_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        failure_count INTEGER NOT NULL DEFAULT 0,
        opened_at_utc TEXT
    );",
    "CREATE TABLE IF NOT EXISTS sync_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id TEXT NOT NULL,
        level TEXT NOT NULL,
        event_type TEXT NOT NULL,
        detail_json TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS tool_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id TEXT,
        tool_name TEXT NOT NULL,
        latency_ms REAL NOT NULL,
        success INTEGER NOT NULL,
        mode TEXT NOT NULL,
        result_size INTEGER,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS indexing_diagnostics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        category TEXT NOT NULL,
        severity TEXT NOT NULL DEFAULT 'error',
        file_path TEXT,
        language TEXT,
        message TEXT NOT NULL,
        hint TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS trusted_signing_keys (
        repo_id TEXT NOT NULL,
        key_id TEXT NOT NULL,
        algorithm TEXT NOT NULL,
        public_key TEXT NOT NULL,
        purpose TEXT NOT NULL DEFAULT 'default',
        active INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY(repo_id, key_id)
    );",
    // -- indexes ---------------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_qualified ON symbols(qualified_name);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_pagerank ON symbols(pagerank_score DESC);",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, source_type);",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, target_type);",
    "CREATE INDEX IF NOT EXISTS idx_edges_relationship ON edges(relationship);",
    "CREATE INDEX IF NOT EXISTS idx_edges_file_line ON edges(file_path, line_number);",
    "CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_external_deps_module ON external_deps(module_name);",
    "CREATE INDEX IF NOT EXISTS idx_external_deps_file_module ON external_deps(file_path, module_name);",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_repo_status ON sync_queue(repo_id, status, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_sync_events_repo_created ON sync_events(repo_id, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_tool_metrics_tool_created ON tool_metrics(tool_name, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_index_diag_run_created ON indexing_diagnostics(run_id, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_index_diag_stage_category ON indexing_diagnostics(stage, category);",
    "CREATE INDEX IF NOT EXISTS idx_index_diag_severity_created ON indexing_diagnostics(severity, created_at);",
    "CREATE INDEX IF NOT EXISTS idx_trusted_keys_repo_active ON trusted_signing_keys(repo_id, active, key_id);",
];

/// FTS5 virtual table. Executed best-effort: some SQLite builds lack
/// FTS5, and every FTS consumer has a LIKE fallback.
pub const FTS_STATEMENTS: &[&str] = &[
    "CREATE VIRTUAL TABLE IF NOT EXISTS symbol_fts
     USING fts5(symbol_id UNINDEXED, name, qualified_name, docstring, signature);",
];

// ---------------------------------------------------------------------------
// Migration framework
// ---------------------------------------------------------------------------

/// Run pending migrations from the stored version up to
/// [`SCHEMA_VERSION`].
pub fn migrate_schema(conn: &Connection) -> Result<()> {
    let mut current_version = get_schema_version(conn);
    if current_version > SCHEMA_VERSION {
        return Err(Error::SchemaIncompatible {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT bombe_migrate_step;")?;

        let step_result = (|| -> Result<()> {
            apply_migration_step(conn, next_version)?;
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT bombe_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => current_version = next_version,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT bombe_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT bombe_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(Error::MigrationFailed {
                    from_version: current_version,
                    to_version: next_version,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn apply_migration_step(conn: &Connection, version: i32) -> Result<()> {
    match version {
        // v1: baseline; the base DDL already created everything.
        1 => Ok(()),
        // v2: rebuild the FTS index from the symbols table.
        2 => rebuild_fts(conn),
        // v3: edges (file_path, line_number) index.
        3 => {
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_edges_file_line ON edges(file_path, line_number);",
            )?;
            Ok(())
        }
        // v4: sync operational tables, via IF NOT EXISTS replays of the DDL.
        4 => {
            for stmt in SCHEMA_STATEMENTS
                .iter()
                .filter(|s| s.contains("sync_queue") || s.contains("artifact_") || s.contains("circuit_breakers") || s.contains("sync_events") || s.contains("tool_metrics"))
            {
                conn.execute_batch(stmt)?;
            }
            Ok(())
        }
        // v5: trusted signing keys.
        5 => {
            for stmt in SCHEMA_STATEMENTS.iter().filter(|s| s.contains("trusted")) {
                conn.execute_batch(stmt)?;
            }
            Ok(())
        }
        // v6: indexing diagnostics.
        6 => {
            for stmt in SCHEMA_STATEMENTS
                .iter()
                .filter(|s| s.contains("indexing_diagnostics") || s.contains("idx_index_diag"))
            {
                conn.execute_batch(stmt)?;
            }
            Ok(())
        }
        // v7: external_deps module-name indexes.
        7 => {
            conn.execute_batch(
                "CREATE INDEX IF NOT EXISTS idx_external_deps_module ON external_deps(module_name);
                 CREATE INDEX IF NOT EXISTS idx_external_deps_file_module ON external_deps(file_path, module_name);",
            )?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn rebuild_fts(conn: &Connection) -> Result<()> {
    let fts_exists = conn
        .query_row("SELECT 1 FROM symbol_fts LIMIT 1;", [], |_| Ok(()))
        .is_ok()
        || conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name='symbol_fts';",
                [],
                |_| Ok(()),
            )
            .is_ok();
    if !fts_exists {
        return Ok(());
    }
    conn.execute_batch("DELETE FROM symbol_fts;")?;
    let mut stmt = conn.prepare(
        "SELECT id, name, qualified_name, COALESCE(docstring, ''), COALESCE(signature, '')
         FROM symbols;",
    )?;
    let rows: Vec<(i64, String, String, String, String)> = stmt
        .query_map([], |row| {
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
    for (id, name, qualified_name, docstring, signature) in rows {
        conn.execute(
            "INSERT INTO symbol_fts(symbol_id, name, qualified_name, docstring, signature)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            rusqlite::params![id, name, qualified_name, docstring, signature],
        )?;
    }
    Ok(())
}

/// Current schema version from `repo_meta` (0 when absent).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, String>(0),
    )
    .map(|v| v.parse::<i32>().unwrap_or(0))
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_version: i32,
    to_version: i32,
    status: &str,
    error_message: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message)
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_version, to_version, status, error_message],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        for stmt in FTS_STATEMENTS {
            let _ = conn.execute_batch(stmt);
        }
        conn
    }

    #[test]
    fn fresh_database_migrates_to_current() {
        let conn = fresh_conn();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = fresh_conn();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
        // Exactly SCHEMA_VERSION success rows; the second call was a no-op.
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM migration_history WHERE status = 'success';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, SCHEMA_VERSION as i64);
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = fresh_conn();
        set_schema_version(&conn, SCHEMA_VERSION + 5).unwrap();
        let err = migrate_schema(&conn).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_INCOMPATIBLE");
    }

    #[test]
    fn migration_history_records_steps() {
        let conn = fresh_conn();
        migrate_schema(&conn).unwrap();
        let (from_v, to_v): (i32, i32) = conn
            .query_row(
                "SELECT from_version, to_version FROM migration_history ORDER BY id LIMIT 1;",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((from_v, to_v), (0, 1));
    }

    #[test]
    fn symbols_allow_overloads() {
        let conn = fresh_conn();
        conn.execute_batch(
            "INSERT INTO files(path, language, content_hash) VALUES ('M.java', 'java', 'h');",
        )
        .unwrap();
        // Same qualified name, different line ranges: both rows must land.
        conn.execute(
            "INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line)
             VALUES ('f', 'M.f', 'method', 'M.java', 1, 3);",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO symbols(name, qualified_name, kind, file_path, start_line, end_line)
             VALUES ('f', 'M.f', 'method', 'M.java', 5, 7);",
            [],
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM symbols;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn edge_uniqueness_enforced() {
        let conn = fresh_conn();
        conn.execute(
            "INSERT INTO edges(source_id, target_id, source_type, target_type, relationship)
             VALUES (1, 2, 'symbol', 'symbol', 'CALLS');",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO edges(source_id, target_id, source_type, target_type, relationship)
             VALUES (1, 2, 'symbol', 'symbol', 'CALLS');",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn fts_table_exists_in_bundled_build() {
        let conn = fresh_conn();
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='symbol_fts';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);
    }
}
