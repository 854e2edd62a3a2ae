//! One full sync cycle against the store and a transport.
//!
//! Builds a delta from the store's view of the changed paths, enqueues
//! it, pushes, pulls the latest artifact, reconciles, pins, and persists
//! breaker state plus any quarantine additions. Every remote failure is
//! recorded as an event; the cycle itself only fails on store errors.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::SigningConfig;
use crate::error::Result;
use crate::models::{
    repo_id_from_path, DeltaHeader, FileChange, FileDelta, IndexDelta, QualityStats,
    DELTA_SCHEMA_VERSION, TOOL_VERSION,
};
use crate::observability::canonical_json;
use crate::store::Store;
use crate::sync::reconcile::reconcile_artifact;
use crate::sync::{CircuitBreaker, CompatibilityPolicy, SyncClient, SyncTransport};

/// Report of one sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCycleReport {
    pub repo_id: String,
    pub snapshot_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
    pub queue_id: i64,
    pub push_ok: bool,
    pub push_mode: String,
    pub push_reason: String,
    pub pull_mode: String,
    pub pull_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_artifact_id: Option<String>,
}

fn now_utc_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// Content-addressed snapshot id: 16 hex chars of SHA-256 over the
/// sorted (path, content_hash) pairs currently in the store.
fn snapshot_id(store: &Store) -> Result<String> {
    let mut entries: Vec<String> = store
        .files_map()?
        .into_iter()
        .map(|(path, record)| format!("{path}:{}", record.content_hash))
        .collect();
    entries.sort();
    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..16].to_string())
}

/// Build the delta payload for a changeset from the store's current
/// contents.
pub fn build_delta(repo_root: &Path, store: &Store, changes: &[FileChange]) -> Result<IndexDelta> {
    let repo_id = repo_id_from_path(&repo_root.to_string_lossy());
    let local_snapshot = snapshot_id(store)?;
    let parent_snapshot = store
        .get_repo_meta("last_snapshot")?
        .filter(|snapshot| snapshot != &local_snapshot);

    let files_map = store.files_map()?;
    let file_changes: Vec<FileDelta> = changes
        .iter()
        .map(|change| {
            let record = files_map.get(&change.path);
            FileDelta {
                status: change.status.clone(),
                path: change.path.clone(),
                old_path: change.old_path.clone(),
                content_hash: record.map(|r| r.content_hash.clone()),
                size_bytes: record.and_then(|r| r.size_bytes),
            }
        })
        .collect();

    let mut changed_paths: Vec<String> = changes
        .iter()
        .filter(|change| matches!(change.status.as_str(), "A" | "M" | "R"))
        .map(|change| change.path.clone())
        .collect();
    changed_paths.sort();
    changed_paths.dedup();

    let symbol_upserts = store.symbols_for_paths(&changed_paths)?;
    let edge_upserts = store.edges_for_paths(&changed_paths)?;
    let ambiguous = edge_upserts.iter().filter(|e| e.confidence < 1.0).count();
    let quality_stats = QualityStats {
        ambiguity_rate: ambiguous as f64 / edge_upserts.len().max(1) as f64,
        unresolved_imports: store.external_dep_count_for_paths(&changed_paths)?,
        parse_failures: 0,
    };

    Ok(IndexDelta {
        header: DeltaHeader {
            repo_id,
            local_snapshot,
            parent_snapshot,
            tool_version: TOOL_VERSION.to_string(),
            schema_version: DELTA_SCHEMA_VERSION,
            created_at_utc: now_utc_seconds(),
        },
        file_changes,
        symbol_upserts,
        edge_upserts,
        quality_stats,
    })
}

/// Run one push/pull/reconcile cycle.
pub fn run_sync_cycle(
    repo_root: &Path,
    store: &Store,
    transport: Arc<dyn SyncTransport>,
    changes: &[FileChange],
    timeout_ms: u64,
    signing: Option<SigningConfig>,
) -> Result<SyncCycleReport> {
    let delta = build_delta(repo_root, store, changes)?;
    let repo_id = delta.header.repo_id.clone();

    let breaker = match store.get_circuit_breaker_state(&repo_id)? {
        Some(row) => CircuitBreaker::from_persisted(&row.state, row.failure_count),
        None => CircuitBreaker::default(),
    };
    let quarantined: std::collections::HashSet<String> = store
        .list_quarantined_artifacts(500)?
        .into_iter()
        .map(|row| row.artifact_id)
        .collect();

    let mut client = SyncClient::new(
        transport,
        CompatibilityPolicy::default(),
        timeout_ms,
        breaker,
        quarantined,
        signing,
    );

    let payload = canonical_json(&serde_json::to_value(&delta)?);
    let queue_id = store.enqueue_sync_delta(&repo_id, &delta.header.local_snapshot, &payload)?;

    let push = client.push_delta(&delta);
    store.mark_sync_delta_status(
        queue_id,
        if push.ok { "pushed" } else { "retry" },
        if push.ok { None } else { Some(&push.reason) },
    )?;
    store.record_sync_event(
        &repo_id,
        if push.ok { "INFO" } else { "WARNING" },
        "sync_push",
        Some(&serde_json::json!({"mode": push.mode, "reason": push.reason})),
    )?;

    let pull = client.pull_artifact(
        &repo_id,
        &delta.header.local_snapshot,
        delta.header.parent_snapshot.as_deref(),
    );
    let mut pinned_artifact_id = None;
    match &pull.artifact {
        Some(artifact) => {
            let merged = reconcile_artifact(&delta, artifact)?;
            store.set_artifact_pin(&repo_id, &merged.snapshot_id, &merged.artifact_id)?;
            store.record_sync_event(
                &repo_id,
                "INFO",
                "artifact_pinned",
                Some(&serde_json::json!({
                    "artifact_id": merged.artifact_id,
                    "snapshot_id": merged.snapshot_id,
                })),
            )?;
            pinned_artifact_id = Some(merged.artifact_id);
        }
        None => {
            store.record_sync_event(
                &repo_id,
                "WARNING",
                "sync_pull_fallback",
                Some(&serde_json::json!({"mode": pull.mode, "reason": pull.reason})),
            )?;
        }
    }

    for (artifact_id, reason) in client.quarantine_additions() {
        store.quarantine_artifact(artifact_id, reason)?;
    }

    store.set_circuit_breaker_state(
        &repo_id,
        client.breaker.state().as_str(),
        client.breaker.failure_count() as i64,
        None,
    )?;
    store.set_repo_meta("last_snapshot", &delta.header.local_snapshot)?;

    Ok(SyncCycleReport {
        repo_id,
        snapshot_id: delta.header.local_snapshot,
        parent_snapshot: delta.header.parent_snapshot,
        queue_id,
        push_ok: push.ok,
        push_mode: push.mode,
        push_reason: push.reason,
        pull_mode: pull.mode,
        pull_reason: pull.reason,
        pinned_artifact_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::pipeline::{full_index, IndexOptions};
    use crate::sync::InMemoryTransport;

    fn indexed_fixture() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    g()\n\ndef g():\n    pass\n")
            .unwrap();
        let store = Store::open_in_memory().unwrap();
        full_index(dir.path(), &store, &IndexOptions::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn build_delta_carries_changed_symbols() {
        let (dir, store) = indexed_fixture();
        let delta = build_delta(dir.path(), &store, &[FileChange::modified("a.py")]).unwrap();
        assert_eq!(delta.header.schema_version, DELTA_SCHEMA_VERSION);
        assert_eq!(delta.file_changes.len(), 1);
        assert!(delta.file_changes[0].content_hash.is_some());
        assert_eq!(delta.symbol_upserts.len(), 2);
        assert!(!delta.edge_upserts.is_empty());
    }

    #[test]
    fn full_cycle_pushes_pulls_and_pins() {
        let (dir, store) = indexed_fixture();
        let transport = Arc::new(InMemoryTransport::new(None));
        let report = run_sync_cycle(
            dir.path(),
            &store,
            transport,
            &[FileChange::modified("a.py")],
            500,
            None,
        )
        .unwrap();

        assert!(report.push_ok);
        assert_eq!(report.push_mode, "hybrid");
        assert_eq!(report.pull_mode, "remote_artifact");
        let pinned = report.pinned_artifact_id.expect("artifact pinned");
        assert_eq!(
            store
                .get_artifact_pin(&report.repo_id, &report.snapshot_id)
                .unwrap()
                .as_deref(),
            Some(pinned.as_str())
        );
        // The queue entry was marked pushed.
        assert!(store
            .list_pending_sync_deltas(&report.repo_id, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn signed_cycle_verifies_signature() {
        use crate::config::{SigningAlgorithm, SigningConfig};
        let config = SigningConfig {
            algorithm: SigningAlgorithm::HmacSha256,
            key_id: "k1".into(),
            key_material: "shared".into(),
        };
        let (dir, store) = indexed_fixture();
        let transport = Arc::new(InMemoryTransport::new(Some(config.clone())));
        let report = run_sync_cycle(
            dir.path(),
            &store,
            transport,
            &[FileChange::modified("a.py")],
            500,
            Some(config),
        )
        .unwrap();
        assert_eq!(report.pull_mode, "remote_artifact");
        assert!(report.pinned_artifact_id.is_some());
    }

    #[test]
    fn snapshot_ids_are_content_addressed() {
        let (dir, store) = indexed_fixture();
        let first = build_delta(dir.path(), &store, &[]).unwrap();
        let second = build_delta(dir.path(), &store, &[]).unwrap();
        assert_eq!(first.header.local_snapshot, second.header.local_snapshot);
        assert_eq!(first.header.local_snapshot.len(), 16);
    }

    #[test]
    fn parent_snapshot_tracks_previous_cycle() {
        let (dir, store) = indexed_fixture();
        let transport = Arc::new(InMemoryTransport::new(None));
        let first = run_sync_cycle(dir.path(), &store, transport.clone(), &[], 500, None).unwrap();
        assert!(first.parent_snapshot.is_none());

        // New content -> new snapshot whose parent is the previous one.
        std::fs::write(dir.path().join("b.py"), "def h():\n    pass\n").unwrap();
        full_index(dir.path(), &store, &IndexOptions::default()).unwrap();
        let second = run_sync_cycle(
            dir.path(),
            &store,
            transport,
            &[FileChange::added("b.py")],
            500,
            None,
        )
        .unwrap();
        assert_eq!(second.parent_snapshot.as_deref(), Some(first.snapshot_id.as_str()));
    }
}
