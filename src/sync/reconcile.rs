//! Promotion and reconciliation of hybrid artifacts.
//!
//! Promotion filters a local delta down to the content worth sharing:
//! confident edges, deduplicated symbol keys, and only when the delta's
//! quality clears the gates. Reconciliation merges a remote artifact
//! with the local delta at file-path granularity; local wins for every
//! path the delta touched.

use std::collections::{BTreeMap, HashSet};

use crate::error::Result;
use crate::models::{
    ArtifactBundle, EdgeContractRecord, IndexDelta, SymbolKey, ARTIFACT_SCHEMA_VERSION,
};
use crate::sync::build_artifact_checksum;

/// Gates a delta must clear before any of it is promoted.
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    pub min_edge_confidence: f64,
    pub max_ambiguity_rate: f64,
    pub max_parse_failures: i64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            min_edge_confidence: 0.75,
            max_ambiguity_rate: 0.25,
            max_parse_failures: 0,
        }
    }
}

#[derive(Debug)]
pub struct PromotionResult {
    pub promoted: bool,
    pub reason: &'static str,
    pub artifact: Option<ArtifactBundle>,
}

fn touched_paths(delta: &IndexDelta) -> HashSet<String> {
    let mut touched = HashSet::new();
    for change in &delta.file_changes {
        touched.insert(change.path.clone());
        if let Some(old_path) = &change.old_path {
            touched.insert(old_path.clone());
        }
    }
    for symbol in &delta.symbol_upserts {
        touched.insert(symbol.file_path.clone());
    }
    touched
}

fn promoted_symbol_keys(delta: &IndexDelta) -> Vec<SymbolKey> {
    let mut unique: BTreeMap<SymbolKey, ()> = BTreeMap::new();
    for symbol in &delta.symbol_upserts {
        unique.insert(SymbolKey::from_symbol(symbol), ());
    }
    unique.into_keys().collect()
}

fn promoted_edges(delta: &IndexDelta, min_confidence: f64) -> Vec<EdgeContractRecord> {
    let mut unique: BTreeMap<(SymbolKey, SymbolKey, String, i64), EdgeContractRecord> =
        BTreeMap::new();
    for edge in &delta.edge_upserts {
        if edge.confidence >= min_confidence {
            unique.insert(edge.identity(), edge.clone());
        }
    }
    unique.into_values().collect()
}

/// Promote a delta into an artifact, or report why not.
pub fn promote_delta(
    delta: &IndexDelta,
    artifact_id: &str,
    snapshot_id: &str,
    policy: &PromotionPolicy,
) -> Result<PromotionResult> {
    if delta.quality_stats.ambiguity_rate > policy.max_ambiguity_rate {
        return Ok(PromotionResult {
            promoted: false,
            reason: "ambiguity_too_high",
            artifact: None,
        });
    }
    if delta.quality_stats.parse_failures > policy.max_parse_failures {
        return Ok(PromotionResult {
            promoted: false,
            reason: "parse_failures_too_high",
            artifact: None,
        });
    }

    let symbols = promoted_symbol_keys(delta);
    let edges = promoted_edges(delta, policy.min_edge_confidence);
    if symbols.is_empty() && edges.is_empty() {
        return Ok(PromotionResult {
            promoted: false,
            reason: "no_promotable_content",
            artifact: None,
        });
    }

    let mut artifact = ArtifactBundle {
        artifact_id: artifact_id.to_string(),
        repo_id: delta.header.repo_id.clone(),
        snapshot_id: snapshot_id.to_string(),
        parent_snapshot: delta.header.parent_snapshot.clone(),
        tool_version: delta.header.tool_version.clone(),
        schema_version: ARTIFACT_SCHEMA_VERSION,
        created_at_utc: delta.header.created_at_utc.clone(),
        promoted_symbols: symbols,
        promoted_edges: edges,
        impact_priors: Vec::new(),
        flow_hints: Vec::new(),
        checksum: None,
        signature: None,
        signing_key_id: None,
    };
    artifact.checksum = Some(build_artifact_checksum(&artifact)?);
    Ok(PromotionResult {
        promoted: true,
        reason: "promoted",
        artifact: Some(artifact),
    })
}

/// Merge a remote artifact with the local delta. Remote entries for any
/// file path the delta touched are dropped in favour of local content.
pub fn reconcile_artifact(
    local_delta: &IndexDelta,
    artifact: &ArtifactBundle,
) -> Result<ArtifactBundle> {
    let touched = touched_paths(local_delta);

    let mut symbols: BTreeMap<SymbolKey, ()> = BTreeMap::new();
    for symbol in &artifact.promoted_symbols {
        if !touched.contains(&symbol.file_path) {
            symbols.insert(symbol.clone(), ());
        }
    }
    for symbol in promoted_symbol_keys(local_delta) {
        symbols.insert(symbol, ());
    }

    let mut edges: BTreeMap<(SymbolKey, SymbolKey, String, i64), EdgeContractRecord> =
        BTreeMap::new();
    for edge in &artifact.promoted_edges {
        if !touched.contains(&edge.source.file_path) && !touched.contains(&edge.target.file_path) {
            edges.insert(edge.identity(), edge.clone());
        }
    }
    for edge in promoted_edges(local_delta, 0.0) {
        edges.insert(edge.identity(), edge);
    }

    let mut merged = ArtifactBundle {
        artifact_id: artifact.artifact_id.clone(),
        repo_id: artifact.repo_id.clone(),
        snapshot_id: artifact.snapshot_id.clone(),
        parent_snapshot: artifact.parent_snapshot.clone(),
        tool_version: artifact.tool_version.clone(),
        schema_version: artifact.schema_version,
        created_at_utc: artifact.created_at_utc.clone(),
        promoted_symbols: symbols.into_keys().collect(),
        promoted_edges: edges.into_values().collect(),
        impact_priors: artifact.impact_priors.clone(),
        flow_hints: artifact.flow_hints.clone(),
        checksum: None,
        signature: None,
        signing_key_id: None,
    };
    merged.checksum = Some(build_artifact_checksum(&merged)?);
    Ok(merged)
}
