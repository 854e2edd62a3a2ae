//! Shared records and wire-contract types used across the indexing,
//! storage, query, and sync layers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Schema / contract constants
// ---------------------------------------------------------------------------

/// Delta schema version for incremental sync payloads.
pub const DELTA_SCHEMA_VERSION: i64 = 1;

/// Artifact schema version for promoted bundles.
pub const ARTIFACT_SCHEMA_VERSION: i64 = 1;

/// Tool version advertised in sync headers.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported source languages. The set is closed; unknown extensions are
/// skipped by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    Java,
    Go,
}

impl Language {
    /// Map a file extension (including the dot, lowercase) to a language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".py" => Some(Self::Python),
            ".ts" | ".tsx" => Some(Self::TypeScript),
            ".java" => Some(Self::Java),
            ".go" => Some(Self::Go),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Go => "go",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "typescript" | "ts" | "tsx" => Some(Self::TypeScript),
            "java" => Some(Self::Java),
            "go" | "golang" => Some(Self::Go),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// Typed directed relations stored in the edges table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relationship {
    Calls,
    Imports,
    ImportsSymbol,
    Extends,
    Implements,
    Defines,
    HasMethod,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "CALLS",
            Self::Imports => "IMPORTS",
            Self::ImportsSymbol => "IMPORTS_SYMBOL",
            Self::Extends => "EXTENDS",
            Self::Implements => "IMPLEMENTS",
            Self::Defines => "DEFINES",
            Self::HasMethod => "HAS_METHOD",
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a signature string ("" when absent). Part of the
/// symbol identity key, so it must stay stable across releases.
pub fn signature_hash(signature: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signature.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short repo identifier: first 16 hex chars of SHA-256 over the canonical
/// repo path.
pub fn repo_id_from_path(canonical_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Deterministic integer id for a repo-relative file path. File-level edge
/// endpoints use this so ids survive unrelated files being added or removed.
pub fn stable_file_id(path: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (i64::from_be_bytes(bytes)) & 0x7FFF_FFFF_FFFF_FFFF
}

// ---------------------------------------------------------------------------
// Core records
// ---------------------------------------------------------------------------

/// A record representing a single indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub size_bytes: Option<i64>,
}

/// A single parameter of a function or method, ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub name: String,
    pub position: i64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// A symbol extracted from source code (function, class, method, interface,
/// constant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub qualified_name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_symbol_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    #[serde(default)]
    pub pagerank_score: f64,
    #[serde(default)]
    pub parameters: Vec<ParameterRecord>,
}

/// Collision-safe identity key for a symbol. Stable under overloading and
/// re-parses as long as the declaration itself is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub qualified_name: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub signature_hash: String,
}

impl SymbolKey {
    pub fn from_symbol(symbol: &SymbolRecord) -> Self {
        Self::from_fields(
            &symbol.qualified_name,
            &symbol.file_path,
            symbol.start_line,
            symbol.end_line,
            symbol.signature.as_deref(),
        )
    }

    pub fn from_fields(
        qualified_name: &str,
        file_path: &str,
        start_line: i64,
        end_line: i64,
        signature: Option<&str>,
    ) -> Self {
        Self {
            qualified_name: qualified_name.to_string(),
            file_path: file_path.to_string(),
            start_line,
            end_line,
            signature_hash: signature_hash(signature),
        }
    }
}

/// A stored edge row with numeric endpoint ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_id: i64,
    pub target_id: i64,
    pub source_type: String,
    pub target_type: String,
    pub relationship: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    pub confidence: f64,
}

/// An import that did not resolve to an in-repo file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDepRecord {
    pub file_path: String,
    pub import_statement: String,
    pub module_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
}

// ---------------------------------------------------------------------------
// Changesets and index run output
// ---------------------------------------------------------------------------

/// One entry of an incremental changeset. `status` follows git letter
/// conventions: A (added), M (modified), D (deleted), R (renamed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub status: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl FileChange {
    pub fn added(path: &str) -> Self {
        Self {
            status: "A".into(),
            path: path.into(),
            old_path: None,
        }
    }

    pub fn modified(path: &str) -> Self {
        Self {
            status: "M".into(),
            path: path.into(),
            old_path: None,
        }
    }

    pub fn deleted(path: &str) -> Self {
        Self {
            status: "D".into(),
            path: path.into(),
            old_path: None,
        }
    }

    pub fn renamed(old_path: &str, new_path: &str) -> Self {
        Self {
            status: "R".into(),
            path: new_path.into(),
            old_path: Some(old_path.into()),
        }
    }
}

/// Monotonic progress snapshot emitted during an index run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub step: String,
    pub completed: i64,
    pub total: i64,
    pub progress_pct: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
}

/// Per-run extraction telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexTelemetry {
    pub worker_count: usize,
    pub jobs_total: usize,
    pub extract_elapsed_ms: i64,
    pub files_per_second: f64,
}

/// Result of a full or incremental index run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub run_id: String,
    pub files_seen: i64,
    pub files_indexed: i64,
    pub symbols_indexed: i64,
    pub edges_indexed: i64,
    pub elapsed_ms: i64,
    pub cancelled: bool,
    pub telemetry: IndexTelemetry,
    pub progress_snapshots: Vec<ProgressSnapshot>,
    pub diagnostics_total: i64,
}

// ---------------------------------------------------------------------------
// Sync wire contracts
// ---------------------------------------------------------------------------

/// Header identifying one incremental sync payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaHeader {
    pub repo_id: String,
    pub local_snapshot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
    pub tool_version: String,
    pub schema_version: i64,
    pub created_at_utc: String,
}

/// File-level change entry inside a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    pub status: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
}

/// Extraction quality statistics carried on deltas; gates artifact
/// promotion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityStats {
    pub ambiguity_rate: f64,
    pub unresolved_imports: i64,
    pub parse_failures: i64,
}

/// A contract-level edge carrying full symbol-key endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeContractRecord {
    pub source: SymbolKey,
    pub target: SymbolKey,
    pub relationship: String,
    pub line_number: i64,
    pub confidence: f64,
    #[serde(default = "default_provenance")]
    pub provenance: String,
}

fn default_provenance() -> String {
    "local".to_string()
}

impl EdgeContractRecord {
    /// Identity tuple for dedup (confidence excluded).
    pub fn identity(&self) -> (SymbolKey, SymbolKey, String, i64) {
        (
            self.source.clone(),
            self.target.clone(),
            self.relationship.clone(),
            self.line_number,
        )
    }
}

/// Incremental payload describing a change from one snapshot to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDelta {
    pub header: DeltaHeader,
    pub file_changes: Vec<FileDelta>,
    pub symbol_upserts: Vec<SymbolRecord>,
    pub edge_upserts: Vec<EdgeContractRecord>,
    pub quality_stats: QualityStats,
}

/// A promoted, versioned bundle of symbols/edges/priors shared via the
/// hybrid plane. `checksum` is SHA-256 over the canonical serialisation
/// with `checksum` and `signature` cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub artifact_id: String,
    pub repo_id: String,
    pub snapshot_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_snapshot: Option<String>,
    pub tool_version: String,
    pub schema_version: i64,
    pub created_at_utc: String,
    pub promoted_symbols: Vec<SymbolKey>,
    pub promoted_edges: Vec<EdgeContractRecord>,
    #[serde(default)]
    pub impact_priors: Vec<serde_json::Value>,
    #[serde(default)]
    pub flow_hints: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
