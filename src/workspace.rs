//! Multi-root workspace configuration.
//!
//! A workspace groups several repository roots, each with its own store,
//! under `.bombe/workspace.json` in the primary root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::expand_tilde;
use crate::error::Result;

pub const WORKSPACE_SCHEMA_VERSION: i64 = 1;

/// One indexable root inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRoot {
    pub id: String,
    pub path: String,
    pub db_path: String,
    pub enabled: bool,
}

/// Persisted workspace configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub name: String,
    pub version: i64,
    pub roots: Vec<WorkspaceRoot>,
}

/// Default workspace file location under a repo root.
pub fn default_workspace_file(repo_root: &Path) -> PathBuf {
    repo_root.join(".bombe").join("workspace.json")
}

fn root_identifier(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", name, &digest[..8])
}

fn normalize_root_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    expanded.canonicalize().unwrap_or(expanded)
}

fn root_db_path(path: &Path) -> PathBuf {
    path.join(".bombe").join("bombe.db")
}

/// Build a workspace config from a primary root plus additional roots.
/// Duplicate paths are dropped; order is preserved.
pub fn build_workspace_config(
    repo_root: &Path,
    roots: &[PathBuf],
    name: Option<&str>,
) -> WorkspaceConfig {
    let mut seen = std::collections::HashSet::new();
    let mut normalized_roots = Vec::new();
    let effective: Vec<PathBuf> = if roots.is_empty() {
        vec![repo_root.to_path_buf()]
    } else {
        roots.to_vec()
    };
    for raw in effective {
        let normalized = normalize_root_path(&raw);
        let key = normalized.to_string_lossy().to_string();
        if !seen.insert(key.clone()) {
            continue;
        }
        normalized_roots.push(WorkspaceRoot {
            id: root_identifier(&normalized),
            path: key,
            db_path: root_db_path(&normalized).to_string_lossy().to_string(),
            enabled: true,
        });
    }
    let fallback = normalize_root_path(repo_root);
    let workspace_name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            fallback
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "workspace".to_string())
        });
    WorkspaceConfig {
        name: workspace_name,
        version: WORKSPACE_SCHEMA_VERSION,
        roots: normalized_roots,
    }
}

/// Persist a workspace config as pretty JSON, creating parent directories.
pub fn save_workspace_config(
    repo_root: &Path,
    config: &WorkspaceConfig,
    workspace_file: Option<&Path>,
) -> Result<PathBuf> {
    let target = workspace_file
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| default_workspace_file(repo_root));
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut payload = serde_json::to_string_pretty(config)?;
    payload.push('\n');
    std::fs::write(&target, payload)?;
    Ok(target)
}

/// Load a workspace config; a missing or malformed file falls back to a
/// single-root workspace for `repo_root`.
pub fn load_workspace_config(repo_root: &Path, workspace_file: Option<&Path>) -> WorkspaceConfig {
    let target = workspace_file
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| default_workspace_file(repo_root));
    let parsed = std::fs::read_to_string(&target)
        .ok()
        .and_then(|content| serde_json::from_str::<WorkspaceConfig>(&content).ok())
        .filter(|config| !config.roots.is_empty());
    parsed.unwrap_or_else(|| build_workspace_config(repo_root, &[], None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_dedupes_roots() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_workspace_config(
            dir.path(),
            &[dir.path().to_path_buf(), dir.path().to_path_buf()],
            Some("ws"),
        );
        assert_eq!(config.roots.len(), 1);
        assert_eq!(config.name, "ws");
        assert_eq!(config.version, WORKSPACE_SCHEMA_VERSION);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = build_workspace_config(dir.path(), &[], None);
        let path = save_workspace_config(dir.path(), &config, None).unwrap();
        assert!(path.exists());
        let loaded = load_workspace_config(dir.path(), None);
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_workspace_config(dir.path(), None);
        assert_eq!(config.roots.len(), 1);
        assert!(config.roots[0].enabled);
        assert!(config.roots[0].db_path.ends_with(".bombe/bombe.db"));
    }

    #[test]
    fn root_ids_are_stable_and_distinct() {
        let a = root_identifier(Path::new("/tmp/alpha"));
        let b = root_identifier(Path::new("/tmp/beta"));
        assert_ne!(a, b);
        assert_eq!(a, root_identifier(Path::new("/tmp/alpha")));
    }
}
