//! Engine configuration and settings resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Runtime profile. `Strict` refuses to start when any declared parser
/// grammar or extraction query fails to load, and escalates per-file
/// indexing failures into run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    Default,
    Strict,
}

/// Artifact signing algorithm for the hybrid plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
    #[serde(rename = "ed25519")]
    Ed25519,
}

/// Signing configuration. `key_material` is the raw HMAC secret, or a
/// 64-char hex encoding of the 32-byte ed25519 seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    pub algorithm: SigningAlgorithm,
    pub key_id: String,
    pub key_material: String,
}

/// Resolved engine settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo_root: PathBuf,
    pub db_path: PathBuf,
    pub runtime_profile: RuntimeProfile,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub workers: usize,
    pub max_file_bytes: u64,
    pub sync_timeout_ms: u64,
    pub sensitive_exclusion_enabled: bool,
    pub signing: Option<SigningConfig>,
    pub semantic_hints_path: Option<PathBuf>,
}

/// Default worker count: one core is left for the caller.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Default per-file size ceiling. Oversized files are skipped with a
/// diagnostic instead of being parsed.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Default per-call budget for sync push/pull.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 500;

/// Resolve and validate the repository root.
pub fn resolve_repo_path(repo: &Path) -> Result<PathBuf> {
    let repo_root = expand_tilde(repo);
    let repo_root = if repo_root.is_absolute() {
        repo_root
    } else {
        std::env::current_dir()?.join(repo_root)
    };
    if !repo_root.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Repository path does not exist: {}", repo_root.display()),
        )));
    }
    if !repo_root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("Repository path is not a directory: {}", repo_root.display()),
        )));
    }
    Ok(repo_root)
}

/// Resolve the store location, defaulting under the repo.
pub fn resolve_db_path(repo_root: &Path, db_path: Option<&Path>) -> PathBuf {
    match db_path {
        None => repo_root.join(".bombe").join("bombe.db"),
        Some(p) => expand_tilde(p),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

/// Build validated settings from caller-supplied options.
#[allow(clippy::too_many_arguments)]
pub fn build_settings(
    repo: &Path,
    db_path: Option<&Path>,
    runtime_profile: RuntimeProfile,
    include: Vec<String>,
    exclude: Vec<String>,
    workers: Option<usize>,
    signing: Option<SigningConfig>,
    semantic_hints_path: Option<PathBuf>,
) -> Result<Settings> {
    let repo_root = resolve_repo_path(repo)?;
    let db_path = resolve_db_path(&repo_root, db_path);
    Ok(Settings {
        repo_root,
        db_path,
        runtime_profile,
        include,
        exclude,
        workers: workers.unwrap_or_else(default_workers).max(1),
        max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        sensitive_exclusion_enabled: true,
        signing,
        semantic_hints_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_settings_defaults_db_under_repo() {
        let dir = tempfile::tempdir().unwrap();
        let settings = build_settings(
            dir.path(),
            None,
            RuntimeProfile::Default,
            vec![],
            vec![],
            None,
            None,
            None,
        )
        .unwrap();
        assert!(settings.db_path.ends_with(".bombe/bombe.db"));
        assert!(settings.sensitive_exclusion_enabled);
        assert!(settings.workers >= 1);
    }

    #[test]
    fn missing_repo_is_rejected() {
        let result = build_settings(
            Path::new("/definitely/not/a/real/path"),
            None,
            RuntimeProfile::Default,
            vec![],
            vec![],
            None,
            None,
            None,
        );
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "IO_ERROR");
    }

    #[test]
    fn explicit_db_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("elsewhere.db");
        let settings = build_settings(
            dir.path(),
            Some(&custom),
            RuntimeProfile::Strict,
            vec![],
            vec![],
            Some(2),
            None,
            None,
        )
        .unwrap();
        assert_eq!(settings.db_path, custom);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.runtime_profile, RuntimeProfile::Strict);
    }

    #[test]
    fn signing_config_serde() {
        let json = r#"{"algorithm":"hmac-sha256","key_id":"k1","key_material":"secret"}"#;
        let cfg: SigningConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.algorithm, SigningAlgorithm::HmacSha256);
        let json = r#"{"algorithm":"ed25519","key_id":"k2","key_material":"00"}"#;
        let cfg: SigningConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.algorithm, SigningAlgorithm::Ed25519);
    }
}
