//! Filesystem scanning for indexing passes.
//!
//! Enumeration applies a layered ignore policy: implicit directories,
//! `.gitignore` rules, `.bombeignore` rules, default sensitive-path
//! patterns, and caller-supplied include/exclude globs. Traversal is
//! depth-first with name-sorted entries so the emitted order is stable
//! across runs and machines.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::Language;

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
];

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".bombe"];

/// Scanner options; include/exclude run after the ignore policy.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub sensitive_exclusion_enabled: bool,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            sensitive_exclusion_enabled: true,
        }
    }
}

struct IgnoreRule {
    pattern: String,
    directory_only: bool,
}

fn parse_ignore_line(line: &str) -> Option<IgnoreRule> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return None;
    }
    let directory_only = stripped.ends_with('/');
    let mut pattern = if directory_only {
        stripped[..stripped.len() - 1].to_string()
    } else {
        stripped.to_string()
    };
    if let Some(rest) = pattern.strip_prefix("./") {
        pattern = rest.to_string();
    }
    Some(IgnoreRule {
        pattern,
        directory_only,
    })
}

fn load_ignore_file(path: &Path) -> Vec<IgnoreRule> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    content.lines().filter_map(parse_ignore_line).collect()
}

/// Glob matching supporting `*` and `?`.
pub fn glob_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (tl, pl) = (t.len(), p.len());
    let mut dp = vec![vec![false; pl + 1]; tl + 1];
    dp[0][0] = true;
    for j in 1..=pl {
        if p[j - 1] == '*' {
            dp[0][j] = dp[0][j - 1];
        }
    }
    for i in 1..=tl {
        for j in 1..=pl {
            if p[j - 1] == '*' {
                dp[i][j] = dp[i][j - 1] || dp[i - 1][j];
            } else if p[j - 1] == '?' || t[i - 1] == p[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            }
        }
    }
    dp[tl][pl]
}

fn matches_pattern(rel_path: &str, pattern: &str) -> bool {
    let normalized = rel_path.replace('\\', "/");
    if glob_match(&normalized, pattern) {
        return true;
    }
    let file_name = Path::new(&normalized)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    glob_match(&file_name, pattern)
}

fn is_ignored(rel_path: &str, is_dir: bool, rules: &[IgnoreRule]) -> bool {
    let normalized = rel_path.replace('\\', "/");
    for rule in rules {
        if rule.directory_only && !is_dir {
            continue;
        }
        if matches_pattern(&normalized, &rule.pattern) {
            return true;
        }
        if normalized.starts_with(&format!("{}/", rule.pattern)) {
            return true;
        }
    }
    false
}

fn matches_any_include(rel_path: &str, include: &[String]) -> bool {
    if include.is_empty() {
        return true;
    }
    include.iter().any(|p| matches_pattern(rel_path, p))
}

/// Detect the language of a file by extension against the closed map.
pub fn detect_language(path: &Path) -> Option<Language> {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    Language::from_extension(&ext)
}

/// SHA-256 hex digest of a file's bytes.
pub fn compute_content_hash(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Enumerate candidate files under `repo_root` in a stable order.
///
/// Returns absolute paths; language detection and hashing are the
/// caller's concern so IO failures stay per-file.
pub fn iter_repo_files(repo_root: &Path, options: &ScanOptions) -> Vec<PathBuf> {
    let mut rules: Vec<IgnoreRule> = Vec::new();
    rules.extend(load_ignore_file(&repo_root.join(".gitignore")));
    rules.extend(load_ignore_file(&repo_root.join(".bombeignore")));

    if options.sensitive_exclusion_enabled {
        for pattern in DEFAULT_SENSITIVE_EXCLUDE_PATTERNS {
            rules.push(IgnoreRule {
                pattern: pattern.to_string(),
                directory_only: false,
            });
        }
    }
    for raw in &options.exclude {
        if let Some(rule) = parse_ignore_line(raw) {
            rules.push(rule);
        }
    }

    let include: Vec<String> = options
        .include
        .iter()
        .filter(|p| !p.trim().is_empty())
        .cloned()
        .collect();

    let implicit: HashSet<&str> = IMPLICIT_IGNORED_DIRS.iter().copied().collect();
    let mut result = Vec::new();
    walk_dir(repo_root, repo_root, &rules, &include, &implicit, &mut result);
    result
}

fn walk_dir(
    dir: &Path,
    repo_root: &Path,
    rules: &[IgnoreRule],
    include: &[String],
    implicit: &HashSet<&str>,
    result: &mut Vec<PathBuf>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut files: Vec<PathBuf> = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            if implicit.contains(name.as_str()) {
                continue;
            }
            let rel = rel_path(&path, repo_root);
            if is_ignored(&rel, true, rules) {
                continue;
            }
            dirs.push(path);
        } else {
            files.push(path);
        }
    }

    // read_dir order is platform-dependent; sort for stable output.
    files.sort();
    dirs.sort();

    for file_path in files {
        let rel = rel_path(&file_path, repo_root);
        if is_ignored(&rel, false, rules) {
            continue;
        }
        if !matches_any_include(&rel, include) {
            continue;
        }
        result.push(file_path);
    }

    for dir_path in dirs {
        walk_dir(&dir_path, repo_root, rules, include, implicit, result);
    }
}

fn rel_path(path: &Path, repo_root: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
