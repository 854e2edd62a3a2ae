//! Optional receiver-type hints for call resolution.
//!
//! Hints arrive from sidecar files written by an external enrichment
//! source (an LSP bridge, typically): per-file sidecars under
//! `.bombe/semantic/<path>.hints.json`, plus an optional global hints
//! file keyed by relative path. Both carry entries of the shape
//! `{receiver, owner_type, line | line_start..line_end}`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Hint map key: (line number, receiver text).
pub type ReceiverHints = HashMap<(i64, String), HashSet<String>>;

/// Load receiver-type hints for one file from sidecars and the optional
/// global hints file. Missing or malformed inputs yield an empty map.
pub fn load_receiver_type_hints(
    repo_root: &Path,
    relative_path: &str,
    global_hints_path: Option<&Path>,
) -> ReceiverHints {
    let mut hints = ReceiverHints::new();
    let normalized = normalize_relative_path(relative_path);

    let sidecar = repo_root
        .join(".bombe")
        .join("semantic")
        .join(format!("{normalized}.hints.json"));
    if let Some(payload) = load_json(&sidecar) {
        merge_hint_maps(&mut hints, &parse_hint_payload(&payload));
    }

    if let Some(global_path) = global_hints_path {
        if let Some(payload) = load_json(global_path) {
            if let Some(files) = payload.get("files").and_then(|v| v.as_object()) {
                let candidates = [
                    normalized.clone(),
                    relative_path.to_string(),
                    relative_path
                        .replace('\\', "/")
                        .trim_start_matches('/')
                        .to_string(),
                ];
                for candidate in &candidates {
                    if let Some(file_payload) = files.get(candidate) {
                        merge_hint_maps(&mut hints, &parse_hint_payload(file_payload));
                    }
                }
            }
        }
    }

    hints
}

fn normalize_relative_path(path: &str) -> String {
    path.trim().trim_start_matches('/').replace('\\', "/")
}

fn load_json(path: &Path) -> Option<serde_json::Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn parse_hint_payload(payload: &serde_json::Value) -> ReceiverHints {
    let mut hints = ReceiverHints::new();
    let Some(entries) = payload.get("receiver_hints").and_then(|v| v.as_array()) else {
        return hints;
    };
    for item in entries {
        let Some(obj) = item.as_object() else { continue };
        let receiver = obj
            .get("receiver")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let owner_type = obj
            .get("owner_type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if receiver.is_empty() || owner_type.is_empty() {
            continue;
        }
        let line = obj.get("line").and_then(|v| v.as_i64());
        let line_start = obj
            .get("line_start")
            .and_then(|v| v.as_i64())
            .or(line)
            .unwrap_or(1)
            .max(1);
        let line_end = obj
            .get("line_end")
            .and_then(|v| v.as_i64())
            .unwrap_or(line_start)
            .max(line_start);
        // Ranges are bounded so a bad sidecar cannot blow up the map.
        for line_num in line_start..=line_end.min(line_start + 512) {
            hints
                .entry((line_num, receiver.clone()))
                .or_default()
                .insert(owner_type.clone());
        }
    }
    hints
}

fn merge_hint_maps(target: &mut ReceiverHints, source: &ReceiverHints) {
    for (key, values) in source {
        target
            .entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}
