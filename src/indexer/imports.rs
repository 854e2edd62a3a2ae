//! Import resolution from extracted import records to repository files.
//!
//! Resolution is per-language: Python dotted and relative module paths,
//! TypeScript relative specifiers with extension/index ladders, Java
//! package roots, Go module paths read from `go.mod`. An import that does
//! not resolve to an in-repo file becomes an external dependency record.

use std::collections::HashMap;
use std::path::Path;

use crate::indexer::extract::ImportRecord;
use crate::models::{ExternalDepRecord, Language};

/// One import after resolution. `resolved_path` is the repo-relative file
/// the module maps to, when it maps at all.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub record: ImportRecord,
    pub resolved_path: Option<String>,
}

fn normalize_posix_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

fn resolve_python(
    source_path: &str,
    module_name: &str,
    all_files: &HashMap<String, String>,
) -> Option<String> {
    if module_name.is_empty() {
        return None;
    }
    let base = if module_name.starts_with('.') {
        let levels = module_name.chars().take_while(|&c| c == '.').count();
        let suffix = &module_name[levels..];
        let source_dir = Path::new(source_path).parent().unwrap_or(Path::new(""));
        let mut base_dir = source_dir.to_path_buf();
        for _ in 0..levels.saturating_sub(1) {
            base_dir = base_dir.parent().unwrap_or(Path::new("")).to_path_buf();
        }
        if suffix.is_empty() {
            base_dir.to_string_lossy().replace('\\', "/")
        } else {
            base_dir
                .join(suffix.replace('.', "/"))
                .to_string_lossy()
                .replace('\\', "/")
        }
    } else {
        module_name.replace('.', "/")
    };
    let candidates = [format!("{base}.py"), format!("{base}/__init__.py")];
    candidates
        .into_iter()
        .map(|c| normalize_posix_path(&c))
        .find(|c| all_files.contains_key(c))
}

fn resolve_typescript(
    source_path: &str,
    module_name: &str,
    all_files: &HashMap<String, String>,
) -> Option<String> {
    // Bare specifiers (packages, tsconfig path aliases) stay external;
    // only relative specifiers resolve in-repo.
    if !module_name.starts_with('.') {
        return None;
    }
    let source_dir = Path::new(source_path).parent().unwrap_or(Path::new(""));
    let joined = source_dir.join(module_name);
    let base = normalize_posix_path(&joined.to_string_lossy().replace('\\', "/"));

    let candidates = [
        base.clone(),
        format!("{base}.ts"),
        format!("{base}.tsx"),
        format!("{base}/index.ts"),
        format!("{base}/index.tsx"),
    ];
    candidates
        .into_iter()
        .map(|c| normalize_posix_path(&c))
        .find(|c| all_files.contains_key(c))
}

fn resolve_java(module_name: &str, all_files: &HashMap<String, String>) -> Option<String> {
    if let Some(stripped) = module_name.strip_suffix(".*") {
        let package_prefix = stripped.replace('.', "/");
        let mut candidates: Vec<String> = all_files
            .keys()
            .filter(|p| p.starts_with(&format!("{package_prefix}/")) && p.ends_with(".java"))
            .cloned()
            .collect();
        candidates.sort();
        return candidates.into_iter().next();
    }
    let candidate = format!("{}.java", module_name.replace('.', "/"));
    if all_files.contains_key(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

fn resolve_go(
    repo_root: &str,
    source_path: &str,
    module_name: &str,
    all_files: &HashMap<String, String>,
) -> Option<String> {
    if module_name.starts_with('.') {
        let source_dir = Path::new(source_path).parent().unwrap_or(Path::new(""));
        let base = normalize_posix_path(
            &source_dir
                .join(module_name)
                .to_string_lossy()
                .replace('\\', "/"),
        );
        let mut candidates: Vec<String> = all_files
            .keys()
            .filter(|p| p.starts_with(&format!("{base}/")) && p.ends_with(".go"))
            .cloned()
            .collect();
        candidates.sort();
        return candidates.into_iter().next();
    }

    let root_module = read_go_module(repo_root)?;
    if !module_name.starts_with(&root_module) {
        return None;
    }
    let rel_pkg = module_name[root_module.len()..].trim_start_matches('/');
    let prefix = if rel_pkg.is_empty() {
        String::new()
    } else {
        format!("{rel_pkg}/")
    };
    let mut candidates: Vec<String> = all_files
        .keys()
        .filter(|p| p.starts_with(&prefix) && p.ends_with(".go"))
        .cloned()
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn read_go_module(repo_root: &str) -> Option<String> {
    let content = std::fs::read_to_string(Path::new(repo_root).join("go.mod")).ok()?;
    for line in content.lines() {
        if let Some(module) = line.trim().strip_prefix("module ") {
            return Some(module.trim().to_string());
        }
    }
    None
}

/// Resolve one file's imports against the repository file map
/// (path -> language tag).
pub fn resolve_imports(
    repo_root: &str,
    source_path: &str,
    language: Language,
    imports: &[ImportRecord],
    all_files: &HashMap<String, String>,
) -> Vec<ResolvedImport> {
    imports
        .iter()
        .map(|record| {
            let resolved_path = match language {
                Language::Python => resolve_python(source_path, &record.module_name, all_files),
                Language::TypeScript => {
                    resolve_typescript(source_path, &record.module_name, all_files)
                }
                Language::Java => resolve_java(&record.module_name, all_files),
                Language::Go => resolve_go(repo_root, source_path, &record.module_name, all_files),
            };
            ResolvedImport {
                record: record.clone(),
                resolved_path,
            }
        })
        .collect()
}

/// External dependency record for an unresolved import.
pub fn external_dep(resolved: &ResolvedImport) -> ExternalDepRecord {
    ExternalDepRecord {
        file_path: resolved.record.source_file_path.clone(),
        import_statement: resolved.record.import_statement.clone(),
        module_name: resolved.record.module_name.clone(),
        line_number: Some(resolved.record.line_number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, module: &str, names: &[&str]) -> ImportRecord {
        ImportRecord {
            source_file_path: source.to_string(),
            import_statement: format!("import {module}"),
            module_name: module.to_string(),
            imported_names: names.iter().map(|n| n.to_string()).collect(),
            line_number: 1,
        }
    }

    fn files(paths: &[&str]) -> HashMap<String, String> {
        paths
            .iter()
            .map(|p| (p.to_string(), "python".to_string()))
            .collect()
    }

    #[test]
    fn python_dotted_module_resolves() {
        let all = files(&["pkg/util.py", "pkg/__init__.py"]);
        assert_eq!(
            resolve_python("main.py", "pkg.util", &all),
            Some("pkg/util.py".to_string())
        );
        assert_eq!(
            resolve_python("main.py", "pkg", &all),
            Some("pkg/__init__.py".to_string())
        );
        assert_eq!(resolve_python("main.py", "numpy", &all), None);
    }

    #[test]
    fn python_relative_module_resolves() {
        let all = files(&["pkg/sibling.py"]);
        assert_eq!(
            resolve_python("pkg/mod.py", ".sibling", &all),
            Some("pkg/sibling.py".to_string())
        );
    }

    #[test]
    fn typescript_ladder_resolves() {
        let all = files(&["src/auth.ts", "src/widgets/index.tsx"]);
        assert_eq!(
            resolve_typescript("src/app.ts", "./auth", &all),
            Some("src/auth.ts".to_string())
        );
        assert_eq!(
            resolve_typescript("src/app.ts", "./widgets", &all),
            Some("src/widgets/index.tsx".to_string())
        );
        // Bare specifiers stay external.
        assert_eq!(resolve_typescript("src/app.ts", "react", &all), None);
    }

    #[test]
    fn java_package_path_resolves() {
        let all = files(&["com/example/MyClass.java", "com/example/Other.java"]);
        assert_eq!(
            resolve_java("com.example.MyClass", &all),
            Some("com/example/MyClass.java".to_string())
        );
        // Wildcard picks the lexicographically first member.
        assert_eq!(
            resolve_java("com.example.*", &all),
            Some("com/example/MyClass.java".to_string())
        );
        assert_eq!(resolve_java("java.util.List", &all), None);
    }

    #[test]
    fn go_module_path_resolves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
        let all = files(&["internal/db/db.go", "main.go"]);
        assert_eq!(
            resolve_go(
                dir.path().to_str().unwrap(),
                "main.go",
                "example.com/app/internal/db",
                &all
            ),
            Some("internal/db/db.go".to_string())
        );
        assert_eq!(
            resolve_go(dir.path().to_str().unwrap(), "main.go", "fmt", &all),
            None
        );
    }

    #[test]
    fn resolve_imports_splits_internal_and_external() {
        let all = files(&["b.py"]);
        let resolved = resolve_imports(
            "/repo",
            "a.py",
            Language::Python,
            &[record("a.py", "b", &["g"]), record("a.py", "requests", &[])],
            &all,
        );
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].resolved_path.as_deref(), Some("b.py"));
        assert!(resolved[1].resolved_path.is_none());

        let dep = external_dep(&resolved[1]);
        assert_eq!(dep.module_name, "requests");
        assert_eq!(dep.file_path, "a.py");
    }

    #[test]
    fn normalize_posix_path_collapses_dots() {
        assert_eq!(normalize_posix_path("a/./b/../c"), "a/c");
        assert_eq!(normalize_posix_path("./x/y"), "x/y");
    }
}
