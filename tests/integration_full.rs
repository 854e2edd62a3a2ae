//! End-to-end scenarios: index real fixture trees and drive the query
//! engines against the resulting store.

use std::path::Path;

use bombe::indexer::pipeline::{full_index, incremental_index, IndexOptions};
use bombe::models::FileChange;
use bombe::query::blast::{get_blast_radius, BlastRadiusRequest};
use bombe::query::change_impact::{change_impact, ChangeImpactRequest};
use bombe::query::context::{get_context, ContextRequest};
use bombe::query::data_flow::{trace_data_flow, DataFlowRequest};
use bombe::query::references::{get_references, ReferencesRequest};
use bombe::query::search::{search_symbols, SearchRequest};
use bombe::query::structure::{get_structure, StructureRequest};
use bombe::Store;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn index(dir: &Path) -> Store {
    let store = Store::open_in_memory().unwrap();
    full_index(dir, &store, &IndexOptions::default()).unwrap();
    store
}

// ---------------------------------------------------------------------------
// Scenario 1: cross-file call reference
// ---------------------------------------------------------------------------

#[test]
fn cross_file_call_is_one_exact_reference() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "from b import g\n\ndef f():\n    g()\n");
    write(dir.path(), "b.py", "def g():\n    return 1\n");
    let store = index(dir.path());

    let response = get_references(
        &store,
        dir.path(),
        &ReferencesRequest::new("f", "callees", 1),
    )
    .unwrap();

    assert_eq!(response.callees.len(), 1);
    let callee = &response.callees[0];
    assert_eq!(callee.qualified_name, "b.g");
    assert_eq!(callee.file_path, "b.py");
    assert_eq!(callee.line_number, 4, "edge carries the call-site line");
}

// ---------------------------------------------------------------------------
// Scenario 2: class hierarchy change impact
// ---------------------------------------------------------------------------

#[test]
fn signature_change_on_base_class_reaches_subclasses() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "zoo.py",
        "class Animal:\n    pass\n\nclass Dog(Animal):\n    pass\n\nclass Cat(Animal):\n    pass\n",
    );
    let store = index(dir.path());

    let response = change_impact(
        &store,
        &ChangeImpactRequest::new("Animal", "signature", 2),
    )
    .unwrap();

    let names: Vec<&str> = response
        .type_dependents
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert!(names.contains(&"Dog"), "{names:?}");
    assert!(names.contains(&"Cat"), "{names:?}");
    assert!(response.type_dependents.iter().all(|d| d.depth == 1));
}

// ---------------------------------------------------------------------------
// Scenario 3: 100-function chain blast radius
// ---------------------------------------------------------------------------

#[test]
fn chain_blast_radius_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mut chain = String::new();
    for i in 0..100 {
        if i < 99 {
            chain.push_str(&format!("def f{i}():\n    f{}()\n\n", i + 1));
        } else {
            chain.push_str(&format!("def f{i}():\n    pass\n"));
        }
    }
    write(dir.path(), "chain.py", &chain);
    let store = index(dir.path());
    assert_eq!(store.symbol_count().unwrap(), 100);

    let response = get_blast_radius(&store, &BlastRadiusRequest::new("f50", "behavior", 3)).unwrap();
    let mut names: Vec<String> = response
        .direct_dependents
        .iter()
        .chain(response.transitive_dependents.iter())
        .map(|d| d.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["f47", "f48", "f49"]);
}

// ---------------------------------------------------------------------------
// Scenario 4: authenticate flow context bundle
// ---------------------------------------------------------------------------

#[test]
fn authenticate_flow_bundle_links_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "auth.py",
        "\
def login(user, password):
    \"\"\"Entry point for the authenticate flow.\"\"\"
    return authenticate(user, password)

def authenticate(user, password):
    return verify_password(user, password)

def verify_password(user, password):
    return password == user.password_hash
",
    );
    let store = index(dir.path());

    let response = get_context(&store, dir.path(), &ContextRequest::new("authenticate flow")).unwrap();
    assert!(response.tokens_used <= response.token_budget);

    let has_edge = |src: &str, dst: &str| {
        response
            .relationship_summary
            .iter()
            .any(|e| e.source == src && e.target == dst && e.relationship == "CALLS")
    };
    assert!(has_edge("login", "authenticate"));
    assert!(has_edge("authenticate", "verify_password"));
}

// ---------------------------------------------------------------------------
// Scenario 5: secrets never leave the engine
// ---------------------------------------------------------------------------

#[test]
fn indexed_secret_is_redacted_in_context_output() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "legacy.py",
        "\
def legacy_credentials():
    \"\"\"Falls back to AKIA0000000000000000 when unset.\"\"\"
    return None
",
    );
    let store = index(dir.path());

    // The symbol itself is indexed.
    let search = search_symbols(&store, &SearchRequest::new("legacy_credentials")).unwrap();
    assert_eq!(search.symbols.len(), 1);

    let response = get_context(&store, dir.path(), &ContextRequest::new("legacy credentials")).unwrap();
    assert!(response.symbols_included >= 1);
    let serialized = serde_json::to_string(&response).unwrap();
    assert!(!serialized.contains("AKIA0000000000000000"));
}

// ---------------------------------------------------------------------------
// Scenario 6: incremental reindex after touching one file
// ---------------------------------------------------------------------------

#[test]
fn touching_one_file_replaces_only_its_symbols() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "from b import g\n\ndef f():\n    g()\n");
    write(dir.path(), "b.py", "def g():\n    return 1\n");
    let store = index(dir.path());
    let a_ids_before = store.symbol_ids_for_file("a.py").unwrap();
    let b_ids_before = store.symbol_ids_for_file("b.py").unwrap();

    write(dir.path(), "b.py", "def g():\n    return 2\n");
    incremental_index(
        dir.path(),
        &store,
        &[FileChange::modified("b.py")],
        &IndexOptions::default(),
    )
    .unwrap();

    assert_eq!(
        store.symbol_ids_for_file("a.py").unwrap(),
        a_ids_before,
        "a.py symbol ids must be unchanged"
    );
    assert_ne!(
        store.symbol_ids_for_file("b.py").unwrap(),
        b_ids_before,
        "b.py symbols were replaced"
    );

    // The cross-file CALLS edge was re-resolved against the new target.
    let response = get_references(
        &store,
        dir.path(),
        &ReferencesRequest::new("f", "callees", 1),
    )
    .unwrap();
    assert_eq!(response.callees.len(), 1);
    assert_eq!(response.callees[0].qualified_name, "b.g");
}

// ---------------------------------------------------------------------------
// Determinism and idempotence
// ---------------------------------------------------------------------------

#[test]
fn fresh_reindex_is_bit_stable() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "from b import g\n\ndef f():\n    g()\n");
    write(dir.path(), "b.py", "def g():\n    helper()\n\ndef helper():\n    pass\n");
    write(dir.path(), "sub/c.py", "from b import g\n\ndef other():\n    g()\n");

    let first = index(dir.path());
    let second = index(dir.path());

    assert_eq!(first.symbol_keys().unwrap(), second.symbol_keys().unwrap());
    assert_eq!(first.edge_keys().unwrap(), second.edge_keys().unwrap());

    let ranks = |store: &Store| -> Vec<(String, f64)> {
        let conn = store.conn();
        let mut stmt = conn
            .prepare("SELECT qualified_name, pagerank_score FROM symbols ORDER BY qualified_name;")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    };
    for ((qa, ra), (qb, rb)) in ranks(&first).iter().zip(ranks(&second).iter()) {
        assert_eq!(qa, qb);
        assert!((ra - rb).abs() < 1e-6, "{qa}: {ra} vs {rb}");
    }
}

#[test]
fn second_run_is_a_noop_observed_via_epoch() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def f():\n    pass\n");
    let store = index(dir.path());

    let epoch_before = store.cache_epoch().unwrap();
    let stats = full_index(dir.path(), &store, &IndexOptions::default()).unwrap();
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(store.cache_epoch().unwrap(), epoch_before);
}

#[test]
fn delete_then_reindex_equals_never_indexed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "keep.py", "def stay():\n    pass\n");
    write(dir.path(), "gone.py", "def leave():\n    pass\n");
    let store = index(dir.path());

    std::fs::remove_file(dir.path().join("gone.py")).unwrap();
    full_index(dir.path(), &store, &IndexOptions::default()).unwrap();

    // Reference store that never saw gone.py.
    let reference_dir = tempfile::tempdir().unwrap();
    write(reference_dir.path(), "keep.py", "def stay():\n    pass\n");
    let reference = index(reference_dir.path());

    assert_eq!(
        store.symbol_keys().unwrap(),
        reference.symbol_keys().unwrap()
    );
    assert_eq!(store.edge_keys().unwrap(), reference.edge_keys().unwrap());
}

// ---------------------------------------------------------------------------
// Backup / restore
// ---------------------------------------------------------------------------

#[test]
fn backup_restore_preserves_query_responses() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def f():\n    g()\n\ndef g():\n    pass\n");

    let db_dir = tempfile::tempdir().unwrap();
    let mut store = Store::open(&db_dir.path().join("main.db")).unwrap();
    full_index(dir.path(), &store, &IndexOptions::default()).unwrap();

    let before = search_symbols(&store, &SearchRequest::new("f")).unwrap();
    let backup_path = db_dir.path().join("backup.db");
    store.backup_to(&backup_path).unwrap();

    store.delete_file_graph("a.py").unwrap();
    assert!(search_symbols(&store, &SearchRequest::new("f"))
        .unwrap()
        .symbols
        .is_empty());

    store.restore_from(&backup_path).unwrap();
    let after = search_symbols(&store, &SearchRequest::new("f")).unwrap();
    assert_eq!(
        serde_json::to_value(&before).unwrap(),
        serde_json::to_value(&after).unwrap()
    );
}

// ---------------------------------------------------------------------------
// Cross-language smoke: all four languages index into one graph
// ---------------------------------------------------------------------------

#[test]
fn four_language_tree_indexes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "app.py", "def py_entry():\n    pass\n");
    write(dir.path(), "web.ts", "export function tsEntry(): void {}\n");
    write(
        dir.path(),
        "Main.java",
        "package app;\n\npublic class Main {\n    public static void run() {\n    }\n}\n",
    );
    write(dir.path(), "main.go", "package main\n\nfunc GoEntry() {\n}\n");

    let store = index(dir.path());
    let keys = store.symbol_keys().unwrap();
    let qualified: Vec<&str> = keys.iter().map(|k| k.qualified_name.as_str()).collect();
    assert!(qualified.contains(&"app.py_entry"));
    assert!(qualified.contains(&"web.tsEntry"));
    assert!(qualified.contains(&"app.Main"));
    assert!(qualified.contains(&"app.Main.run"));
    assert!(qualified.contains(&"main.GoEntry"));

    let structure = get_structure(&store, &StructureRequest::new(".")).unwrap();
    assert!(structure.rendered.contains("Main.java"));
    assert!(structure.tokens_used <= structure.token_budget);
}

// ---------------------------------------------------------------------------
// Data flow over an indexed tree
// ---------------------------------------------------------------------------

#[test]
fn data_flow_traces_indexed_chain() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "flow.py",
        "def source():\n    middle()\n\ndef middle():\n    sink()\n\ndef sink():\n    pass\n",
    );
    let store = index(dir.path());

    let response = trace_data_flow(&store, &DataFlowRequest::new("middle", "both", 2)).unwrap();
    let roles: std::collections::HashMap<String, String> = response
        .nodes
        .iter()
        .map(|n| (n.name.clone(), n.role.clone()))
        .collect();
    assert_eq!(roles["middle"], "target");
    assert_eq!(roles["source"], "upstream");
    assert_eq!(roles["sink"], "downstream");
}

// ---------------------------------------------------------------------------
// Response cache keyed by the store's cache epoch
// ---------------------------------------------------------------------------

#[test]
fn planner_serves_cached_responses_until_reindex() {
    use bombe::query::planner::QueryPlanner;

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def f():\n    pass\n");
    let store = index(dir.path());
    let planner = QueryPlanner::default();

    let request = SearchRequest::new("f");
    let payload = serde_json::to_value(&request).unwrap();
    let run = |planner: &QueryPlanner, store: &Store| {
        let epoch = store.cache_epoch().unwrap();
        planner
            .get_or_compute("search_symbols", &payload, epoch, || {
                let response = search_symbols(store, &request)?;
                Ok(serde_json::to_value(response)?)
            })
            .unwrap()
    };

    let (_, trace) = run(&planner, &store);
    assert_eq!(trace.cache_mode, "cache_miss");
    let (_, trace) = run(&planner, &store);
    assert_eq!(trace.cache_mode, "cache_hit");

    // Reindexing with a change bumps the epoch and invalidates.
    write(dir.path(), "a.py", "def f():\n    return 1\n");
    full_index(dir.path(), &store, &IndexOptions::default()).unwrap();
    let (_, trace) = run(&planner, &store);
    assert_eq!(trace.cache_mode, "cache_miss");
}
