//! Store-level invariants checked over a real indexed fixture.

use std::path::Path;

use bombe::indexer::pipeline::{full_index, IndexOptions};
use bombe::query::context::{get_context, ContextRequest};
use bombe::query::references::{get_references, ReferencesRequest};
use bombe::query::structure::{get_structure, StructureRequest};
use bombe::Store;
use test_case::test_case;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "svc.py",
        "\
from util import shared

class Service:
    \"\"\"Coordinates work.\"\"\"

    def run(self):
        self.prepare()
        shared()

    def prepare(self):
        pass

def standalone():
    shared()
",
    );
    write(dir.path(), "util.py", "def shared():\n    return 42\n");
    let store = Store::open_in_memory().unwrap();
    full_index(dir.path(), &store, &IndexOptions::default()).unwrap();
    (dir, store)
}

#[test]
fn every_edge_endpoint_exists() {
    let (_dir, store) = fixture();
    let conn = store.conn();

    // Symbol-typed endpoints must reference live symbol rows.
    let dangling: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM edges e
             WHERE (e.source_type = 'symbol'
                    AND NOT EXISTS (SELECT 1 FROM symbols s WHERE s.id = e.source_id))
                OR (e.target_type = 'symbol'
                    AND NOT EXISTS (SELECT 1 FROM symbols s WHERE s.id = e.target_id));",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(dangling, 0);
}

#[test]
fn symbol_ranges_are_well_formed() {
    let (_dir, store) = fixture();
    let conn = store.conn();
    let bad_ranges: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM symbols WHERE start_line > end_line;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(bad_ranges, 0);
}

#[test]
fn parent_symbols_contain_their_children() {
    let (_dir, store) = fixture();
    let conn = store.conn();
    let violations: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM symbols child
             JOIN symbols parent ON parent.id = child.parent_symbol_id
             WHERE parent.file_path != child.file_path
                OR parent.start_line > child.start_line
                OR parent.end_line < child.end_line;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(violations, 0);

    // And the fixture actually exercises parenting.
    let linked: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM symbols WHERE parent_symbol_id IS NOT NULL;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(linked >= 2, "methods should link to Service");
}

#[test]
fn pagerank_scores_are_positive_after_refresh() {
    let (_dir, store) = fixture();
    let conn = store.conn();
    let non_positive: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM symbols WHERE pagerank_score <= 0.0;",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(non_positive, 0);
}

#[test]
fn fts_rows_track_symbol_rows() {
    let (_dir, store) = fixture();
    let conn = store.conn();
    let symbols: i64 = conn
        .query_row("SELECT COUNT(*) FROM symbols;", [], |row| row.get(0))
        .unwrap();
    let fts_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM symbol_fts;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(symbols, fts_rows);
}

#[test_case(256 ; "floor_budget")]
#[test_case(1000 ; "small_budget")]
#[test_case(8000 ; "default_budget")]
#[test_case(32000 ; "ceiling_budget")]
fn context_respects_every_budget(budget: i64) {
    let (dir, store) = fixture();
    let mut request = ContextRequest::new("service run shared");
    request.token_budget = budget;
    let response = get_context(&store, dir.path(), &request).unwrap();
    assert!(response.tokens_used <= response.token_budget);
    assert_eq!(response.token_budget, budget);
}

#[test_case(1 ; "budget_one")]
#[test_case(50 ; "budget_fifty")]
#[test_case(500 ; "budget_five_hundred")]
fn structure_respects_every_budget(budget: i64) {
    let (_dir, store) = fixture();
    let mut request = StructureRequest::new(".");
    request.token_budget = budget;
    let response = get_structure(&store, &request).unwrap();
    assert!(response.tokens_used <= response.token_budget);
}

#[test]
fn overlong_depth_matches_capped_depth_exactly() {
    let (dir, store) = fixture();
    let capped = get_references(
        &store,
        dir.path(),
        &ReferencesRequest::new("shared", "callers", 6),
    )
    .unwrap();
    let overlong = get_references(
        &store,
        dir.path(),
        &ReferencesRequest::new("shared", "callers", 10_000),
    )
    .unwrap();
    assert_eq!(
        serde_json::to_value(&capped).unwrap(),
        serde_json::to_value(&overlong).unwrap()
    );
}

#[test]
fn unknown_symbols_are_empty_everywhere() {
    let (dir, store) = fixture();

    let references = get_references(
        &store,
        dir.path(),
        &ReferencesRequest::new("does_not_exist", "both", 2),
    )
    .unwrap();
    assert!(references.target.is_none());

    let blast = bombe::query::blast::get_blast_radius(
        &store,
        &bombe::query::blast::BlastRadiusRequest::new("does_not_exist", "delete", 2),
    )
    .unwrap();
    assert!(blast.target.is_none());

    let flow = bombe::query::data_flow::trace_data_flow(
        &store,
        &bombe::query::data_flow::DataFlowRequest::new("does_not_exist", "both", 2),
    )
    .unwrap();
    assert!(flow.target.is_none());

    let impact = bombe::query::change_impact::change_impact(
        &store,
        &bombe::query::change_impact::ChangeImpactRequest::new("does_not_exist", "behavior", 2),
    )
    .unwrap();
    assert!(impact.target.is_none());
}

#[test]
fn rename_roundtrip_preserves_keys() {
    let (_dir, store) = fixture();
    let symbols_before = store.symbol_keys().unwrap();
    let edges_before = store.edge_keys().unwrap();

    store.rename_file("util.py", "helpers.py").unwrap();
    store.rename_file("helpers.py", "util.py").unwrap();

    assert_eq!(store.symbol_keys().unwrap(), symbols_before);
    assert_eq!(store.edge_keys().unwrap(), edges_before);
}
