//! Shared guardrails: hard caps and clamping for every inbound request.
//!
//! Violations never reject a request; inputs are clamped to the bound
//! and the clamped values surface in the planner trace when asked for.

pub const MAX_QUERY_LENGTH: usize = 512;
pub const MAX_SEARCH_LIMIT: i64 = 100;
pub const MAX_REFERENCE_DEPTH: i64 = 6;
pub const MAX_FLOW_DEPTH: i64 = 6;
pub const MAX_IMPACT_DEPTH: i64 = 6;
pub const MAX_BLAST_DEPTH: i64 = 6;
pub const MAX_CONTEXT_EXPANSION_DEPTH: i64 = 4;
pub const MAX_CONTEXT_SEEDS: usize = 32;
pub const MAX_ENTRY_POINTS: usize = 32;
pub const MAX_CONTEXT_TOKEN_BUDGET: i64 = 32000;
pub const MIN_CONTEXT_TOKEN_BUDGET: i64 = 256;
pub const MAX_STRUCTURE_TOKEN_BUDGET: i64 = 32000;
pub const MIN_STRUCTURE_TOKEN_BUDGET: i64 = 1;
pub const MAX_GRAPH_VISITED: i64 = 2000;
pub const MAX_GRAPH_EDGES: i64 = 5000;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Depths clamp into [1, max]: zero or negative depths still walk one hop.
pub fn clamp_depth(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}

pub fn clamp_budget(value: i64, minimum: i64, maximum: i64) -> i64 {
    clamp_int(value, minimum, maximum)
}

/// Limits clamp into [0, max]: zero is a valid request for an empty list.
pub fn clamp_limit(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 0, maximum)
}

/// Trim and truncate a free-text query to the hard length cap, never
/// splitting a UTF-8 codepoint.
pub fn truncate_query(query: &str) -> String {
    let stripped = query.trim();
    if stripped.len() <= MAX_QUERY_LENGTH {
        return stripped.to_string();
    }
    let mut cut = MAX_QUERY_LENGTH;
    while cut > 0 && !stripped.is_char_boundary(cut) {
        cut -= 1;
    }
    stripped[..cut].to_string()
}

/// Scale traversal caps to the repository: roughly 20% of the symbol
/// count, bounded below by `floor` and above by `base_cap`.
pub fn adaptive_graph_cap(total_symbols: i64, base_cap: i64, floor: i64) -> i64 {
    let bounded_total = total_symbols.max(0);
    let estimated = floor.max((bounded_total.max(1) as f64 * 0.2) as i64);
    clamp_int(estimated, floor, base_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 6, 1 ; "depth_zero_becomes_one")]
    #[test_case(-3, 6, 1 ; "negative_depth_becomes_one")]
    #[test_case(3, 6, 3 ; "in_range_depth_kept")]
    #[test_case(99, 6, 6 ; "over_max_depth_clamped")]
    fn depth_clamps(value: i64, max: i64, expected: i64) {
        assert_eq!(clamp_depth(value, max), expected);
    }

    #[test_case(0, 100, 0 ; "limit_zero_allowed")]
    #[test_case(-5, 100, 0 ; "negative_limit_floors_at_zero")]
    #[test_case(20, 100, 20 ; "in_range_limit_kept")]
    #[test_case(500, 100, 100 ; "over_max_limit_clamped")]
    fn limit_clamps(value: i64, max: i64, expected: i64) {
        assert_eq!(clamp_limit(value, max), expected);
    }

    #[test]
    fn budget_clamps_to_range() {
        assert_eq!(clamp_budget(10, 256, 32000), 256);
        assert_eq!(clamp_budget(8000, 256, 32000), 8000);
        assert_eq!(clamp_budget(99999, 256, 32000), 32000);
    }

    #[test]
    fn truncate_query_respects_cap_and_boundaries() {
        assert_eq!(truncate_query("  hello  "), "hello");
        let long = "x".repeat(600);
        assert_eq!(truncate_query(&long).len(), MAX_QUERY_LENGTH);
        // Multi-byte characters never split.
        let wide = "é".repeat(400);
        let truncated = truncate_query(&wide);
        assert!(truncated.len() <= MAX_QUERY_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn adaptive_cap_scales_with_repo() {
        assert_eq!(adaptive_graph_cap(0, 2000, 200), 200);
        assert_eq!(adaptive_graph_cap(1000, 2000, 200), 200);
        assert_eq!(adaptive_graph_cap(5000, 2000, 200), 1000);
        assert_eq!(adaptive_graph_cap(100_000, 2000, 200), 2000);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn truncate_never_exceeds_cap(q in "\\PC{0,800}") {
            prop_assert!(truncate_query(&q).len() <= MAX_QUERY_LENGTH);
        }

        #[test]
        fn adaptive_cap_within_bounds(total in -10i64..1_000_000) {
            let cap = adaptive_graph_cap(total, MAX_GRAPH_VISITED, 128);
            prop_assert!(cap >= 128);
            prop_assert!(cap <= MAX_GRAPH_VISITED);
        }
    }
}
