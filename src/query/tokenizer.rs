//! Token estimation.
//!
//! Engines never depend on a concrete tokenizer: they call through the
//! [`TokenEstimator`] trait so a model-aware implementation can be slotted
//! in. The default is the `chars / 3.5` heuristic, floored at one token
//! for non-empty text.

/// Anything that can price a string in tokens.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> i64;
}

/// Character-ratio heuristic used when no model tokenizer is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl TokenEstimator for HeuristicTokenizer {
    fn estimate(&self, text: &str) -> i64 {
        estimate_tokens(text)
    }
}

/// Estimate tokens with the default heuristic.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() as f64 / 3.5).max(1.0)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_free() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn short_text_costs_at_least_one() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("ab"), 1);
    }

    #[test]
    fn scales_with_length() {
        assert_eq!(estimate_tokens(&"x".repeat(35)), 10);
        assert_eq!(estimate_tokens(&"x".repeat(350)), 100);
    }

    #[test]
    fn trait_object_dispatch() {
        let tokenizer: &dyn TokenEstimator = &HeuristicTokenizer;
        assert_eq!(tokenizer.estimate("hello world"), 3);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn estimate_is_monotone_in_length(text in "[a-z ]{0,400}") {
            let shorter = estimate_tokens(&text);
            let longer = estimate_tokens(&format!("{text}{text}"));
            prop_assert!(longer >= shorter);
        }
    }
}
