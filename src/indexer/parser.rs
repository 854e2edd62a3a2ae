//! Native tree-sitter parser wrapper.
//!
//! Grammars are statically linked and the extraction queries are embedded
//! at compile time via `include_str!`. `CodeParser` carries no state:
//! tree-sitter's `Parser` is `!Send + !Sync`, so a fresh parser is created
//! per call rather than wrestling with thread-safety wrappers. Allocation
//! is a single malloc and `set_language` is a pointer swap.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::Language;

/// Thin wrapper around tree-sitter parsing and query compilation.
pub struct CodeParser;

impl CodeParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `content` with the grammar for `language`. `file_path` picks
    /// the TSX dialect for `.tsx` files; both carry the `typescript` tag.
    pub fn parse(
        &self,
        content: &str,
        language: Language,
        file_path: &str,
    ) -> Result<tree_sitter::Tree> {
        let ts_lang = Self::ts_language(language, file_path);
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&ts_lang)
            .map_err(|e| Error::Parse(format!("Grammar version mismatch for {language}: {e}")))?;
        parser
            .parse(content, None)
            .ok_or_else(|| Error::Parse(format!("Parser returned no tree for {file_path}")))
    }

    /// Native `tree_sitter::Language` for a language tag.
    #[must_use]
    pub fn ts_language(language: Language, file_path: &str) -> tree_sitter::Language {
        match language {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::TypeScript => {
                if file_path.ends_with(".tsx") {
                    tree_sitter_typescript::LANGUAGE_TSX.into()
                } else {
                    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
                }
            }
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Embedded `.scm` query source for a language.
    #[must_use]
    pub fn query_source(language: Language) -> &'static str {
        match language {
            Language::Python => include_str!("../../queries/python.scm"),
            Language::TypeScript => include_str!("../../queries/typescript.scm"),
            Language::Java => include_str!("../../queries/java.scm"),
            Language::Go => include_str!("../../queries/go.scm"),
        }
    }

    /// Compile the extraction query for `language` against the grammar
    /// that will parse `file_path`.
    pub fn load_query(language: Language, file_path: &str) -> Result<tree_sitter::Query> {
        let ts_lang = Self::ts_language(language, file_path);
        tree_sitter::Query::new(&ts_lang, Self::query_source(language))
            .map_err(|e| Error::Parse(format!("Query compilation failed for {language}: {e}")))
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Availability of one language backend.
#[derive(Debug, Clone, Serialize)]
pub struct LanguageCapability {
    pub language: &'static str,
    pub available: bool,
    pub reason: String,
}

/// Report grammar/query availability for every supported language.
pub fn capability_report() -> Vec<LanguageCapability> {
    ALL_LANGUAGES
        .iter()
        .map(|&lang| {
            let probe = CodeParser::load_query(lang, "probe");
            LanguageCapability {
                language: lang.as_str(),
                available: probe.is_ok(),
                reason: match probe {
                    Ok(_) => "ok".to_string(),
                    Err(e) => e.to_string(),
                },
            }
        })
        .collect()
}

/// Fail when any required grammar or query is unavailable. The strict
/// runtime profile calls this before the first index run.
pub fn verify_grammars() -> Result<()> {
    for capability in capability_report() {
        if !capability.available {
            return Err(Error::Parse(format!(
                "Required parser unavailable for {}: {}",
                capability.language, capability.reason
            )));
        }
    }
    Ok(())
}

const ALL_LANGUAGES: [Language; 4] = [
    Language::Python,
    Language::TypeScript,
    Language::Java,
    Language::Go,
];
