//! Error types for the Bombe engine.
//!
//! Every failure surfaced to a caller carries a stable `code()` string so
//! tool facades can map errors without matching on display text.

/// Top-level error enum for the Bombe engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Store schema version {found} is newer than supported version {supported}")]
    SchemaIncompatible { found: i32, supported: i32 },

    #[error("Migration {from_version} -> {to_version} failed: {message}")]
    MigrationFailed {
        from_version: i32,
        to_version: i32,
        message: String,
    },

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote call timed out after {0} ms")]
    RemoteTimeout(u64),

    #[error("Artifact incompatible: {0}")]
    ArtifactIncompatible(String),

    #[error("Artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    #[error("Artifact signature mismatch: {0}")]
    SignatureMismatch(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Store(_) => "STORE_ERROR",
            Error::Json(_) => "STORE_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Query(_) => "QUERY_ERROR",
            Error::Index(_) => "INDEX_ERROR",
            Error::SchemaIncompatible { .. } => "SCHEMA_INCOMPATIBLE",
            Error::MigrationFailed { .. } => "MIGRATION_FAILED",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::RemoteTimeout(_) => "REMOTE_TIMEOUT",
            Error::ArtifactIncompatible(_) => "ARTIFACT_INCOMPATIBLE",
            Error::ArtifactCorrupt(_) => "ARTIFACT_CORRUPT",
            Error::SignatureMismatch(_) => "SIGNATURE_MISMATCH",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Parse("x".into()).code(), "PARSE_ERROR");
        assert_eq!(
            Error::SchemaIncompatible {
                found: 9,
                supported: 7
            }
            .code(),
            "SCHEMA_INCOMPATIBLE"
        );
        assert_eq!(Error::RemoteTimeout(500).code(), "REMOTE_TIMEOUT");
        assert_eq!(
            Error::ArtifactCorrupt("checksum".into()).code(),
            "ARTIFACT_CORRUPT"
        );
    }

    #[test]
    fn io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), "IO_ERROR");
    }
}
