use std::path::PathBuf;

use thiserror::Error;

// Misuse of the attribute store, always a programming error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("unknown attribute field \"{0}\"")]
    UnknownField(String),
    #[error("attribute \"{field}\" expects a {expected} value")]
    KindMismatch {
        field: &'static str,
        expected: &'static str,
    },
}

// The main inventory error type.
// Variants only own plain data so an error can be stored on the
// record it belongs to and compared in tests
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Configuration(#[from] AttributeError),

    // An expected file or tool is absent
    #[error("{source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    // A source is present but its content is malformed
    #[error("failed to parse {what} from {origin}: {reason}")]
    Parse {
        what: String,
        origin: String,
        reason: String,
    },

    // Data from one source has no counterpart in the fleet
    #[error("no device matches {key} reported by {source_name}")]
    CorrelationMiss { source_name: String, key: String },

    // A mandatory per-card file or the discovery root is missing
    #[error("fatal for {}: {reason}", path.display())]
    PreconditionFatal { path: PathBuf, reason: String },
}

impl InventoryError {
    pub fn unavailable(
        source_name: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(
        what: impl Into<String>,
        origin: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Parse {
            what: what.into(),
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub fn miss(source_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::CorrelationMiss {
            source_name: source_name.into(),
            key: key.into(),
        }
    }

    pub fn fatal(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::PreconditionFatal {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PreconditionFatal { .. })
    }
}
