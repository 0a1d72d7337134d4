//! Structured parse failure reasons (spec §4.1, §7).

use serde::{Deserialize, Serialize};

/// A machine-readable reason a parser could not produce a canonical event.
///
/// These map directly onto the ingest endpoints' 400/422 responses (spec
/// §6, §7): parsers never raise through the ingest layer, they return this
/// type instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ParseFailure {
    /// A required field was absent.
    #[error("missing field: {field}")]
    MissingField {
        /// The field that was required but absent.
        field: String,
    },
    /// The input did not conform to the expected shape for its format.
    #[error("malformed input: {detail}")]
    Malformed {
        /// Human-readable detail for operator diagnosis.
        detail: String,
    },
    /// The input does not match any known source format.
    #[error("unknown format")]
    UnknownFormat,
    /// A checksum/validation digit embedded in the input did not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

impl ParseFailure {
    /// Construct a [`ParseFailure::MissingField`].
    pub fn missing(field: impl Into<String>) -> Self {
        ParseFailure::MissingField {
            field: field.into(),
        }
    }

    /// Construct a [`ParseFailure::Malformed`].
    pub fn malformed(detail: impl Into<String>) -> Self {
        ParseFailure::Malformed {
            detail: detail.into(),
        }
    }
}
