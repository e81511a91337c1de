//! Error types for geoip-ruleset.

use thiserror::Error;

/// Error type for geoip-ruleset operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required input (release asset, CIDR list) could not be retrieved
    #[error("source unavailable: {name}: {reason}")]
    SourceUnavailable { name: String, reason: String },

    /// Input trie bytes are not a well-formed MMDB database
    #[error("invalid trie database: {0}")]
    Decode(String),

    /// Trie insertion or serialization failed
    #[error("trie encoding failed: {0}")]
    Encode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Download error
    #[error("download error: {0}")]
    Download(#[from] reqwest::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a [`Error::SourceUnavailable`] for the named source.
    pub fn source_unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<maxminddb::MaxMindDBError> for Error {
    fn from(err: maxminddb::MaxMindDBError) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Result type alias for geoip-ruleset operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single CIDR line that failed to parse.
///
/// Recovered locally: the reader logs it, records it and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid CIDR in {origin} line {line}: {content}")]
pub struct MalformedLineError {
    /// Name of the source the line came from (URL or path)
    pub origin: String,
    /// 1-based line number
    pub line: usize,
    /// The trimmed line content
    pub content: String,
}
