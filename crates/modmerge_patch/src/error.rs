//! Error types for patch operations.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. External error types (`std::io::Error`, `serde_json::Error`,
//! MessagePack errors) are converted via `From` impls.
//!
//! Precondition violations ([`MixedDefinitionTypes`](Error::MixedDefinitionTypes),
//! [`EmptyDefinitionGroup`](Error::EmptyDefinitionGroup),
//! [`MixedModPaths`](Error::MixedModPaths)) indicate a caller bug. They are logged at
//! error level where raised and never produce output.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while indexing, detecting conflicts or merging.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (reading mods, writing patch files or cache entries).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (patch state, cache signature).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to encode the definition cache blob.
    #[error("Cache encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode the definition cache blob.
    #[error("Cache decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Error from the definitions crate (disk store I/O).
    #[error("Definition store error: {0}")]
    Definitions(#[from] modmerge_definitions::Error),

    /// A merge group contains more than one non-declaration type.
    #[error("Cannot merge definitions of different types: {}", types.join(", "))]
    MixedDefinitionTypes { types: Vec<String> },

    /// A merge was requested for an empty group.
    #[error("Cannot merge an empty definition group")]
    EmptyDefinitionGroup,

    /// Definitions saved under one cache key come from more than one mod path.
    #[error("Cannot cache definitions from different mod paths: {}", paths.join(", "))]
    MixedModPaths { paths: Vec<String> },

    /// The group's value type cannot be combined into one file.
    #[error("Definitions at '{address}' of kind {value_type} cannot be merged")]
    NotMergeable { address: String, value_type: String },

    /// No registered merger handles this game.
    #[error("No definition merger registered for game '{0}'")]
    UnsupportedGame(String),

    /// No current conflict exists at the requested address.
    #[error("No conflict at '{0}'")]
    ConflictNotFound(String),

    /// A mod directory is missing or inaccessible (used by [`FsModContent`](crate::FsModContent)).
    #[error("Invalid mod directory: {0}")]
    InvalidModDir(Utf8PathBuf),

    /// An ignore rule could not be compiled.
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Zstd compression or decompression failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Catch-all for errors from content providers and other sources.
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
