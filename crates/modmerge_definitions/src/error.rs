//! Error types for definition storage.
//!
//! Parsing never fails through this type: a unit that cannot be tokenized becomes an
//! [`Invalid`](crate::ValueType::Invalid) definition carrying the error. Only the
//! disk-backed store can fail, when its backing file cannot be written or decoded.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed while writing to or reading from a disk store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition could not be encoded as MessagePack.
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A stored definition record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// A store record exceeds the 4 GiB record size limit.
    #[error("Definition record too large: {0} bytes")]
    RecordTooLarge(usize),
}
