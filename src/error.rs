//! Error types for the payload codec and the staging store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A payload could not be turned into bytes.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: String, value: f64 },

    #[error("{field} has sub-millisecond precision the wire format cannot carry")]
    SubMillisecond { field: &'static str },

    #[error("cannot encode schema version {found} (supported {min}..={max})")]
    SchemaVersion { found: u32, min: u32, max: u32 },

    #[error("kmSplits is not part of schema version {found}")]
    SplitsBeforeVersion { found: u32 },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Bytes could not be turned into a payload.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unsupported schema version {found} (supported {min}..={max})")]
    UnsupportedSchemaVersion { found: u64, min: u32, max: u32 },
}

impl DecodeError {
    pub const fn is_schema_version(&self) -> bool {
        matches!(self, Self::UnsupportedSchemaVersion { .. })
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StagingError {
    #[error("no staged payload at {0}")]
    NotFound(PathBuf),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("envelope does not match payload: expected {expected}, found {found}")]
    EnvelopeMismatch { expected: String, found: String },
}

impl StagingError {
    /// True when the file's content could not be trusted: it failed to
    /// decode, or it decoded to something its envelope does not describe.
    pub const fn is_decode_failure(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::EnvelopeMismatch { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
