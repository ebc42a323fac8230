use std::error::Error as StdError;
use std::fmt;

use crate::serde_helpers::PathError;

/// Why an inbound frame could not be turned into a [`super::ChatEvent`].
///
/// Every variant is recoverable: the frame is dropped and the connection
/// carries on.
#[non_exhaustive]
#[derive(Debug)]
pub enum DecodeError {
    /// The frame is not valid JSON, or a field has the wrong shape
    Malformed {
        /// JSON path of the offending value, empty when not tied to a field
        path: String,
        source: serde_json::Error,
    },
    /// The envelope `type` is not one this client understands
    UnknownType(String),
    /// The envelope is missing a field its `type` requires
    MissingField {
        envelope: &'static str,
        field: &'static str,
    },
    /// A message timestamp is not an ISO-8601 date-time
    InvalidTimestamp(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { path, source } if path.is_empty() => {
                write!(f, "malformed frame: {source}")
            }
            Self::Malformed { path, source } => write!(f, "malformed frame at `{path}`: {source}"),
            Self::UnknownType(kind) => write!(f, "unknown envelope type `{kind}`"),
            Self::MissingField { envelope, field } => {
                write!(f, "`{envelope}` envelope is missing `{field}`")
            }
            Self::InvalidTimestamp(raw) => write!(f, "invalid ISO-8601 timestamp `{raw}`"),
        }
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Malformed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<PathError> for DecodeError {
    fn from(e: PathError) -> Self {
        Self::Malformed {
            path: e.path,
            source: e.inner,
        }
    }
}

impl From<DecodeError> for crate::error::Error {
    fn from(e: DecodeError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Codec, e)
    }
}
