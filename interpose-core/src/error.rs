//! Error classification shared by every module of the core.
//!
//! Each module owns its own `thiserror` enum (`ContextError`, `EventError`,
//! `ResolveError`, `CodecError`). Callers that only care about the broad class
//! of failure use [`ErrorKind`] through the `kind()` accessor every enum exposes.

use std::fmt;

/// Broad classification of a core failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed call: from-scratch update without required fields, bad path.
    InvalidArgument,
    /// Something the call referred to does not exist.
    NotFound,
    /// Bytes could not be decoded (JSON, compressed body).
    DecodeError,
    /// The request named a capability the core does not provide.
    Unsupported,
}

impl ErrorKind {
    /// Stable label, suitable for metrics and structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::InvalidArgument.to_string(), "invalid_argument");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::DecodeError.as_str(), "decode_error");
        assert_eq!(ErrorKind::Unsupported.as_str(), "unsupported");
    }
}
