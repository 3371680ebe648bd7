// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by tools, the executor, and the agent loop.
///
/// Tool-level failures are always captured into a tool-result message and
/// handed back to the model; they never propagate as Rust errors.  The kind
/// decides both the retry strategy the model is told about and the message
/// template shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Schema validation failed; the model is informed and may retry
    InvalidArguments,
    /// Approval denied or mode-forbidden; the model is informed
    NotPermitted,
    /// User cancellation propagated
    Cancelled,
    /// A suspension point exceeded its budget
    Timeout,
    /// Filesystem failure
    Io,
    /// Shell / process exit non-zero
    Subprocess,
    /// The tool itself (or a remote peer) reported failure
    External,
    /// An invariant violation in the core; always logged with full context
    Internal,
}

impl ErrorKind {
    /// Fixed user-visible message template for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArguments => "the tool rejected its arguments",
            ErrorKind::NotPermitted => "the tool call was not permitted",
            ErrorKind::Cancelled => "the operation was cancelled",
            ErrorKind::Timeout => "the operation timed out",
            ErrorKind::Io => "a filesystem operation failed",
            ErrorKind::Subprocess => "the command exited with a non-zero status",
            ErrorKind::External => "an external component reported a failure",
            ErrorKind::Internal => "an internal error occurred; this is a bug",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArguments => "invalid_arguments",
            ErrorKind::NotPermitted => "not_permitted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::Subprocess => "subprocess",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_snake_case() {
        let s = serde_json::to_string(&ErrorKind::InvalidArguments).unwrap();
        assert_eq!(s, "\"invalid_arguments\"");
        let s = serde_json::to_string(&ErrorKind::NotPermitted).unwrap();
        assert_eq!(s, "\"not_permitted\"");
    }

    #[test]
    fn round_trips_through_json() {
        for kind in [
            ErrorKind::InvalidArguments,
            ErrorKind::NotPermitted,
            ErrorKind::Cancelled,
            ErrorKind::Timeout,
            ErrorKind::Io,
            ErrorKind::Subprocess,
            ErrorKind::External,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn every_kind_has_a_user_message() {
        for kind in [
            ErrorKind::InvalidArguments,
            ErrorKind::NotPermitted,
            ErrorKind::Cancelled,
            ErrorKind::Timeout,
            ErrorKind::Io,
            ErrorKind::Subprocess,
            ErrorKind::External,
            ErrorKind::Internal,
        ] {
            assert!(!kind.user_message().is_empty());
        }
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(ErrorKind::Subprocess.to_string(), "subprocess");
    }
}
