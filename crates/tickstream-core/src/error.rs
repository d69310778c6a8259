// ── Consumer-facing error taxonomy ──
//
// Transport-level failures are handled inside the engine (backoff and
// fallback) and never reach callers; only `mutate` and `fetch_snapshot`
// return errors. The `From<tickstream_api::Error>` impl translates
// transport errors into these variants.

use thiserror::Error;

/// Unified error type for the synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad subscription filter or draft -- a local programmer error,
    /// never retried.
    #[error("invalid parameters: {message}")]
    InvalidParameters { message: String },

    /// A surfaced transport failure (snapshot fetch against a
    /// responding-but-unhappy server). Live-stream transport failures
    /// are not surfaced this way; they only show in the connection
    /// state.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server declined a write. The optimistic cache entry has
    /// been rolled back.
    #[error("mutation rejected: {message}")]
    MutationRejected {
        message: String,
        status: Option<u16>,
    },

    /// No network path could even be attempted (missing credential,
    /// connection refused, timeout). Surfaced, not auto-retried --
    /// and never papered over with a fabricated result.
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },

    /// A response that should have decoded didn't.
    #[error("decode error: {message}")]
    Decode { message: String },
}

impl SyncError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same call might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Unreachable { .. })
    }
}

impl From<tickstream_api::Error> for SyncError {
    fn from(err: tickstream_api::Error) -> Self {
        use tickstream_api::Error as Api;

        if err.is_unreachable() {
            return Self::Unreachable {
                message: err.to_string(),
            };
        }

        match err {
            Api::InvalidUrl(e) => Self::InvalidParameters {
                message: e.to_string(),
            },
            Api::Deserialization { message, .. } => Self::Decode { message },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// Error mapping for the mutation path, where a server response is a
/// rejection rather than a generic transport failure.
pub(crate) fn mutation_error(err: tickstream_api::Error) -> SyncError {
    use tickstream_api::Error as Api;

    if err.is_unreachable() {
        return SyncError::Unreachable {
            message: err.to_string(),
        };
    }

    match err {
        Api::Api { message, status } => SyncError::MutationRejected {
            message,
            status: Some(status),
        },
        Api::Authentication { message } => SyncError::MutationRejected {
            message,
            status: Some(401),
        },
        Api::Deserialization { message, .. } => SyncError::Decode { message },
        other => SyncError::MutationRejected {
            message: other.to_string(),
            status: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_maps_to_unreachable() {
        let err = SyncError::from(tickstream_api::Error::MissingCredential);
        assert!(matches!(err, SyncError::Unreachable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn server_rejection_maps_to_mutation_rejected() {
        let err = mutation_error(tickstream_api::Error::Api {
            message: "qty must be positive".into(),
            status: 400,
        });
        match err {
            SyncError::MutationRejected { message, status } => {
                assert_eq!(message, "qty must be positive");
                assert_eq!(status, Some(400));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
