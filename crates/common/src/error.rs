//! Error taxonomy shared by every crate in the workspace (`spec.md` §7).
//!
//! Kinds, not open-ended strings: callers match on the variant to decide
//! whether to retry, surface to a strategy, or drop the event. Secrets never
//! appear in any variant's payload, and `Validation`'s echoed input is
//! truncated to avoid leaking oversized or control-character payloads into
//! logs.

use thiserror::Error;

/// Maximum length of any user-supplied string echoed back in an error.
const MAX_ECHO_LEN: usize = 128;

/// Sanitize a string for safe inclusion in an error message: truncate and
/// strip control characters.
#[must_use]
pub fn sanitize_echo(input: &str) -> String {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).collect();
    if cleaned.len() > MAX_ECHO_LEN {
        format!("{}...", &cleaned[..MAX_ECHO_LEN])
    } else {
        cleaned
    }
}

/// Error taxonomy for the execution core (`spec.md` §7).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport failure: connect, read, write, or timeout. Retryable.
    #[error("network error: {reason}")]
    Network {
        /// Description of the transport failure.
        reason: String,
    },

    /// Venue-imposed throttle. Retry after `retry_after_ms` if present.
    #[error("rate limited, retry_after_ms={retry_after_ms:?}")]
    RateLimited {
        /// Venue-suggested backoff, milliseconds.
        retry_after_ms: Option<u64>,
    },

    /// Bad key/secret/passphrase/JWT. Fatal for the call; never retried.
    #[error("authentication failed")]
    Authentication,

    /// Malformed request caught before or by the venue (not a rejection).
    #[error("validation error: {reason}")]
    Validation {
        /// Sanitized description of what was invalid.
        reason: String,
    },

    /// Exchange accepted the connection but rejected the order.
    #[error("venue rejected order: {reason}")]
    VenueReject {
        /// Sanitized venue-provided reason.
        reason: String,
    },

    /// The resilient adapter's circuit breaker is open; the call never
    /// reached the inner adapter.
    #[error("circuit open")]
    CircuitOpen,

    /// Local invariant violation; the offending event was dropped.
    #[error("state error: {reason}")]
    State {
        /// Description of the invariant that would have been violated.
        reason: String,
    },
}

impl CoreError {
    /// Whether this error class is retryable per the failure taxonomy in
    /// `spec.md` §4.A / §7.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Convenience result alias.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_is_truncated_and_control_free() {
        let raw = format!("bad\x07input{}", "x".repeat(200));
        let sanitized = sanitize_echo(&raw);
        assert!(!sanitized.contains('\x07'));
        assert!(sanitized.len() <= MAX_ECHO_LEN + 3);
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(CoreError::Network { reason: "x".into() }.is_retryable());
        assert!(!CoreError::Authentication.is_retryable());
        assert!(!CoreError::CircuitOpen.is_retryable());
    }
}
