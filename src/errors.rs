//! The error taxonomy used across the enrollment core. Modeled as an explicit tagged enum
//! rather than thrown exceptions so that the scheduler and monitors can `match` on outcomes
//! instead of relying on stack unwinding.

use std::fmt;

/// Errors surfaced by the HTTP session core, login flow, and swap state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentError {
    /// A timeout, connection reset, or DNS failure. Retried silently inside the session core;
    /// this variant only escapes after consecutive failures exceed a small threshold.
    TransientNetwork(String),
    /// The session was detected as expired mid-flight (HTTP 302, `code == -1` with an expiry
    /// keyword, or an expiry keyword in `msg`).
    SessionExpired,
    /// The login response indicated bad credentials (`msg` mentions "password"/"account").
    /// Latches the recovery coordinator's permanent-failure flag.
    CredentialsRejected,
    /// The recovery coordinator's permanent-failure latch is set; no further recovery attempts
    /// will be made until fresh credentials are supplied.
    PermanentAuthFailure,
    /// A catch-all for a non-success response that doesn't match a more specific variant.
    Other(String),
}

impl fmt::Display for EnrollmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentError::TransientNetwork(msg) => {
                write!(f, "transient network error: {msg}")
            }
            EnrollmentError::SessionExpired => write!(f, "session expired"),
            EnrollmentError::CredentialsRejected => write!(f, "credentials rejected"),
            EnrollmentError::PermanentAuthFailure => {
                write!(f, "permanent authentication failure; awaiting new credentials")
            }
            EnrollmentError::Other(msg) => write!(f, "enrollment API error: {msg}"),
        }
    }
}

impl std::error::Error for EnrollmentError {}
