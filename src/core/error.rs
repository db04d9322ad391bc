use thiserror::Error;

/// Failure taxonomy shared by every subsystem.
///
/// Classification happens at the transport boundary (`telegram::session`) and
/// in the external-tool wrapper (`media`). Recovery happens in exactly two
/// places: `telegram::retry` (rate limits and transient faults) and the clone
/// engine's restricted-source strategy downgrade. Everything else propagates
/// to the CLI handler, which maps the kind to a process exit code.
#[derive(Debug, Error)]
pub enum CloneError {
    /// The platform issued an explicit back-off directive.
    #[error("rate limited by the platform for {0}s")]
    RateLimited(u64),

    /// Connection reset, timeout, ambiguous remote failure. Retried with
    /// bounded exponential back-off, then promoted to `Permanent`.
    #[error("transient platform failure: {0}")]
    Transient(String),

    /// Authentication, not-found, forbidden, bad-request. Never retried.
    #[error("permanent platform failure: {0}")]
    Permanent(String),

    /// The source chat forbids forwarding its content.
    #[error("forwarding is restricted by the source chat")]
    Restricted,

    /// A message kind the processor does not handle. Logged and skipped;
    /// never blocks checkpoint advance.
    #[error("unsupported message kind: {0}")]
    Unsupported(String),

    /// The identifier could not be understood locally. Distinct from
    /// no-access, which surfaces as `Permanent` after a platform round-trip.
    #[error("cannot resolve chat identifier: {0}")]
    Unresolvable(String),

    /// The external transcoder is missing, exited non-zero, or was killed.
    #[error("external tool failure: {0}")]
    ExternalTool(String),

    /// The user signalled cancellation; the current checkpoint is committed.
    #[error("interrupted")]
    Interrupted,

    #[error("task store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CloneError>;

impl CloneError {
    /// Process exit code for the top-level CLI handler.
    pub fn exit_code(&self) -> i32 {
        match self {
            CloneError::ExternalTool(_) => 2,
            CloneError::Interrupted => 3,
            CloneError::RateLimited(_)
            | CloneError::Transient(_)
            | CloneError::Permanent(_)
            | CloneError::Restricted => 4,
            CloneError::Unsupported(_)
            | CloneError::Unresolvable(_)
            | CloneError::Store(_)
            | CloneError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CloneError;

    #[test]
    fn exit_codes_follow_the_documented_mapping() {
        assert_eq!(CloneError::Unresolvable("x".into()).exit_code(), 1);
        assert_eq!(CloneError::ExternalTool("ffmpeg".into()).exit_code(), 2);
        assert_eq!(CloneError::Interrupted.exit_code(), 3);
        assert_eq!(CloneError::Permanent("auth".into()).exit_code(), 4);
        assert_eq!(CloneError::Restricted.exit_code(), 4);
    }
}
