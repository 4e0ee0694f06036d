use thiserror::Error;

/// Gateway-wide error taxonomy.
///
/// Every failure the gateway can surface to a caller falls into one of these
/// buckets. The `code()` string is what crosses the wire; the `Display`
/// output stays internal and is summarised before reaching a chat surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad request: malformed JSON, invalid directive level, missing field.
    /// Surfaced to the caller, never retried.
    #[error("{0}")]
    Input(String),

    /// Allowlist rejection, unknown pairing token, loopback-only violation.
    #[error("{0}")]
    Auth(String),

    /// Provider not linked, socket dropped. Retryable.
    #[error("{0}")]
    Transport(String),

    /// Worker crash or an `error` frame from the worker.
    #[error("{0}")]
    Agent(String),

    /// A run exceeded its deadline. Carries any partial output captured
    /// before the deadline (delivered with a truncation label when the run
    /// was user-driven).
    #[error("timed out after {ms}ms")]
    Timeout { ms: u64, partial: Option<String> },

    /// Every model candidate failed; `attempts` lists one line per candidate.
    #[error("all model candidates failed ({})", attempts.join("; "))]
    FallbackExhausted { attempts: Vec<String> },

    /// Corrupted state store, schema mismatch, port bind conflict.
    /// The gateway exits non-zero on these.
    #[error("{0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[must_use]
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    #[must_use]
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent(message.into())
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Wire code for this error class.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Input(_) => "INVALID_REQUEST",
            Self::Auth(_) => "UNAUTHORIZED",
            Self::Transport(_) => "UNAVAILABLE",
            Self::Agent(_) => "AGENT_ERROR",
            Self::Timeout { .. } => "AGENT_TIMEOUT",
            Self::FallbackExhausted { .. } => "FALLBACK_EXHAUSTED",
            Self::Fatal(_) => "FATAL",
        }
    }

    /// Whether the failure is worth retrying at the transport layer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// One-line summary safe for a chat surface. Raw internals never cross
    /// this boundary.
    #[must_use]
    pub fn user_summary(&self) -> String {
        match self {
            Self::Input(m) => m.clone(),
            Self::Auth(_) => "Not authorized.".into(),
            Self::Transport(_) => "Channel is not available right now.".into(),
            Self::Agent(_) => "Agent failed.".into(),
            Self::Timeout { .. } => "Agent timed out.".into(),
            Self::FallbackExhausted { .. } => "All configured models failed.".into(),
            Self::Fatal(_) => "Internal error.".into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::input("x").code(), "INVALID_REQUEST");
        assert_eq!(Error::auth("x").code(), "UNAUTHORIZED");
        assert_eq!(Error::transport("x").code(), "UNAVAILABLE");
        assert_eq!(
            Error::Timeout {
                ms: 10,
                partial: None
            }
            .code(),
            "AGENT_TIMEOUT"
        );
    }

    #[test]
    fn only_transport_retries() {
        assert!(Error::transport("socket dropped").is_retryable());
        assert!(!Error::input("bad").is_retryable());
        assert!(!Error::agent("crash").is_retryable());
    }

    #[test]
    fn user_summary_hides_internals() {
        let e = Error::agent("worker exited with signal 9 at frame 0x1f");
        assert_eq!(e.user_summary(), "Agent failed.");
        assert!(!e.user_summary().contains("0x1f"));
    }

    #[test]
    fn fallback_exhausted_lists_attempts() {
        let e = Error::FallbackExhausted {
            attempts: vec!["anthropic/a: 429".into(), "openai/b: timeout".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("anthropic/a: 429"));
        assert!(msg.contains("openai/b: timeout"));
    }
}
