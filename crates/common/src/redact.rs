//! Secret redaction at serialization and logging boundaries.

use serde::{Deserialize, Serialize};

/// Replacement string for secrets in logs and event payloads.
pub const REDACTED: &str = "[redacted]";

/// A secret string (pairing token, bot token) that never leaks through
/// `Debug`/`Display`. Serializes normally so persisted stores keep working;
/// anything crossing an event or log boundary must go through [`redacted`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Deliberate access to the underlying value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Redact a secret for display, keeping just enough to tell tokens apart.
#[must_use]
pub fn redacted(secret: &str) -> String {
    if secret.len() <= 8 {
        return REDACTED.into();
    }
    format!("{}…{}", &secret[..4], &secret[secret.len() - 4..])
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_value() {
        let s = Secret::new("super-secret-token");
        assert_eq!(format!("{s:?}"), REDACTED);
        assert_eq!(format!("{s}"), REDACTED);
    }

    #[test]
    fn serde_keeps_value_for_stores() {
        let s = Secret::new("tok-123");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"tok-123\"");
        let back: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose(), "tok-123");
    }

    #[test]
    fn short_secrets_fully_hidden() {
        assert_eq!(redacted("abc"), REDACTED);
        assert_eq!(redacted("0123456789abcdef"), "0123…cdef");
    }
}
