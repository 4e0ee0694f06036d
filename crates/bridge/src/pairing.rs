//! Pairing approval and token minting.

use async_trait::async_trait;

/// A node asking to pair.
#[derive(Debug, Clone)]
pub struct PairRequest {
    pub node_id: String,
    pub display_name: Option<String>,
    pub platform: Option<String>,
    pub version: Option<String>,
}

/// Host-side approval capability. The gateway shows a platform dialog (and
/// mirrors a `pairing.pending` event to control-plane clients); tests
/// inject canned answers.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Ask the operator to approve a pairing. `is_repair` marks an existing
    /// node re-pairing, which gets a distinct prompt.
    async fn prompt_operator(&self, request: &PairRequest, is_repair: bool) -> bool;
}

/// Mint a fresh 128-bit pairing token, hex-encoded.
#[must_use]
pub fn generate_token() -> String {
    let raw: u128 = rand::random();
    format!("{raw:032x}")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_128_bit_hex() {
        let t = generate_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }
}
