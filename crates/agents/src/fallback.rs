//! Model failover chain.
//!
//! A run is attempted against the primary model ref, then each fallback in
//! order — but only when the failure is *fallback-worthy* (auth, rate
//! limit, or a transient network/timeout class). Aborts propagate without
//! rotating, and a fully exhausted chain aggregates every attempt into one
//! error.

use std::collections::{HashMap, HashSet};

use {tokio_util::sync::CancellationToken, tracing::warn};

use clawdis_common::Error;

/// A model reference split into its routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelCandidate {
    pub provider: String,
    pub model: String,
}

impl ModelCandidate {
    /// Parse `"provider/model"`; a bare name gets the `anthropic` provider.
    #[must_use]
    pub fn parse(model_ref: &str) -> Self {
        match model_ref.split_once('/') {
            Some((provider, model)) => Self {
                provider: provider.to_string(),
                model: model.to_string(),
            },
            None => Self {
                provider: "anthropic".to_string(),
                model: model_ref.to_string(),
            },
        }
    }

    #[must_use]
    pub fn as_ref_string(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Network error codes that justify rotating to the next candidate.
const TRANSIENT_CODES: &[&str] = &[
    "ETIMEDOUT",
    "ESOCKETTIMEDOUT",
    "ECONNRESET",
    "ECONNABORTED",
];

/// Whether a failure should trigger the next candidate.
#[must_use]
pub fn is_fallback_worthy(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    if TRANSIENT_CODES.iter().any(|c| msg.contains(c)) {
        return true;
    }
    let lower = msg.to_lowercase();
    // HTTP auth / rate-limit statuses.
    if lower.contains("401") || lower.contains("403") || lower.contains("429") {
        return true;
    }
    // Message heuristics.
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
        || lower.contains("timed out")
        || lower.contains("timeout")
}

/// Build the ordered candidate list: primary first, then fallbacks, deduped
/// by `(provider, model)`. When `allowed_aliases` is given, fallbacks not
/// resolvable from the alias table are dropped.
#[must_use]
pub fn candidate_chain(
    primary: &str,
    fallbacks: &[String],
    aliases: &HashMap<String, String>,
    restrict_to_aliases: bool,
) -> Vec<ModelCandidate> {
    let resolve = |r: &str| aliases.get(r).cloned().unwrap_or_else(|| r.to_string());
    let allowed: Option<HashSet<ModelCandidate>> = restrict_to_aliases.then(|| {
        aliases
            .values()
            .map(|full| ModelCandidate::parse(full))
            .collect()
    });

    let mut seen = HashSet::new();
    let mut chain = Vec::new();
    for (i, model_ref) in std::iter::once(primary.to_string())
        .chain(fallbacks.iter().cloned())
        .enumerate()
    {
        let candidate = ModelCandidate::parse(&resolve(&model_ref));
        if !seen.insert(candidate.clone()) {
            continue;
        }
        // The primary is always kept; the allowlist gates fallbacks only.
        if i > 0
            && let Some(allowed) = &allowed
            && !allowed.contains(&candidate)
        {
            warn!(model = %candidate.as_ref_string(), "fallback not in alias allowlist, skipped");
            continue;
        }
        chain.push(candidate);
    }
    chain
}

/// Run `attempt` against each candidate until one succeeds.
///
/// Non-fallback-worthy failures and cancellations return immediately with
/// the original error; exhaustion returns [`Error::FallbackExhausted`]
/// enumerating every attempt.
pub async fn run_with_fallback<T, F, Fut>(
    candidates: &[ModelCandidate],
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    if candidates.is_empty() {
        return Err(Error::input("no model candidates configured"));
    }

    let mut attempts = Vec::new();
    for candidate in candidates {
        let model_ref = candidate.as_ref_string();
        match attempt(model_ref.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if cancel.is_cancelled() {
                    return Err(Error::agent(format!("{model_ref}: cancelled")));
                }
                let worthy = is_fallback_worthy(&err);
                warn!(model = %model_ref, error = %err, fallback = worthy, "model attempt failed");
                attempts.push(format!("{model_ref}: {err}"));
                if !worthy {
                    return Err(Error::agent(attempts.pop().unwrap_or_default()));
                }
            },
        }
    }
    Err(Error::FallbackExhausted { attempts })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_spec_criteria() {
        for msg in [
            "HTTP 429 too many requests",
            "status 401",
            "403 forbidden",
            "ECONNRESET while streaming",
            "ETIMEDOUT",
            "request timed out",
            "invalid api key",
        ] {
            assert!(is_fallback_worthy(&anyhow::anyhow!("{msg}")), "{msg}");
        }
        for msg in ["malformed request body", "context window exceeded at 200k"] {
            assert!(!is_fallback_worthy(&anyhow::anyhow!("{msg}")), "{msg}");
        }
    }

    #[test]
    fn chain_dedupes_by_provider_model() {
        let chain = candidate_chain(
            "anthropic/claude-sonnet-4-5",
            &[
                "anthropic/claude-sonnet-4-5".into(),
                "openai/gpt-5".into(),
                "openai/gpt-5".into(),
            ],
            &HashMap::new(),
            false,
        );
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].provider, "openai");
    }

    #[test]
    fn aliases_resolve_before_dedupe() {
        let aliases: HashMap<String, String> =
            [("sonnet".to_string(), "anthropic/claude-sonnet-4-5".to_string())].into();
        let chain = candidate_chain(
            "sonnet",
            &["anthropic/claude-sonnet-4-5".into()],
            &aliases,
            false,
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].model, "claude-sonnet-4-5");
    }

    #[test]
    fn allowlist_gates_fallbacks_but_not_primary() {
        let aliases: HashMap<String, String> =
            [("haiku".to_string(), "anthropic/claude-haiku-4".to_string())].into();
        let chain = candidate_chain(
            "custom/private-model",
            &["openai/gpt-5".into(), "haiku".into()],
            &aliases,
            true,
        );
        let refs: Vec<String> = chain.iter().map(ModelCandidate::as_ref_string).collect();
        assert_eq!(refs, vec!["custom/private-model", "anthropic/claude-haiku-4"]);
    }

    #[tokio::test]
    async fn rotates_on_worthy_failure() {
        let candidates = vec![
            ModelCandidate::parse("a/one"),
            ModelCandidate::parse("b/two"),
        ];
        let cancel = CancellationToken::new();
        let result = run_with_fallback(&candidates, &cancel, |model_ref| async move {
            if model_ref == "a/one" {
                anyhow::bail!("429 rate limited");
            }
            Ok(model_ref)
        })
        .await
        .unwrap();
        assert_eq!(result, "b/two");
    }

    #[tokio::test]
    async fn non_worthy_failure_stops_the_chain() {
        let candidates = vec![
            ModelCandidate::parse("a/one"),
            ModelCandidate::parse("b/two"),
        ];
        let cancel = CancellationToken::new();
        let result: Result<String, Error> =
            run_with_fallback(&candidates, &cancel, |_| async move {
                anyhow::bail!("malformed request body")
            })
            .await;
        match result {
            Err(Error::Agent(msg)) => assert!(msg.contains("malformed")),
            other => panic!("expected Agent error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhaustion_aggregates_attempts() {
        let candidates = vec![
            ModelCandidate::parse("a/one"),
            ModelCandidate::parse("b/two"),
        ];
        let cancel = CancellationToken::new();
        let result: Result<String, Error> =
            run_with_fallback(&candidates, &cancel, |_| async move {
                anyhow::bail!("HTTP 429")
            })
            .await;
        match result {
            Err(Error::FallbackExhausted { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("a/one"));
                assert!(attempts[1].starts_with("b/two"));
            },
            other => panic!("expected FallbackExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_suppresses_fallback() {
        let candidates = vec![
            ModelCandidate::parse("a/one"),
            ModelCandidate::parse("b/two"),
        ];
        let cancel = CancellationToken::new();
        let cancel_inner = cancel.clone();
        let result: Result<String, Error> =
            run_with_fallback(&candidates, &cancel, move |_| {
                let cancel = cancel_inner.clone();
                async move {
                    cancel.cancel();
                    anyhow::bail!("429 would normally rotate")
                }
            })
            .await;
        match result {
            Err(Error::Agent(msg)) => assert!(msg.contains("cancelled")),
            other => panic!("expected cancelled Agent error, got {other:?}"),
        }
    }
}
