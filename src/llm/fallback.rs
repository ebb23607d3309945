// src/llm/fallback.rs
// Provider fallback policy: classification of errors that justify switching
// providers mid-request, and the fixed order candidates are tried in.

use super::provider::Provider;

/// Fallback order: first provider in this list not yet failed in the
/// current request is tried next. Ollama is last and only eligible when a
/// local model is already present.
pub const FALLBACK_ORDER: [Provider; 4] = [
    Provider::Kimi,
    Provider::Claude,
    Provider::OpenAi,
    Provider::Ollama,
];

/// Error fragments that indicate an exhausted or refusing account.
const BILLING_MARKERS: [&str; 7] = [
    "credit",
    "quota",
    "insufficient",
    "exceeded",
    "billing",
    "402",
    "payment required",
];

/// Error fragments that indicate transient pressure on the provider.
const OVERLOAD_MARKERS: [&str; 5] = [
    "overloaded",
    "rate limit",
    "too many requests",
    "429",
    "529",
];

/// Whether an LLM error should trigger the fallback policy rather than
/// surfacing directly.
pub fn is_fallback_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    let normalized = lower.replace(['-', '_'], " ");
    BILLING_MARKERS
        .iter()
        .chain(OVERLOAD_MARKERS.iter())
        .any(|marker| normalized.contains(marker))
}

/// Providers to try after `failed` ones, in fallback order.
pub fn remaining_candidates(failed: &[Provider]) -> Vec<Provider> {
    FALLBACK_ORDER
        .iter()
        .copied()
        .filter(|p| !failed.contains(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_errors_trigger_fallback() {
        assert!(is_fallback_error("API error 402: payment required"));
        assert!(is_fallback_error("insufficient credits remaining"));
        assert!(is_fallback_error("monthly quota exceeded"));
        assert!(is_fallback_error("Billing hard limit reached"));
    }

    #[test]
    fn test_overload_errors_trigger_fallback() {
        assert!(is_fallback_error("API error 429: too_many_requests"));
        assert!(is_fallback_error("Overloaded"));
        assert!(is_fallback_error("error 529: overloaded_error"));
        assert!(is_fallback_error("Rate-limit hit, slow down"));
    }

    #[test]
    fn test_ordinary_errors_do_not_trigger_fallback() {
        assert!(!is_fallback_error("invalid request: missing field 'model'"));
        assert!(!is_fallback_error("API error 401: invalid api key"));
        assert!(!is_fallback_error("connection reset by peer"));
    }

    #[test]
    fn test_remaining_candidates_preserve_order() {
        let remaining = remaining_candidates(&[Provider::Kimi, Provider::OpenAi]);
        assert_eq!(remaining, vec![Provider::Claude, Provider::Ollama]);

        let all = remaining_candidates(&[]);
        assert_eq!(all.to_vec(), FALLBACK_ORDER.to_vec());
    }
}
