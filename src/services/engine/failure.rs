//! Failure classification and backoff math.

use regex::Regex;
use std::sync::OnceLock;

/// Failure classes drive the retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureClass {
    RateLimit,
    Generic,
}

/// Classify an error by its text: 429-class markers select the rate-limit
/// schedule, everything else retries immediately.
pub(crate) fn classify(error_text: &str) -> FailureClass {
    let lower = error_text.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
    {
        FailureClass::RateLimit
    } else {
        FailureClass::Generic
    }
}

/// Extract a `Retry-After: <seconds>` hint from stderr. Only the integer
/// seconds form is honored; other shapes are left to the caller verbatim.
pub(crate) fn parse_retry_after_ms(error_text: &str) -> Option<u64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)retry-after:?\s*(\d+)\b").expect("static regex")
    });
    pattern
        .captures(error_text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

/// Full-jitter exponential backoff with a 50% floor:
/// `min(max, base * 2^retry_count * (0.5 + jitter / 2))`.
pub(crate) fn rate_limit_backoff_ms(
    base_ms: u64,
    max_ms: u64,
    retry_count: u32,
    jitter: f64,
) -> u64 {
    let factor = 0.5 + jitter.clamp(0.0, 1.0) / 2.0;
    let exponential = base_ms.saturating_mul(2_u64.saturating_pow(retry_count));
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let jittered = (exponential as f64 * factor) as u64;
    jittered.min(max_ms)
}
