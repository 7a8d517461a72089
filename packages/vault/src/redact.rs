//! Credential redaction for logs and telemetry payloads.

use std::collections::HashMap;

/// Header names whose values are never logged.
pub const SENSITIVE_HEADER_DENYLIST: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "x-api-key",
    "api-key",
    "x-auth-token",
    "cookie",
    "set-cookie",
];

const REDACTED: &str = "[REDACTED]";

/// Copy a header map with denylisted values replaced.
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            if SENSITIVE_HEADER_DENYLIST.contains(&name.to_lowercase().as_str()) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Scrub credential-shaped substrings from free text before it reaches the
/// telemetry log. Catches `sk-`-style API keys, bearer tokens and AWS-style
/// access key ids.
pub fn redact_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(hit) = find_credential(rest) {
        let (start, len) = hit;
        out.push_str(&rest[..start]);
        out.push_str(REDACTED);
        rest = &rest[start + len..];
    }
    out.push_str(rest);
    out
}

/// Find the next credential-shaped token: (byte offset, byte length).
fn find_credential(text: &str) -> Option<(usize, usize)> {
    let lower = text.to_lowercase();

    // sk- / rk- style keys with a long tail
    for prefix in ["sk-", "rk-", "pk-"] {
        if let Some(idx) = lower.find(prefix) {
            let tail_len = token_tail_len(&text[idx + prefix.len()..]);
            if tail_len >= 16 {
                return Some((idx, prefix.len() + tail_len));
            }
        }
    }
    // Bearer tokens
    if let Some(idx) = lower.find("bearer ") {
        let value_start = idx + "bearer ".len();
        let tail_len = token_tail_len(&text[value_start..]);
        if tail_len >= 16 {
            return Some((idx, "bearer ".len() + tail_len));
        }
    }
    // AWS-style access key ids
    if let Some(idx) = text.find("AKIA") {
        let tail_len = token_tail_len(&text[idx..]);
        if tail_len >= 20 {
            return Some((idx, tail_len));
        }
    }
    None
}

fn token_tail_len(text: &str) -> usize {
    text.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .map(char::len_utf8)
        .sum()
}
