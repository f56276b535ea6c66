//! Verification-code extraction.
//!
//! An ordered list of compiled patterns is tried against the normalized
//! text; the first capture wins. The ordering is load-bearing: specific
//! cue-word patterns run before the permissive bare-digit fallback, and
//! 6-digit codes are preferred over 4-digit ones.

use std::sync::LazyLock;

use regex::Regex;

/// A single code pattern with a human-readable label.
struct CodePattern {
    /// What this pattern targets, for trace logs.
    label: &'static str,
    /// Compiled regex; capture group 1 is the code.
    regex: Regex,
}

// ASCII word boundaries `(?-u:\b)` throughout: a CJK cue character sits
// directly against the digits ("验证码123456") and must still count as a
// boundary.
static CODE_PATTERNS: LazyLock<Vec<CodePattern>> = LazyLock::new(|| {
    vec![
        CodePattern {
            label: "cue word + 6 digits",
            regex: Regex::new(r"(?i)(?:验证码|code|码)[^\d]*(\d{6})(?-u:\b)").unwrap(),
        },
        CodePattern {
            label: "6 digits + trailing phrase",
            regex: Regex::new(r"(?i)(?-u:\b)(\d{6})\s*(?:是你的|is your|为您的)").unwrap(),
        },
        CodePattern {
            label: "cue word + 4 digits",
            regex: Regex::new(r"(?i)(?:验证码|code|码)[^\d]*(\d{4})(?-u:\b)").unwrap(),
        },
        CodePattern {
            label: "4 digits + trailing phrase",
            regex: Regex::new(r"(?i)(?-u:\b)(\d{4})\s*(?:是你的|is your|为您的)").unwrap(),
        },
        // Permissive fallback: any standalone 4-8 digit run. Fires on
        // dates and amounts too; that is the documented behavior.
        CodePattern {
            label: "bare 4-8 digit run",
            regex: Regex::new(r"(?-u:\b)(\d{4,8})(?-u:\b)").unwrap(),
        },
        CodePattern {
            label: "cue word + alphanumeric code",
            regex: Regex::new(r"(?i)(?:验证码|code|码)[^\w]*([A-Za-z0-9]{4,8})(?-u:\b)").unwrap(),
        },
    ]
});

/// Extract the most likely one-time verification code from free text.
///
/// Returns `None` for empty input or when no pattern matches; never errors.
pub fn extract_verification_code(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    // Collapse whitespace runs to single spaces and trim the ends.
    let clean: String = text.split_whitespace().collect::<Vec<_>>().join(" ");

    for pattern in CODE_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(&clean)
            && let Some(code) = caps.get(1)
        {
            tracing::debug!(pattern = pattern.label, "Verification code matched");
            return Some(code.as_str().to_string());
        }
    }

    None
}

/// Extract a code from an email, trying the subject before the body.
///
/// A subject match always wins, even when the body holds a different valid
/// code — subjects like "Your code is 123456" are the common case.
pub fn extract_code_from_email(subject: &str, body: &str) -> Option<String> {
    extract_verification_code(subject).or_else(|| extract_verification_code(body))
}

/// Strip HTML tags from content (basic).
///
/// Best-effort `<...>` removal plus whitespace normalization; entities are
/// left as-is.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    result.push(' ');
                }
                in_tag = false;
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
