//! Reply content: persona-flavored generation plus the static fallback.

pub mod fallback;
pub mod generator;

pub use fallback::load_fallback_message;
pub use generator::{ReplyGenerator, build_prompt};

/// Suffix appended to every outgoing subject line.
pub const SUBJECT_SUFFIX: &str = "OOO Automated Reply";

/// Subject used when the original message has none.
pub const DEFAULT_ORIGINAL_SUBJECT: &str = "Automated Reply";

/// `Re: <original subject> - OOO Automated Reply`.
pub fn reply_subject(original: Option<&str>) -> String {
    let original = original
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ORIGINAL_SUBJECT);
    format!("Re: {original} - {SUBJECT_SUFFIX}")
}

/// Append the persona signature line to a reply body.
pub fn sign(body: &str, persona_name: &str) -> String {
    format!("{body}\n\n-{persona_name}.")
}
