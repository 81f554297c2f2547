//! Static fallback message, read once at startup from `reply.json`.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// Used when the fallback file does not exist or cannot be read.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Thank you for reaching out! I'll get back to you soon.";

/// Used when the file parses but has no `message` field.
pub const MISSING_FIELD_FALLBACK_MESSAGE: &str = "Thank you for your email!";

#[derive(Debug, Deserialize)]
struct FallbackFile {
    message: Option<String>,
}

/// Load the fallback reply text. Never fails.
pub fn load_fallback_message(path: &Path) -> String {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "No fallback message file, using built-in default");
            return DEFAULT_FALLBACK_MESSAGE.to_string();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Fallback message unreadable, using built-in default");
            return DEFAULT_FALLBACK_MESSAGE.to_string();
        }
    };

    match serde_json::from_str::<FallbackFile>(&raw) {
        Ok(FallbackFile {
            message: Some(message),
        }) => {
            info!(path = %path.display(), "Loaded fallback message");
            message
        }
        Ok(FallbackFile { message: None }) => {
            warn!(path = %path.display(), "Fallback file has no `message` field");
            MISSING_FIELD_FALLBACK_MESSAGE.to_string()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Fallback file is not valid JSON, using built-in default");
            DEFAULT_FALLBACK_MESSAGE.to_string()
        }
    }
}
