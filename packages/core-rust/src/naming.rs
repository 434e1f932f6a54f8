//! Bus naming rules and environment key derivation.
//!
//! Producers and consumers never have to agree on casing: every topic and
//! channel is lower-cased before it reaches the wire.

use std::sync::LazyLock;

use regex::Regex;

/// Characters and length accepted by nsqd for topic and channel names.
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[.a-z0-9_-]+(#ephemeral)?$").expect("static pattern compiles")
});

const MAX_NAME_LEN: usize = 64;

/// Rejected topic or channel name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("{kind} name is empty")]
    Empty { kind: &'static str },
    #[error("{kind} name '{name}' exceeds {MAX_NAME_LEN} characters")]
    TooLong { kind: &'static str, name: String },
    #[error("{kind} name '{name}' contains characters outside [.a-z0-9_-]")]
    InvalidCharacters { kind: &'static str, name: String },
}

fn normalize(kind: &'static str, raw: &str) -> Result<String, NamingError> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(NamingError::Empty { kind });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NamingError::TooLong { kind, name });
    }
    if !NAME_PATTERN.is_match(&name) {
        return Err(NamingError::InvalidCharacters { kind, name });
    }
    Ok(name)
}

/// Lower-cases and validates a topic name.
///
/// # Errors
///
/// Returns a `NamingError` if the name is empty, too long, or contains
/// characters the broker would reject.
pub fn normalize_topic(raw: &str) -> Result<String, NamingError> {
    normalize("topic", raw)
}

/// Lower-cases and validates a channel name.
///
/// # Errors
///
/// Same rules as [`normalize_topic`].
pub fn normalize_channel(raw: &str) -> Result<String, NamingError> {
    normalize("channel", raw)
}

/// Environment keys that pin a logical backend to a fixed endpoint:
/// `<NAME>_SERVICE_HOST` and `<NAME>_SERVICE_PORT`.
#[must_use]
pub fn service_env_keys(logical_name: &str) -> (String, String) {
    let prefix = logical_name.trim().to_uppercase().replace('-', "_");
    (
        format!("{prefix}_SERVICE_HOST"),
        format!("{prefix}_SERVICE_PORT"),
    )
}
