//! GitHub API error classification.
//!
//! Fetches only read, so the only question is whether another attempt can
//! succeed:
//!
//! - **Transient**: 5xx, 429, 403 rate limits, network failures.
//! - **Permanent**: other 4xx (bad credentials, unknown repository) and
//!   anything unclassifiable.

use std::fmt;
use thiserror::Error;

use crate::source::{SourceError, SourceErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    Transient,
    Permanent,
}

impl GitHubErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error with its retry classification.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    pub status_code: Option<u16>,

    pub message: String,

    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Classifies an octocrab error by status code and message.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);
        let kind = classify(status_code, &message);

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

impl From<GitHubApiError> for SourceError {
    fn from(err: GitHubApiError) -> Self {
        let kind = match err.kind {
            GitHubErrorKind::Transient => SourceErrorKind::Transient,
            GitHubErrorKind::Permanent => SourceErrorKind::Permanent,
        };
        SourceError {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

fn classify(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    if message.to_lowercase().contains("try again") {
        return GitHubErrorKind::Transient;
    }
    match status_code {
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

/// Pulls an HTTP status out of an octocrab error message.
///
/// octocrab's error type has no stable status accessor across variants, so
/// this matches the message text. Unknown formats yield `None`, which
/// classifies conservatively.
fn extract_status_code(err_str: &str) -> Option<u16> {
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if let Ok(code) = rest[..end].parse() {
            return Some(code);
        }
    }

    let lower = err_str.to_lowercase();
    if err_str.contains("404") && lower.contains("not found") {
        return Some(404);
    }
    [401, 403, 422, 429, 500, 502, 503, 504]
        .into_iter()
        .find(|code| err_str.contains(&code.to_string()))
}

fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
