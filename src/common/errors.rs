use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Error domain reported to the host alongside every terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    NotFound,
    OpenRead,
    Read,
    Seek,
    LibraryInit,
    NotAuthorized,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "resource-not-found",
            Self::OpenRead => "resource-open-read",
            Self::Read => "resource-read",
            Self::Seek => "resource-seek",
            Self::LibraryInit => "library-init",
            Self::NotAuthorized => "resource-not-authorized",
        };
        f.write_str(s)
    }
}

/// Which stage of connection establishment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Resolve,
    Connect,
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "could not resolve server name",
            Self::Connect => "could not establish connection to server",
            Self::Tls => "secure connection setup failed",
        })
    }
}

/// Failure taxonomy of the request state machine.
///
/// Only [`SourceError::TransportTransient`] is retryable; everything else is
/// reported to the host exactly once and fails the current pull.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// DNS, TCP connect or TLS handshake failure.
    #[error("{kind}: {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    /// Connection reset, truncated body or timed out read.
    #[error("network error: {0}")]
    TransportTransient(String),

    #[error("malformed response: {0}")]
    Protocol(String),

    /// 4xx other than the authentication family, and 3xx that were not
    /// followed.
    #[error("{status} {reason}")]
    HttpClient { status: u16, reason: String },

    #[error("{status} {reason}")]
    HttpAuth { status: u16, reason: String },

    #[error("{status} {reason}")]
    HttpServer { status: u16, reason: String },

    /// The server ignored a byte range or time range request.
    #[error("{message}")]
    SeekUnsupported { message: String, status: Option<u16> },

    #[error("giving up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid byte range {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("cancelled")]
    Cancelled,

    /// The HTTP client (or the runtime driving it) could not be created.
    #[error("failed to create HTTP session: {0}")]
    Session(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Maps an unsuccessful HTTP status onto the taxonomy.
    pub fn from_status(status: StatusCode) -> Self {
        let code = status.as_u16();
        let reason = status
            .canonical_reason()
            .unwrap_or("Unknown status")
            .to_string();

        match code {
            401 | 402 | 403 | 407 => Self::HttpAuth {
                status: code,
                reason,
            },
            500..=599 => Self::HttpServer {
                status: code,
                reason,
            },
            _ => Self::HttpClient {
                status: code,
                reason,
            },
        }
    }

    /// Replaces the canonical reason of an HTTP status error with the phrase
    /// the server sent.
    pub fn with_reason(self, phrase: impl Into<String>) -> Self {
        match self {
            Self::HttpClient { status, .. } => Self::HttpClient {
                status,
                reason: phrase.into(),
            },
            Self::HttpAuth { status, .. } => Self::HttpAuth {
                status,
                reason: phrase.into(),
            },
            Self::HttpServer { status, .. } => Self::HttpServer {
                status,
                reason: phrase.into(),
            },
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportTransient(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpClient { status, .. }
            | Self::HttpAuth { status, .. }
            | Self::HttpServer { status, .. } => Some(*status),
            Self::SeekUnsupported { status, .. } => *status,
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport { .. } => ErrorCategory::OpenRead,
            Self::HttpClient { status: 404, .. } => ErrorCategory::NotFound,
            Self::HttpAuth { .. } => ErrorCategory::NotAuthorized,
            Self::TransportTransient(_)
            | Self::Protocol(_)
            | Self::HttpClient { .. }
            | Self::HttpServer { .. }
            | Self::RetriesExhausted { .. }
            | Self::Cancelled => ErrorCategory::Read,
            Self::SeekUnsupported { .. } => ErrorCategory::Seek,
            Self::InvalidRange { .. } | Self::Config(_) => ErrorCategory::OpenRead,
            Self::Session(_) => ErrorCategory::LibraryInit,
        }
    }

    /// Short human readable summary, the detailed text goes into
    /// [`ErrorMessage::debug`].
    fn summary(&self) -> &'static str {
        match self {
            Self::Transport {
                kind: TransportKind::Resolve,
                ..
            } => "Could not resolve server name.",
            Self::Transport {
                kind: TransportKind::Connect,
                ..
            } => "Could not establish connection to server.",
            Self::Transport {
                kind: TransportKind::Tls,
                ..
            } => "Secure connection setup failed.",
            Self::TransportTransient(_) | Self::RetriesExhausted { .. } => {
                "A network error occurred, or the server closed the connection unexpectedly."
            }
            Self::Protocol(_) => "Server sent bad data.",
            Self::HttpClient { status: 404, .. } => "Not Found.",
            Self::HttpClient { .. } | Self::HttpServer { .. } => "Server returned an error.",
            Self::HttpAuth { .. } => "Not authorized to access resource.",
            Self::SeekUnsupported { .. } => "Server does not support seeking.",
            Self::InvalidRange { .. } => "Could not set the requested byte range.",
            Self::Cancelled => "Cancelled.",
            Self::Session(_) => "Failed to create HTTP session.",
            Self::Config(_) => "Invalid configuration.",
        }
    }
}

/// Structured error posted to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub category: ErrorCategory,
    pub message: String,
    pub debug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

impl ErrorMessage {
    pub fn new(error: &SourceError, location: Option<&str>, redirect_uri: Option<&str>) -> Self {
        let debug = match (location, redirect_uri) {
            (Some(location), Some(redirect)) => {
                format!("{error}, URL: {location}, Redirect to: {redirect}")
            }
            (Some(location), None) => format!("{error}, URL: {location}"),
            _ => error.to_string(),
        };

        Self {
            category: error.category(),
            message: error.summary().to_string(),
            debug,
            status_code: error.status_code(),
            redirect_uri: redirect_uri.map(str::to_string),
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.category, self.message, self.debug)
    }
}

impl std::error::Error for ErrorMessage {}
