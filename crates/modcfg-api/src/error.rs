use thiserror::Error;

/// Top-level error type for the `modcfg-api` crate.
///
/// Covers every failure mode of the transport adapter: HTTP transport,
/// API status responses, the cable websocket, and response decoding.
/// `modcfg-core` wraps these unchanged so callers can inspect them.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A header value (usually the bearer token) could not be encoded.
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    // ── API ─────────────────────────────────────────────────────────
    /// The API rejected our credentials (HTTP 401/403).
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Non-success status from the API, with the server's message if it sent one.
    #[error("API error (HTTP {status}): {message}")]
    Http {
        status: u16,
        message: String,
        reason: Option<String>,
    },

    // ── Cable channel ───────────────────────────────────────────────
    /// Cable websocket connection failed.
    #[error("Channel connection failed: {0}")]
    ChannelConnect(String),

    /// The server closed the cable connection.
    #[error("Channel closed: {reason}")]
    ChannelClosed { reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// The transport itself never retries; callers use this to decide.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::ChannelConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the API refused our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Unauthorized { status } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
