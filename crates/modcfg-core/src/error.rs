// ── Core error types ──
//
// Errors surfaced by the registry, cache store and resource instances.
// Transport failures are carried unchanged inside `Transport` so callers
// can decide on retry policy themselves; the core never retries.
//
// `CoreError` is `Clone` because every caller joined onto a single-flight
// fetch receives the same failure.

use std::sync::Arc;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Registry ─────────────────────────────────────────────────────
    /// Duplicate or missing registry entry, or a malformed route template.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The verb was never registered for this resource type.
    #[error("Unknown verb '{verb}' for resource type '{resource_type}'")]
    UnknownVerb {
        resource_type: String,
        verb: String,
    },

    // ── Transport (wrapped, unchanged) ───────────────────────────────
    #[error("Transport error: {0}")]
    Transport(#[source] Arc<modcfg_api::Error>),

    // ── Hydration ────────────────────────────────────────────────────
    #[error("Cannot decode {resource_type}: {message}")]
    Decode {
        resource_type: String,
        message: String,
    },

    #[error("{resource_type} has no primary key at {pointer}")]
    MissingPrimaryKey {
        resource_type: String,
        pointer: String,
    },

    // ── Lifecycle ────────────────────────────────────────────────────
    /// The instance outlived the cache store it was hydrated from.
    #[error("Resource is detached from its cache store")]
    Detached,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The underlying transport error, if this is one.
    pub fn transport(&self) -> Option<&modcfg_api::Error> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Programmer/startup errors that no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::UnknownVerb { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<modcfg_api::Error> for CoreError {
    fn from(err: modcfg_api::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}
