//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use modcfg_config::ConfigError;
use modcfg_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(modcfg::connection_failed),
        help(
            "Check that the UI backend is reachable.\n\
             Reason: {reason}\n\
             Try: modcfg get --insecure"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("TLS setup failed: {reason}")]
    #[diagnostic(
        code(modcfg::tls_error),
        help(
            "If the backend uses a self-signed certificate, pass --insecure (-k)\n\
             or set ca_cert in your profile."
        )
    )]
    TlsError { reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(modcfg::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed (HTTP {status})")]
    #[diagnostic(
        code(modcfg::auth_failed),
        help(
            "Verify the bearer token for profile '{profile}'.\n\
             Set it with --token, MODCFG_TOKEN, token_env, or the system keyring."
        )
    )]
    AuthFailed { profile: String, status: u16 },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(modcfg::no_credentials),
        help("The profile names a token_env that is unset. Export it or pass --token.")
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(modcfg::not_found),
        help("Check the ModuleConfig name passed with --name.")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(modcfg::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(modcfg::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(modcfg::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(modcfg::no_config),
        help(
            "Pass --server or set MODCFG_SERVER, or create a profile in\n\
             {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(modcfg::config))]
    Config { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(modcfg::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::TlsError { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport(api) => from_api(&api),

            CoreError::Configuration { message } => CliError::Config { message },

            CoreError::UnknownVerb {
                resource_type,
                verb,
            } => CliError::ApiError {
                code: "unknown_verb".into(),
                message: format!("'{verb}' is not registered for {resource_type}"),
            },

            CoreError::Decode {
                resource_type,
                message,
            } => CliError::ApiError {
                code: "decode".into(),
                message: format!("{resource_type}: {message}"),
            },

            CoreError::MissingPrimaryKey {
                resource_type,
                pointer,
            } => CliError::ApiError {
                code: "decode".into(),
                message: format!("{resource_type} response has no {pointer}"),
            },

            CoreError::Detached => CliError::ApiError {
                code: "internal".into(),
                message: "resource outlived its cache".into(),
            },

            CoreError::Internal(message) => CliError::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

impl From<modcfg_api::Error> for CliError {
    fn from(err: modcfg_api::Error) -> Self {
        from_api(&err)
    }
}

fn from_api(err: &modcfg_api::Error) -> CliError {
    use modcfg_api::Error;

    match err {
        Error::Transport(e) if e.is_timeout() => CliError::Timeout,
        Error::Transport(e) => CliError::ConnectionFailed {
            url: e.url().map(ToString::to_string).unwrap_or_default(),
            reason: e.to_string(),
        },
        Error::ChannelConnect(reason) => CliError::ConnectionFailed {
            url: "cable".into(),
            reason: reason.clone(),
        },
        Error::ChannelClosed { reason } => CliError::ConnectionFailed {
            url: "cable".into(),
            reason: format!("closed by server: {reason}"),
        },
        Error::Tls(reason) => CliError::TlsError {
            reason: reason.clone(),
        },
        Error::Unauthorized { status } => CliError::AuthFailed {
            profile: "current".into(),
            status: *status,
        },
        Error::Http { status: 404, message, .. } => CliError::NotFound {
            resource_type: "ModuleConfig".into(),
            identifier: message.clone(),
        },
        Error::Http {
            status, message, ..
        } => CliError::ApiError {
            code: status.to_string(),
            message: message.clone(),
        },
        Error::InvalidUrl(e) => CliError::Validation {
            field: "server".into(),
            reason: e.to_string(),
        },
        Error::InvalidHeader(reason) => CliError::Validation {
            field: "token".into(),
            reason: reason.clone(),
        },
        Error::Deserialization { message, .. } => CliError::ApiError {
            code: "decode".into(),
            message: message.clone(),
        },
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: String::new(),
            },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}
