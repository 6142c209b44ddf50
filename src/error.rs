//! Error types for the gateway.
//!
//! Only failures that abort a request live here. Recoverable problems inside
//! the normalization pipeline are reported as
//! [`Diagnostic`](crate::normalize::Diagnostic)s instead.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest {
            message: msg.into(),
        }
    }

    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    /// HTTP status the edge should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } | Self::Json(_) => 400,
            Self::UnknownModel { .. } => 404,
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => 500,
            Self::Backend { .. } | Self::Http(_) => 502,
        }
    }

    /// Error `type` string, shared by both client dialects.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } | Self::Json(_) => "invalid_request_error",
            Self::UnknownModel { .. } => "not_found_error",
            _ => "api_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
