use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use grammar_kit_dialect::UnsupportedFeature;

/// Errors surfaced by the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The grammar cannot be expressed in the dialect the provider speaks.
    /// Raised before any request leaves the process.
    #[error(transparent)]
    UnsupportedFeature(#[from] UnsupportedFeature),

    /// The provider refused grammar-constrained generation, either through a
    /// structured error payload or an error message carrying grammar markers.
    #[error("provider rejected grammar-constrained generation: {message}")]
    ProviderRejected {
        /// The provider's stated reason.
        message: String,
    },

    /// The provider's final output failed local grammar re-validation. The
    /// call fails closed: no captures are surfaced.
    #[error("local grammar validation failed: {message}")]
    ValidationFailed {
        /// What was validated and how it failed.
        message: String,
    },

    /// The call was made in a state or with options the selected provider
    /// variant cannot honor.
    #[error("{message}")]
    RequestMisuse {
        /// What the caller did wrong.
        message: String,
    },

    /// A non-2xx response that is not a grammar rejection.
    #[error("API request failed with status {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or extracted error message.
        message: String,
    },

    /// A network or protocol failure, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// A request body that could not be serialized.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    /// Creates a [`AdapterError::RequestMisuse`].
    pub fn misuse(message: impl Into<String>) -> Self {
        AdapterError::RequestMisuse {
            message: message.into(),
        }
    }

    /// Creates a [`AdapterError::ProviderRejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        AdapterError::ProviderRejected {
            message: message.into(),
        }
    }

    /// Creates a [`AdapterError::ValidationFailed`].
    pub fn validation(message: impl Into<String>) -> Self {
        AdapterError::ValidationFailed {
            message: message.into(),
        }
    }
}

const GRAMMAR_MARKERS: [&str; 5] = [
    "grammar",
    "response_format",
    "structured output",
    "structured_output",
    "custom tool",
];

const UNSUPPORTED_MARKERS: [&str; 5] = [
    "unsupported",
    "not support",
    "invalid",
    "provider returned error",
    "unknown",
];

/// Whether an error message reads like a provider refusing a grammar
/// request: it must carry both a grammar-context marker and an
/// unsupported/invalid marker (case-insensitive substring test).
pub fn looks_like_provider_rejection(message: &str) -> bool {
    let lowered = message.to_lowercase();
    GRAMMAR_MARKERS.iter().any(|marker| lowered.contains(marker))
        && UNSUPPORTED_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Classifies a non-2xx response from a grammar-constrained call: grammar
/// rejections become [`AdapterError::ProviderRejected`], everything else
/// stays an HTTP error.
pub fn classify_http_failure(status: u16, body: &str, grammar_in_play: bool) -> AdapterError {
    let message = ProviderErrorData::parse(body)
        .map(|data| data.error.message)
        .unwrap_or_else(|| body.to_string());
    if grammar_in_play && looks_like_provider_rejection(&message) {
        AdapterError::rejected(message)
    } else {
        AdapterError::Http { status, message }
    }
}

/// Structured error payload most chat-completions providers return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderErrorData {
    /// The error object.
    pub error: ProviderErrorDetails,
}

/// Details of a provider error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderErrorDetails {
    /// The error message.
    pub message: String,

    /// The error type, handled loosely to support various providers.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// The parameter that caused the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<Value>,

    /// The error code, string or numeric depending on the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Error code that can be either a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// String error code.
    String(String),
    /// Numeric error code.
    Number(i64),
}

impl ProviderErrorData {
    /// Parses a response body into the structured error shape, if it is one.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}
