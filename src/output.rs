//! JSON Output Envelope Types
//!
//! Every HTTP response body is one of two envelopes.
//!
//! # Output Contract
//! - Success: `{"status": true, "data": <payload>}`
//! - Failure: `{"status": false, "data": "<message>"}`
//!
//! Bodies are pretty-printed with two-space indentation.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Success envelope wrapping the formatted query result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub status: bool,

    /// Response payload shaped by the service's response kind
    pub data: T,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub const fn new(data: T) -> Self {
        Self { status: true, data }
    }
}

impl<T: Serialize> SuccessEnvelope<T> {
    /// Render the envelope as a response body
    pub fn to_body(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GatewayError::internal(format!("Could not serialize response: {e}")))
    }
}

/// Failure envelope carrying a short caller-facing message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for failure envelopes
    pub status: bool,

    /// Caller-facing failure message
    pub data: String,
}

impl ErrorEnvelope {
    /// Create a new failure envelope
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: false, data: message.into() }
    }

    /// Render the envelope as a response body
    ///
    /// Serializing a struct of a bool and a string cannot fail; the fallback
    /// keeps the body valid JSON regardless.
    #[must_use]
    pub fn to_body(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| r#"{"status": false, "data": null}"#.to_string())
    }
}
