//! Error Reporting
//!
//! Turns any pipeline failure into the failure envelope and, for database
//! and internal failures, appends a line to the diagnostic log:
//!
//! ```text
//! 2024-05-01T09:30:00.123Z, items: database: relation "items" does not exist
//! ```

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, warn};

use crate::config::{FailureStatus, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::output::{ErrorEnvelope, SuccessEnvelope};

/// Caller-facing text for masked database and internal failures
pub const MASKED_MESSAGE: &str = "Temporarily out of service";

/// Builds failure responses and keeps the diagnostic log
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    error_log: PathBuf,
    mask_internal: bool,
    failure_status: FailureStatus,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self::with_policy(
            config.error_log_path(),
            config.mask_internal_errors,
            config.failure_status,
        )
    }

    #[must_use]
    pub const fn with_policy(
        error_log: PathBuf,
        mask_internal: bool,
        failure_status: FailureStatus,
    ) -> Self {
        Self { error_log, mask_internal, failure_status }
    }

    #[must_use]
    pub fn error_log(&self) -> &Path {
        &self.error_log
    }

    /// HTTP status for a failure under the configured policy
    #[must_use]
    pub const fn status_for(&self, err: &GatewayError) -> StatusCode {
        match self.failure_status {
            FailureStatus::Uniform => StatusCode::NOT_FOUND,
            FailureStatus::Differentiated => match err {
                GatewayError::RouteNotFound(_) | GatewayError::ConfigMissing(_) => {
                    StatusCode::NOT_FOUND
                }
                GatewayError::MethodMismatch { .. } => StatusCode::METHOD_NOT_ALLOWED,
                GatewayError::AuthFailure => StatusCode::UNAUTHORIZED,
                GatewayError::IpRestricted(_) => StatusCode::FORBIDDEN,
                GatewayError::ArgumentsMalformed(_)
                | GatewayError::ArgumentMissing(_)
                | GatewayError::ArgumentTypeMismatch(_)
                | GatewayError::ArgumentPatternMismatch(_)
                | GatewayError::ArgumentConstantOverride(_)
                | GatewayError::ArgumentUnexpected(_) => StatusCode::BAD_REQUEST,
                GatewayError::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
                GatewayError::ConfigMalformed(_)
                | GatewayError::TemplateUnresolvedMacro(_)
                | GatewayError::TemplateInvalidKey(_)
                | GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message placed in the failure envelope
    #[must_use]
    pub fn caller_message(&self, err: &GatewayError) -> String {
        if self.mask_internal && err.is_internal() {
            MASKED_MESSAGE.to_string()
        } else {
            err.public_message()
        }
    }

    /// Log a failure and build its response
    pub async fn report(&self, service: &str, err: &GatewayError) -> Response {
        if err.is_internal() {
            error!(service, code = err.error_code(), error = %err, "request failed");
            if let Err(e) = self.record(service, &err.to_string()).await {
                error!(path = %self.error_log.display(), error = %e, "could not write diagnostic log");
            }
        } else {
            warn!(service, code = err.error_code(), "request rejected");
        }

        json_response(self.status_for(err), ErrorEnvelope::new(self.caller_message(err)).to_body())
    }

    /// Append one line to the diagnostic log, creating its directory if needed
    pub async fn record(&self, service: &str, detail: &str) -> std::io::Result<()> {
        if let Some(parent) = self.error_log.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let line = format!(
            "{}, {service}: {detail}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.error_log)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Wrap a payload in the success envelope
pub fn success_response<T: Serialize>(payload: T) -> Result<Response> {
    let body = SuccessEnvelope::new(payload).to_body()?;
    Ok(json_response(StatusCode::OK, body))
}

fn json_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
