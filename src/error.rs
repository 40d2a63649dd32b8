//! Error Handling Infrastructure
//!
//! This module defines every failure kind a request can end in.
//! All errors are structured and map to stable error codes; the caller only
//! ever sees [`GatewayError::public_message`], never the full `Display` text.
//!
//! # Error Categories
//! - Routing and configuration: `RouteNotFound`, `ConfigMissing`, `ConfigMalformed`
//! - Request guard: `MethodMismatch`, `AuthFailure`, `IpRestricted`
//! - Arguments: `ArgumentsMalformed`, `ArgumentMissing`, `ArgumentTypeMismatch`,
//!   `ArgumentPatternMismatch`, `ArgumentConstantOverride`, `ArgumentUnexpected`
//! - Templates: `TemplateUnresolvedMacro`, `TemplateInvalidKey`
//! - Backend: `DatabaseError`, `InternalError`

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Request path does not name a configured service
    #[error("No route: {0}")]
    RouteNotFound(String),

    /// Service configuration resource could not be read
    #[error("Service configuration missing: {0}")]
    ConfigMissing(String),

    /// Service configuration exists but is invalid
    #[error("Service configuration malformed: {0}")]
    ConfigMalformed(String),

    /// Request method does not match the configured method
    #[error("Method mismatch: expected {expected}, got {actual}")]
    MethodMismatch { expected: String, actual: String },

    /// Bearer token missing or wrong
    #[error("Authorization failed")]
    AuthFailure,

    /// Caller IP is not in the service allowlist
    #[error("Caller IP '{0}' not allowed")]
    IpRestricted(String),

    /// Request body or legacy argument string is unusable
    #[error("Malformed arguments: {0}")]
    ArgumentsMalformed(String),

    /// Required argument not supplied and no default/constant declared
    #[error("Call argument {0} missing")]
    ArgumentMissing(String),

    /// Supplied value has the wrong JSON type
    #[error("Call argument {0} type mismatch")]
    ArgumentTypeMismatch(String),

    /// Text value does not match the declared pattern
    #[error("Call argument {0} pattern mismatch")]
    ArgumentPatternMismatch(String),

    /// Caller tried to supply a constant argument
    #[error("Call argument {0} constant override")]
    ArgumentConstantOverride(String),

    /// Caller supplied an argument the schema does not declare
    #[error("Call argument {0} unexpected")]
    ArgumentUnexpected(String),

    /// Macros left in the query text after expansion
    #[error("Macros left: {}", .0.join(", "))]
    TemplateUnresolvedMacro(Vec<String>),

    /// Argument name not usable as a template key
    #[error("Non-conforming key found: \"{0}\"")]
    TemplateInvalidKey(String),

    /// Connection or query failure reported by the database
    #[error("database: {0}")]
    DatabaseError(String),

    /// Anything else
    #[error("internal: {0}")]
    InternalError(String),
}

impl GatewayError {
    /// Convert error to error code string
    ///
    /// Error codes are stable and appear in tracing output and diagnostics.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            Self::ConfigMissing(_) => "CONFIG_MISSING",
            Self::ConfigMalformed(_) => "CONFIG_MALFORMED",
            Self::MethodMismatch { .. } => "METHOD_MISMATCH",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::IpRestricted(_) => "IP_RESTRICTED",
            Self::ArgumentsMalformed(_) => "ARGUMENTS_MALFORMED",
            Self::ArgumentMissing(_) => "ARGUMENT_MISSING",
            Self::ArgumentTypeMismatch(_) => "ARGUMENT_TYPE_MISMATCH",
            Self::ArgumentPatternMismatch(_) => "ARGUMENT_PATTERN_MISMATCH",
            Self::ArgumentConstantOverride(_) => "ARGUMENT_CONSTANT_OVERRIDE",
            Self::ArgumentUnexpected(_) => "ARGUMENT_UNEXPECTED",
            Self::TemplateUnresolvedMacro(_) => "TEMPLATE_UNRESOLVED_MACRO",
            Self::TemplateInvalidKey(_) => "TEMPLATE_INVALID_KEY",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Short message safe to return to the caller
    ///
    /// Never contains tokens, file paths, SQL text or backend detail.
    /// Database and internal failures are reported here with their detail;
    /// the error reporter decides whether to mask them.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::RouteNotFound(_) => "No service".to_string(),
            Self::ConfigMissing(_) => "No service (manifest)".to_string(),
            Self::ConfigMalformed(_) => "No service (configuration)".to_string(),
            Self::MethodMismatch { .. } => "method".to_string(),
            Self::AuthFailure => "authorization".to_string(),
            Self::IpRestricted(_) => "IP".to_string(),
            Self::ArgumentsMalformed(reason) => format!("arguments:{reason}"),
            Self::ArgumentMissing(name) => format!("missing:{name}"),
            Self::ArgumentTypeMismatch(name) => format!("type mismatch:{name}"),
            Self::ArgumentPatternMismatch(name) => format!("pattern mismatch:{name}"),
            Self::ArgumentConstantOverride(name) => format!("constant override:{name}"),
            Self::ArgumentUnexpected(name) => format!("unexpected:{name}"),
            Self::TemplateUnresolvedMacro(_) | Self::TemplateInvalidKey(_) => {
                "No service (query template)".to_string()
            }
            Self::DatabaseError(_) | Self::InternalError(_) => self.to_string(),
        }
    }

    /// Whether this failure belongs in the persistent diagnostic log
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::DatabaseError(_) | Self::InternalError(_))
    }

    /// Create a route-not-found error
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound(path.into())
    }

    /// Create a config-missing error
    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::ConfigMissing(message.into())
    }

    /// Create a config-malformed error
    pub fn config_malformed(message: impl Into<String>) -> Self {
        Self::ConfigMalformed(message.into())
    }

    /// Create a method mismatch error
    pub fn method_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::MethodMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Create a malformed-arguments error
    pub fn arguments_malformed(reason: impl Into<String>) -> Self {
        Self::ArgumentsMalformed(reason.into())
    }

    /// Create a database error
    pub fn database(detail: impl Into<String>) -> Self {
        Self::DatabaseError(detail.into())
    }

    /// Create an internal error
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::InternalError(detail.into())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
