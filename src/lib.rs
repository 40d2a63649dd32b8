//! Sqlgate - Parameterized SQL over HTTP
//!
//! Sqlgate exposes SQL statements as authenticated HTTP endpoints. Each
//! service is a JSON configuration (method, token, IP allowlist, argument
//! schema, response kind) next to a SQL template.
//!
//! # Core Principles
//! - Caller values are bound as one parameter, never spliced into SQL text
//! - Arguments are checked against the schema before anything runs
//! - Every request owns its own connection, released on every exit path
//! - One uniform envelope for success and failure
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`config`] - Gateway settings and service resources
//! - [`arguments`] - Argument validation
//! - [`template`] - SQL template expansion
//! - [`guard`] - Method, token and IP checks
//! - [`router`] - Path routing and HTTP wiring
//! - [`engine`] - Database traits, executor and `PostgreSQL` implementation
//! - [`response`] - Result shaping
//! - [`report`] - Failure envelopes and diagnostic log
//! - [`pipeline`] - Per-request orchestration
//! - [`telemetry`] - Tracing setup

pub mod arguments;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod response;
pub mod router;
pub mod telemetry;
pub mod template;

// Re-export commonly used types for convenience
pub use arguments::validate_arguments;
pub use config::{
    ArgumentSchema, ArgumentSpec, ArgumentType, ConfigLoader, FailureStatus, GatewayConfig,
    HttpMethod, LoadedService, ResponseKind, ServiceConfig, Settings,
};
pub use engine::{Database, DatabaseSession, QueryExecutor, QueryRows, ResultSet};
pub use error::{GatewayError, Result};
pub use guard::{IpRule, RequestGuard};
pub use output::{ErrorEnvelope, SuccessEnvelope};
pub use pipeline::GatewayState;
pub use report::ErrorReporter;
pub use router::{build_router, route, serve};
pub use template::{CallArguments, QueryDescriptor, RowMode};

#[cfg(feature = "postgres")]
pub use engine::postgres::PostgresDatabase;
