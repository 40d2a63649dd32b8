//! Request Pipeline
//!
//! One request, start to finish:
//!
//! 1. route the path to a service and check the service exists
//! 2. buffer the POST body, or check the GET argument string
//! 3. load the service and enforce its guard
//! 4. validate arguments and build the query
//! 5. execute on a fresh connection and shape the result
//!
//! Any failure ends the request with a single failure envelope from the
//! [`ErrorReporter`]. There are no retries.

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, Method};
use axum::response::Response;
use std::net::SocketAddr;
use tracing::debug;

use crate::arguments::{parse_body, validate_arguments};
use crate::config::{ConfigLoader, GatewayConfig, HttpMethod};
use crate::engine::{AuditRecord, Database, QueryExecutor};
use crate::error::{GatewayError, Result};
use crate::guard::{self, RequestContext, RequestGuard};
use crate::report::{success_response, ErrorReporter};
use crate::response::format_response;
use crate::router::{route, RouteMatch};
use crate::template::{build_query, CallArguments, CallPayload};

/// Everything a request needs, shared read-only across requests
pub struct GatewayState<D> {
    pub loader: ConfigLoader,
    pub database: D,
    pub reporter: ErrorReporter,
    pub guard: RequestGuard,
    pub max_body_bytes: usize,
}

impl<D: Database> GatewayState<D> {
    #[must_use]
    pub fn new(config: &GatewayConfig, loader: ConfigLoader, database: D) -> Self {
        Self {
            loader,
            database,
            reporter: ErrorReporter::new(config),
            guard: RequestGuard::new(config.strip_bearer_prefix),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Handle one HTTP request; never fails
pub async fn handle<D: Database>(state: &GatewayState<D>, request: Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path(), |pq| pq.as_str())
        .to_string();

    let matched = match route(&target) {
        Ok(matched) => matched,
        Err(err) => return state.reporter.report("", &err).await,
    };
    debug!(service = %matched.service, method = %request.method(), "route matched");

    match process(state, &matched, request).await {
        Ok(response) => response,
        Err(err) => state.reporter.report(&matched.service, &err).await,
    }
}

async fn process<D: Database>(
    state: &GatewayState<D>,
    matched: &RouteMatch,
    request: Request,
) -> Result<Response> {
    if !state.loader.service_exists(&matched.service).await {
        return Err(GatewayError::route_not_found(&matched.service));
    }

    let method = match *request.method() {
        Method::GET => HttpMethod::Get,
        Method::POST => HttpMethod::Post,
        ref other => return Err(GatewayError::method_mismatch("GET or POST", other.as_str())),
    };

    let (parts, body) = request.into_parts();

    // Raw request data: the POST body, or the GET argument string
    let request_data = match method {
        HttpMethod::Post => {
            let bytes = to_bytes(body, state.max_body_bytes)
                .await
                .map_err(|_| GatewayError::arguments_malformed("body"))?;
            String::from_utf8(bytes.to_vec())
                .map_err(|_| GatewayError::arguments_malformed("invalid UTF-8"))?
        }
        HttpMethod::Get => {
            matched.check_legacy_arguments()?;
            matched.legacy_args.clone()
        }
    };

    let service = state.loader.load_service(&matched.service).await?;
    let settings = service.settings();

    let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    let caller_ip = guard::caller_ip(&parts.headers, peer);
    let context = RequestContext {
        method,
        authorization: parts.headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
        caller_ip,
    };
    state.guard.check(settings, &context)?;

    let payload = match method {
        HttpMethod::Post => CallPayload::Object(validate_arguments(
            parse_body(request_data.as_bytes())?,
            service.arguments(),
        )?),
        HttpMethod::Get if settings.extsyntax => {
            if !request_data.is_empty() {
                return Err(GatewayError::arguments_malformed("object expected"));
            }
            CallPayload::Object(validate_arguments(CallArguments::new(), service.arguments())?)
        }
        HttpMethod::Get => CallPayload::Raw(request_data.clone()),
    };

    let query =
        build_query(&service.template, settings.extsyntax, method, &payload, settings.response)?;

    let audit_sql = state.loader.audit_sql().await?;
    let caller_ip = caller_ip.map(|ip| ip.to_string()).unwrap_or_default();
    let audit = audit_sql.as_deref().map(|sql| AuditRecord {
        sql,
        caller_ip: &caller_ip,
        service: &service.name,
        request_data: match method {
            HttpMethod::Post => request_data.as_str(),
            HttpMethod::Get => matched.raw_remainder(),
        },
    });

    let rows = QueryExecutor::new(&state.database).execute(&query, audit).await?;
    debug!(service = %service.name, rows = rows.len(), "query executed");

    success_response(format_response(settings.response, rows))
}
