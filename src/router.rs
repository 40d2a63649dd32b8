//! Routing
//!
//! Maps `/SERVICES/<name>[/<legacy-args>]` onto a service name and wires the
//! pipeline into an axum [`Router`]. Every path goes through one fallback
//! handler, so unknown paths get the same failure envelope as everything
//! else.

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Database;
use crate::error::{GatewayError, Result};
use crate::pipeline::{self, GatewayState};

/// Leading spaces, slashes and `?`; trailing spaces and slashes
static PRUNE_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ /?]*|[ /]*$").expect("Invalid prune regex"));

static ROUTE_RX: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^SERVICES/([A-Za-z]\w{0,64})([/?].*)?$")
        .case_insensitive(true)
        .build()
        .expect("Invalid route regex")
});

/// Characters never accepted in a GET argument string
static DISALLOWED_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'|\\|--"#).expect("Invalid disallowed-characters regex"));

/// A request path resolved to a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Service name as written in the path
    pub service: String,

    /// Unconsumed remainder of the path, trimmed
    pub legacy_args: String,

    /// Remainder before trimming, as checked for disallowed characters
    raw_remainder: String,
}

fn prune(text: &str) -> String {
    PRUNE_RX.replace_all(text, "").into_owned()
}

/// Resolve a raw request path (with query string) to a service
pub fn route(path_and_query: &str) -> Result<RouteMatch> {
    let pruned = prune(path_and_query);
    let captures =
        ROUTE_RX.captures(&pruned).ok_or_else(|| GatewayError::route_not_found(path_and_query))?;

    let service = captures.get(1).map_or("", |m| m.as_str()).to_string();
    let raw_remainder = captures.get(2).map_or("", |m| m.as_str()).to_string();

    Ok(RouteMatch { service, legacy_args: prune(&raw_remainder), raw_remainder })
}

impl RouteMatch {
    /// Unconsumed remainder exactly as the caller sent it
    #[must_use]
    pub fn raw_remainder(&self) -> &str {
        &self.raw_remainder
    }

    /// Reject GET argument strings carrying quotes, backslashes or comment markers
    pub fn check_legacy_arguments(&self) -> Result<()> {
        if DISALLOWED_RX.is_match(&self.raw_remainder) {
            Err(GatewayError::arguments_malformed("URL"))
        } else {
            Ok(())
        }
    }
}

/// Build the HTTP application
pub fn build_router<D: Database>(state: Arc<GatewayState<D>>) -> Router {
    Router::new()
        .fallback(dispatch::<D>)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dispatch<D: Database>(State(state): State<Arc<GatewayState<D>>>, request: Request) -> Response {
    pipeline::handle(&state, request).await
}

/// Bind and serve until the process is stopped
pub async fn serve<D: Database>(state: Arc<GatewayState<D>>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "gateway listening");

    let app = build_router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
}
