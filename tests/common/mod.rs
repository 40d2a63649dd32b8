//! Shared fixtures for integration tests
//!
//! A throwaway gateway home on disk plus an in-memory database that records
//! every statement it is asked to run.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use sqlgate::config::{ConfigLoader, GatewayConfig};
use sqlgate::{Database, DatabaseSession, GatewayError, GatewayState, QueryRows, Result};

/// A statement as the database saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<String>,
}

/// Everything the fake database observed
#[derive(Debug, Default)]
pub struct Recorder {
    opened: AtomicUsize,
    closed: AtomicUsize,
    statements: Mutex<Vec<Statement>>,
}

impl Recorder {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }
}

/// In-memory database returning canned rows
#[derive(Clone)]
pub struct FakeDatabase {
    recorder: Arc<Recorder>,
    rows: QueryRows,
    fail_when: Option<String>,
    refuse_connections: bool,
}

impl FakeDatabase {
    pub fn returning(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            rows: QueryRows { columns: columns.iter().map(ToString::to_string).collect(), rows },
            fail_when: None,
            refuse_connections: false,
        }
    }

    pub fn empty() -> Self {
        Self::returning(&[], Vec::new())
    }

    /// Fail any statement whose text contains `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_when = Some(marker.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }
}

pub struct FakeSession {
    recorder: Arc<Recorder>,
    rows: QueryRows,
    fail_when: Option<String>,
}

impl Database for FakeDatabase {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession> {
        if self.refuse_connections {
            return Err(GatewayError::database("connection refused"));
        }
        self.recorder.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            recorder: Arc::clone(&self.recorder),
            rows: self.rows.clone(),
            fail_when: self.fail_when.clone(),
        })
    }
}

impl DatabaseSession for FakeSession {
    async fn query(&mut self, text: &str, params: &[&str]) -> Result<QueryRows> {
        self.recorder.statements.lock().unwrap().push(Statement {
            text: text.to_string(),
            params: params.iter().map(ToString::to_string).collect(),
        });
        match &self.fail_when {
            Some(marker) if text.contains(marker.as_str()) => {
                Err(GatewayError::database(format!("relation \"{marker}\" does not exist")))
            }
            _ => Ok(self.rows.clone()),
        }
    }

    async fn close(self) {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A gateway home directory with `services/`, `config/` and `log/`
pub struct TestHome {
    pub dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("services")).unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `<name>.config.json` and the SQL file it names
    pub fn service(&self, name: &str, config: &Value, sql: &str) -> &Self {
        let services = self.path().join("services");
        std::fs::write(
            services.join(format!("{name}.config.json")),
            serde_json::to_string_pretty(config).unwrap(),
        )
        .unwrap();
        let query = config["settings"]["query"].as_str().unwrap();
        std::fs::write(services.join(query), sql).unwrap();
        self
    }

    pub fn audit(&self, sql: &str) -> &Self {
        std::fs::write(self.path().join("config").join("logger.sql.config"), sql).unwrap();
        self
    }

    pub fn config(&self) -> GatewayConfig {
        GatewayConfig::load(self.path()).unwrap()
    }

    pub fn error_log(&self) -> String {
        std::fs::read_to_string(self.path().join("log").join("errors.log")).unwrap_or_default()
    }

    pub fn router(&self, database: FakeDatabase) -> Router {
        self.router_with(database, |_| {})
    }

    pub fn router_with(
        &self,
        database: FakeDatabase,
        tweak: impl FnOnce(&mut GatewayConfig),
    ) -> Router {
        let mut config = self.config();
        tweak(&mut config);
        let loader = ConfigLoader::new(&config);
        sqlgate::build_router(Arc::new(GatewayState::new(&config, loader, database)))
    }
}

/// Send one request and decode the envelope
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

pub fn post(path: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::empty()).unwrap()
}
