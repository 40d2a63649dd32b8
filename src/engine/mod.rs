//! Database Engine Traits and Query Execution
//!
//! This module defines the database abstraction the pipeline runs against
//! and the executor that drives it for one request.
//!
//! # Connection per request
//! Every request opens its own session, runs the optional audit statement
//! and the service query on it, and closes it on every exit path. Nothing
//! is pooled and nothing is shared between requests.
//!
//! # Parameters
//! Every positional parameter is sent as text. Templates cast it
//! server-side (`$1::jsonb`, `$1::text`).

use serde_json::{Map, Value};
use std::future::Future;

use crate::error::Result;
use crate::template::{QueryDescriptor, RowMode};

#[cfg(feature = "postgres")]
pub mod postgres;

/// Raw rows returned by a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Row values, positionally aligned with `columns`
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Shape rows as objects or positional arrays
    #[must_use]
    pub fn into_result_set(self, mode: RowMode) -> ResultSet {
        match mode {
            RowMode::Arrays => ResultSet::Arrays(self.rows),
            RowMode::Objects => {
                let columns = self.columns;
                ResultSet::Records(
                    self.rows
                        .into_iter()
                        .map(|row| columns.iter().cloned().zip(row).collect::<Map<_, _>>())
                        .collect(),
                )
            }
        }
    }
}

/// Rows in the shape requested by the service
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    /// One object per row, in column order
    Records(Vec<Map<String, Value>>),
    /// One array per row
    Arrays(Vec<Vec<Value>>),
}

impl ResultSet {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Records(rows) => rows.len(),
            Self::Arrays(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A database the gateway can open sessions on
///
/// Implementations hold only connection parameters; each call to
/// [`Database::connect`] yields a fresh, exclusively owned session.
pub trait Database: Send + Sync + 'static {
    type Session: DatabaseSession;

    /// Open a new session
    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// One open connection
pub trait DatabaseSession: Send {
    /// Run a statement with text parameters
    fn query(
        &mut self,
        text: &str,
        params: &[&str],
    ) -> impl Future<Output = Result<QueryRows>> + Send;

    /// Release the connection
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Audit statement and the values bound to it
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub sql: &'a str,
    pub caller_ip: &'a str,
    pub service: &'a str,
    pub request_data: &'a str,
}

/// Runs a request's statements on a session it owns
pub struct QueryExecutor<'a, D> {
    database: &'a D,
}

impl<'a, D: Database> QueryExecutor<'a, D> {
    #[must_use]
    pub const fn new(database: &'a D) -> Self {
        Self { database }
    }

    /// Run the optional audit statement, then the service query
    ///
    /// The session is closed whether or not either statement succeeds.
    pub async fn execute(
        &self,
        query: &QueryDescriptor,
        audit: Option<AuditRecord<'_>>,
    ) -> Result<ResultSet> {
        let mut session = self.database.connect().await?;
        let outcome = run_statements(&mut session, query, audit).await;
        session.close().await;
        outcome
    }
}

async fn run_statements<S: DatabaseSession>(
    session: &mut S,
    query: &QueryDescriptor,
    audit: Option<AuditRecord<'_>>,
) -> Result<ResultSet> {
    if let Some(audit) = audit {
        session
            .query(audit.sql, &[audit.caller_ip, audit.service, audit.request_data])
            .await?;
    }
    let rows = session.query(&query.text, &[query.param.as_str()]).await?;
    Ok(rows.into_result_set(query.row_mode))
}
