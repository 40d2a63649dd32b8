//! `PostgreSQL` Database Implementation
//!
//! This module implements [`Database`] and [`DatabaseSession`] on top of
//! `tokio-postgres`.
//!
//! # Implementation Notes
//! - One TCP connection per session, driven by a spawned connection task
//! - Statements run through `query_typed`: every parameter is declared `text`
//!   and no named statement is prepared server-side
//! - Results arrive in binary format and are converted to JSON per column type
//! - JSON/JSONB preserved as nested JSON
//! - BYTEA data is Base64-encoded for JSON safety
//! - NUMERIC is rendered as its exact decimal string
//! - NaN/Infinity floats become null
//! - Arrays convert element by element, enums as their label
//! - Types without a JSON mapping are an error, never reinterpreted bytes

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::str::FromStr;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::debug;

use crate::engine::{Database, DatabaseSession, QueryRows};
use crate::error::{GatewayError, Result};

/// Connection parameters for a `PostgreSQL` server
#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    config: Config,
}

impl PostgresDatabase {
    /// Use a connection string when one is configured, else the `PG*` environment
    pub fn new(connection_string: Option<&str>) -> Result<Self> {
        match connection_string {
            Some(conn) => Self::from_connection_string(conn),
            None => Self::from_env(),
        }
    }

    /// Parse a libpq-style `key=value` string or a `postgresql://` URL
    pub fn from_connection_string(conn: &str) -> Result<Self> {
        let config = Config::from_str(conn.trim()).map_err(|e| {
            GatewayError::config_malformed(format!("Invalid connection string: {e}"))
        })?;
        Ok(Self { config })
    }

    /// Build parameters from `PGHOST`, `PGPORT`, `PGDATABASE`, `PGUSER`, `PGPASSWORD`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("PGHOST").unwrap_or_else(|| "localhost".to_string());

        let port = match lookup("PGPORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| GatewayError::config_malformed(format!("Invalid PGPORT '{port}'")))?,
            None => 5432,
        };

        let user = lookup("PGUSER")
            .or_else(|| lookup("USER"))
            .ok_or_else(|| GatewayError::config_missing("PGUSER is not set"))?;

        // Same default as libpq: database named after the user
        let database = lookup("PGDATABASE").unwrap_or_else(|| user.clone());

        let mut config = Config::new();
        config.host(&host).port(port).user(&user).dbname(&database);
        if let Some(password) = lookup("PGPASSWORD") {
            config.password(password);
        }

        Ok(Self { config })
    }
}

impl Database for PostgresDatabase {
    type Session = PostgresSession;

    async fn connect(&self) -> Result<PostgresSession> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| GatewayError::database(format!("Failed to connect to PostgreSQL: {e}")))?;

        // Connection errors surface through the client; details may carry credentials.
        let connection = tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(PostgresSession { client, connection })
    }
}

/// An open `PostgreSQL` connection owned by one request
pub struct PostgresSession {
    client: Client,
    connection: JoinHandle<()>,
}

impl DatabaseSession for PostgresSession {
    async fn query(&mut self, text: &str, params: &[&str]) -> Result<QueryRows> {
        let typed: Vec<(&(dyn ToSql + Sync), Type)> =
            params.iter().map(|p| (p as &(dyn ToSql + Sync), Type::TEXT)).collect();

        let rows = self
            .client
            .query_typed(text, &typed)
            .await
            .map_err(|e| GatewayError::database(describe_db_error(&e)))?;

        rows_to_json(&rows)
    }

    async fn close(self) {
        drop(self.client);
        if let Err(e) = self.connection.await {
            debug!(error = %e, "connection task ended abnormally");
        }
    }
}

/// Server message when there is one, driver message otherwise
fn describe_db_error(error: &tokio_postgres::Error) -> String {
    error.as_db_error().map_or_else(|| error.to_string(), |db| db.message().to_string())
}

fn rows_to_json(rows: &[Row]) -> Result<QueryRows> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut data = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..row.len() {
            values.push(postgres_value_to_json(row, idx)?);
        }
        data.push(values);
    }

    Ok(QueryRows { columns, rows: data })
}

/// Undecoded column value, accepted for every type
struct RawValue<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(Some(raw)))
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(None))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    let RawValue(raw) = row
        .try_get::<_, RawValue<'_>>(idx)
        .map_err(|e| GatewayError::database(format!("Failed to read column {idx}: {e}")))?;
    raw.map_or(Ok(Value::Null), |raw| value_to_json(row.columns()[idx].type_(), raw))
}

/// Convert one binary-format value of type `ty`
fn value_to_json(ty: &Type, raw: &[u8]) -> Result<Value> {
    match ty.kind() {
        Kind::Array(member) => {
            let items: Vec<Option<RawValue<'_>>> = decode(ty, raw)?;
            items
                .into_iter()
                .map(|item| match item {
                    Some(RawValue(Some(bytes))) => value_to_json(member, bytes),
                    _ => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        // Enum labels are sent as their text
        Kind::Enum(_) => std::str::from_utf8(raw)
            .map(|label| Value::String(label.to_string()))
            .map_err(|_| unconvertible(ty)),
        Kind::Domain(base) => value_to_json(base, raw),
        _ => scalar_to_json(ty, raw),
    }
}

fn scalar_to_json(ty: &Type, raw: &[u8]) -> Result<Value> {
    let value = match *ty {
        Type::BOOL => Value::Bool(decode(ty, raw)?),

        Type::INT2 => Value::from(decode::<i16>(ty, raw)?),
        Type::INT4 => Value::from(decode::<i32>(ty, raw)?),
        Type::INT8 => Value::from(decode::<i64>(ty, raw)?),
        Type::OID => Value::from(decode::<u32>(ty, raw)?),

        Type::FLOAT4 => float_to_json(f64::from(decode::<f32>(ty, raw)?)),
        Type::FLOAT8 => float_to_json(decode::<f64>(ty, raw)?),

        Type::NUMERIC => decode_numeric(raw).map_or(Value::Null, Value::String),

        Type::JSON | Type::JSONB => decode(ty, raw)?,

        Type::BYTEA => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(decode::<&[u8]>(ty, raw)?))
        }

        Type::TIMESTAMP => {
            let v: chrono::NaiveDateTime = decode(ty, raw)?;
            Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        Type::TIMESTAMPTZ => {
            let v: chrono::DateTime<chrono::Utc> = decode(ty, raw)?;
            Value::String(v.to_rfc3339())
        }
        Type::DATE => {
            let v: chrono::NaiveDate = decode(ty, raw)?;
            Value::String(v.format("%Y-%m-%d").to_string())
        }
        Type::TIME => {
            let v: chrono::NaiveTime = decode(ty, raw)?;
            Value::String(v.format("%H:%M:%S%.f").to_string())
        }

        Type::UUID => Value::String(decode::<uuid::Uuid>(ty, raw)?.to_string()),

        // Text types, plus text-like extensions such as citext and ltree
        _ => Value::String(decode(ty, raw)?),
    };

    Ok(value)
}

/// Decode with the driver's own conversion, refusing types it does not accept
fn decode<'a, T: FromSql<'a>>(ty: &Type, raw: &'a [u8]) -> Result<T> {
    if !T::accepts(ty) {
        return Err(unconvertible(ty));
    }
    T::from_sql(ty, raw).map_err(|e| {
        GatewayError::database(format!("Failed to decode PostgreSQL type '{}': {e}", ty.name()))
    })
}

fn unconvertible(ty: &Type) -> GatewayError {
    GatewayError::database(format!("Failed to convert PostgreSQL type '{}' to JSON", ty.name()))
}

fn float_to_json(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Decode a binary NUMERIC into its decimal text; `None` for NaN and infinities
fn decode_numeric(raw: &[u8]) -> Option<String> {
    const NEGATIVE: u16 = 0x4000;
    const POSITIVE: u16 = 0x0000;

    let word = |i: usize| raw.get(i * 2..i * 2 + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));
    let ndigits = usize::from(word(0)?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = word(1)? as i16;
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    let digits: Vec<u16> = (0..ndigits).map(|i| word(4 + i)).collect::<Option<_>>()?;

    if sign != POSITIVE && sign != NEGATIVE {
        return None;
    }

    let digit_at = |pos: isize| -> u16 {
        usize::try_from(pos).ok().and_then(|p| digits.get(p).copied()).unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NEGATIVE {
        out.push('-');
    }

    let weight = isize::from(weight);
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                let _ = write!(out, "{}", digit_at(pos));
            } else {
                let _ = write!(out, "{:04}", digit_at(pos));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let groups = dscale.div_ceil(4);
        for group in 0..groups {
            let pos = weight + 1 + isize::try_from(group).ok()?;
            let _ = write!(fraction, "{:04}", digit_at(pos));
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}
