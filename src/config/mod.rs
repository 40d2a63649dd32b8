//! Configuration Management
//!
//! This module loads the gateway settings and the per-service resources.
//!
//! # Layout
//! All paths are resolved against the gateway home directory:
//! - `services/<name>.config.json` - one [`ServiceConfig`] per service
//! - `services/<settings.query>` - the SQL template of a service
//! - `config/db.connection.config` - optional connection string
//! - `config/logger.sql.config` - optional audit statement
//! - `config/gateway.json` - optional [`GatewayConfig`] overrides, always read
//!   from `<home>/config` since it is the file that can move `config_dir`
//!
//! # Load-time validation
//! A service configuration is checked completely when it is loaded: argument
//! names, patterns, default and constant types, the allowlist and, for
//! extended-syntax services, the template itself. Requests never see a
//! half-valid service.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};
use crate::guard::IpRule;
use crate::template;

/// Suffix of service configuration files
pub const CONFIG_SUFFIX: &str = ".config.json";

/// Connection string resource inside the config directory
pub const CONNECTION_FILENAME: &str = "db.connection.config";

/// Audit statement resource inside the config directory
pub const AUDIT_FILENAME: &str = "logger.sql.config";

/// Gateway settings resource inside the config directory
pub const GATEWAY_FILENAME: &str = "gateway.json";

/// Default listening port
pub const DEFAULT_PORT: u16 = 880;

/// HTTP verbs a service can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// Upper-case verb as it appears on the wire
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Self::Get)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Self::Post)
        } else {
            Err(GatewayError::config_malformed(format!("unsupported method '{s}'")))
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared shape of a successful result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Every row, as objects
    Table,
    /// First row as an object, or null
    Row,
    /// First column of the first row, or null
    Value,
    /// Always null
    Void,
}

/// Declared argument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    Number,
    Boolean,
    Text,
}

impl ArgumentType {
    /// Check the runtime JSON type of a value against the declared type
    #[must_use]
    pub const fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Text, Value::String(_))
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Text => "text",
        }
    }
}

/// Case-insensitive, fully anchored pattern for text arguments
#[derive(Debug, Clone)]
pub struct ArgumentPattern {
    source: String,
    regex: Regex,
}

impl ArgumentPattern {
    /// Compile a pattern; the whole value must match it
    pub fn new(source: &str) -> Result<Self> {
        let regex = RegexBuilder::new(&format!("^(?:{source})$"))
            .case_insensitive(true)
            .build()
            .map_err(|e| GatewayError::config_malformed(format!("invalid pattern '{source}': {e}")))?;
        Ok(Self { source: source.to_string(), regex })
    }

    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl<'de> Deserialize<'de> for ArgumentPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Schema entry for one argument
#[derive(Debug, Clone, Deserialize)]
pub struct ArgumentSpec {
    /// Declared type
    #[serde(rename = "type")]
    pub kind: ArgumentType,

    /// Pattern constraint (text only)
    #[serde(default)]
    pub pattern: Option<ArgumentPattern>,

    /// Value injected when the caller omits the argument
    #[serde(default)]
    pub default: Option<Value>,

    /// Fixed value; the caller may never supply it
    #[serde(default)]
    pub constant: Option<Value>,
}

impl ArgumentSpec {
    fn validate(&self, name: &str) -> Result<()> {
        if self.pattern.is_some() && self.kind != ArgumentType::Text {
            return Err(GatewayError::config_malformed(format!(
                "argument '{name}': pattern requires type text, found {}",
                self.kind.as_str()
            )));
        }
        for (label, value) in [("default", &self.default), ("constant", &self.constant)] {
            if let Some(value) = value {
                if !self.kind.accepts(value) {
                    return Err(GatewayError::config_malformed(format!(
                        "argument '{name}': {label} is not a {}",
                        self.kind.as_str()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Ordered argument schema of a service
///
/// Declaration order is kept so validation reports the first failing
/// argument in the order the operator wrote them.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    entries: Vec<(String, ArgumentSpec)>,
}

impl ArgumentSchema {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgumentSpec> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, spec)| spec)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgumentSpec)> {
        self.entries.iter().map(|(key, spec)| (key.as_str(), spec))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for ArgumentSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = ArgumentSchema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of argument name to argument definition")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<ArgumentSchema, A::Error> {
                let mut entries: Vec<(String, ArgumentSpec)> = Vec::new();
                while let Some((name, spec)) = map.next_entry::<String, ArgumentSpec>()? {
                    if entries.iter().any(|(existing, _)| *existing == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate argument '{name}'"
                        )));
                    }
                    entries.push((name, spec));
                }
                Ok(ArgumentSchema { entries })
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// Access-control and execution settings of a service
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Accepted HTTP method (any of GET/POST when absent)
    #[serde(default)]
    pub method: Option<HttpMethod>,

    /// Expected bearer credential
    pub token: String,

    /// Caller IP allowlist; at least one entry must match when present
    #[serde(default)]
    pub iplist: Option<Vec<IpRule>>,

    /// SQL template file, relative to the services directory
    pub query: String,

    /// Shape of a successful response
    pub response: ResponseKind,

    /// Per-argument `:__NAME__` macros instead of the single `:ARG` placeholder
    #[serde(default)]
    pub extsyntax: bool,
}

/// Complete configuration of one service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub settings: Settings,

    #[serde(default)]
    pub arguments: ArgumentSchema,
}

impl ServiceConfig {
    /// Parse and validate a service configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| GatewayError::config_malformed(format!("invalid service config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.settings.token.is_empty() {
            return Err(GatewayError::config_malformed("settings.token must not be empty"));
        }
        if !is_plain_relative(&self.settings.query) {
            return Err(GatewayError::config_malformed(format!(
                "settings.query '{}' must be a relative path inside the services directory",
                self.settings.query
            )));
        }
        for (name, spec) in self.arguments.iter() {
            template::validate_identifier(name)?;
            spec.validate(name)?;
        }
        Ok(())
    }
}

fn is_plain_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// HTTP status policy for failure responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    /// Every failure answers 404, whatever its kind
    #[default]
    Uniform,
    /// Status follows the failure kind (401, 403, 400, 503, ...)
    Differentiated,
}

/// Gateway-wide settings
///
/// Relative paths are resolved against `home`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base directory for every resource
    pub home: PathBuf,

    /// Service configurations and SQL templates
    pub services_dir: PathBuf,

    /// Shared resources (connection string, audit statement)
    ///
    /// Does not move `gateway.json` itself.
    pub config_dir: PathBuf,

    /// Append-only diagnostic log for database and internal failures
    pub error_log: PathBuf,

    /// Listening address
    pub bind_host: String,

    /// Listening port
    pub port: u16,

    /// Failure status policy
    pub failure_status: FailureStatus,

    /// Replace database/internal failure detail with a generic message
    pub mask_internal_errors: bool,

    /// Accept `Authorization: Bearer <token>` as well as the bare token
    pub strip_bearer_prefix: bool,

    /// Load and validate every service at startup and serve from memory
    pub preload_services: bool,

    /// Largest POST body accepted, in bytes
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("."),
            services_dir: PathBuf::from("services"),
            config_dir: PathBuf::from("config"),
            error_log: PathBuf::from("log/errors.log"),
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            failure_status: FailureStatus::Uniform,
            mask_internal_errors: true,
            strip_bearer_prefix: true,
            preload_services: false,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Load settings for a home directory
    ///
    /// Reads `<home>/config/gateway.json` when it exists; every field is
    /// optional and falls back to its default. The file location is fixed:
    /// a `config_dir` set inside it applies to the other shared resources.
    pub fn load(home: &Path) -> Result<Self> {
        let path = Self::settings_path(home);
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                GatewayError::config_missing(format!("Could not read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<Self>(&contents).map_err(|e| {
                GatewayError::config_malformed(format!("Invalid {GATEWAY_FILENAME}: {e}"))
            })?
        } else {
            Self::default()
        };
        config.home = home.to_path_buf();
        Ok(config)
    }

    /// Location of the settings file for a home directory
    #[must_use]
    pub fn settings_path(home: &Path) -> PathBuf {
        home.join("config").join(GATEWAY_FILENAME)
    }

    #[must_use]
    pub fn services_path(&self) -> PathBuf {
        self.home.join(&self.services_dir)
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.home.join(&self.config_dir)
    }

    #[must_use]
    pub fn error_log_path(&self) -> PathBuf {
        self.home.join(&self.error_log)
    }
}

/// A validated service together with its SQL template
#[derive(Debug, Clone)]
pub struct LoadedService {
    pub name: String,
    pub config: ServiceConfig,
    pub template: String,
}

impl LoadedService {
    /// Assemble a service, checking extended templates against the schema
    pub fn new(name: impl Into<String>, config: ServiceConfig, template: String) -> Result<Self> {
        if config.settings.extsyntax {
            template::expand_extended(&template, config.arguments.names())?;
        }
        Ok(Self { name: name.into(), config, template })
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.config.settings
    }

    #[must_use]
    pub const fn arguments(&self) -> &ArgumentSchema {
        &self.config.arguments
    }
}

/// Everything read at startup when preloading is enabled
#[derive(Debug, Default)]
struct Catalog {
    services: HashMap<String, Arc<LoadedService>>,
    audit_sql: Option<String>,
}

/// Reads service and shared resources from disk, or from a preloaded catalog
#[derive(Debug)]
pub struct ConfigLoader {
    services_dir: PathBuf,
    config_dir: PathBuf,
    catalog: Option<Catalog>,
}

impl ConfigLoader {
    /// Loader reading fresh from disk on every request
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self::from_dirs(config.services_path(), config.config_path())
    }

    #[must_use]
    pub const fn from_dirs(services_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self { services_dir, config_dir, catalog: None }
    }

    /// Load every service now and serve from memory afterwards
    ///
    /// Any invalid service aborts the preload.
    pub async fn preload(mut self) -> Result<Self> {
        let mut catalog = Catalog::default();
        let mut entries = tokio::fs::read_dir(&self.services_dir).await.map_err(|e| {
            GatewayError::config_missing(format!(
                "Could not read services directory {}: {e}",
                self.services_dir.display()
            ))
        })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::internal(format!("Could not list services: {e}")))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(CONFIG_SUFFIX)) else {
                continue;
            };
            let service = self.read_service(name).await?;
            debug!(service = name, "preloaded service");
            catalog.services.insert(name.to_string(), Arc::new(service));
        }

        catalog.audit_sql = self.read_audit_sql().await?;
        info!(services = catalog.services.len(), "service catalog preloaded");
        self.catalog = Some(catalog);
        Ok(self)
    }

    /// Whether a configuration resource exists for the service name
    pub async fn service_exists(&self, name: &str) -> bool {
        match &self.catalog {
            Some(catalog) => catalog.services.contains_key(name),
            None => tokio::fs::try_exists(self.service_path(name)).await.unwrap_or(false),
        }
    }

    /// Load and validate one service
    pub async fn load_service(&self, name: &str) -> Result<Arc<LoadedService>> {
        match &self.catalog {
            Some(catalog) => catalog
                .services
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::config_missing(format!("service '{name}' not loaded"))),
            None => self.read_service(name).await.map(Arc::new),
        }
    }

    /// Audit statement, when configured
    pub async fn audit_sql(&self) -> Result<Option<String>> {
        match &self.catalog {
            Some(catalog) => Ok(catalog.audit_sql.clone()),
            None => self.read_audit_sql().await,
        }
    }

    /// Connection string, when configured
    ///
    /// Read once at startup; absence means the ambient `PG*` environment.
    pub fn connection_string(&self) -> Result<Option<String>> {
        let path = self.config_dir.join(CONNECTION_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            GatewayError::config_missing(format!("Could not read {CONNECTION_FILENAME}: {e}"))
        })?;
        Ok(Some(contents.trim().to_string()))
    }

    fn service_path(&self, name: &str) -> PathBuf {
        self.services_dir.join(format!("{name}{CONFIG_SUFFIX}"))
    }

    async fn read_service(&self, name: &str) -> Result<LoadedService> {
        let path = self.service_path(name);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            GatewayError::config_missing(format!("Could not read {}: {e}", path.display()))
        })?;
        let config = ServiceConfig::from_json(&text)?;

        let template_path = self.services_dir.join(&config.settings.query);
        let template = tokio::fs::read_to_string(&template_path).await.map_err(|e| {
            GatewayError::config_missing(format!(
                "Could not read query template {}: {e}",
                template_path.display()
            ))
        })?;

        LoadedService::new(name, config, template)
    }

    async fn read_audit_sql(&self) -> Result<Option<String>> {
        let path = self.config_dir.join(AUDIT_FILENAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(sql) => Ok(Some(sql)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::internal(format!("Could not read {AUDIT_FILENAME}: {e}"))),
        }
    }
}
