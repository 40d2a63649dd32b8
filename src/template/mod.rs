//! SQL Template Expansion
//!
//! Turns a service's SQL template into the final query text. Caller values
//! never reach the text: both modes bind exactly one positional parameter
//! (`$1`) holding the whole argument object.
//!
//! # Modes
//! - Legacy: every `:ARG` becomes `($1::jsonb)` (POST) or `($1::text)` (GET)
//! - Extended: every `:__NAME__` becomes `(($1::jsonb)->>'name')` for each
//!   declared argument `name`
//!
//! Whatever the mode, any `:__X__` token left after expansion is an error.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::config::{HttpMethod, ResponseKind};
use crate::error::{GatewayError, Result};

/// Generic macro token
static MACRO_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\B:__[_A-Z][_A-Z0-9]*__\b").expect("Invalid macro regex"));

/// Argument names usable as template keys
static IDENT_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[_A-Za-z][_A-Za-z0-9]{0,30}$").expect("Invalid identifier regex"));

/// Legacy single placeholder
static LEGACY_RX: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\B:ARG\b")
        .case_insensitive(true)
        .build()
        .expect("Invalid placeholder regex")
});

/// Validated caller arguments, keyed by argument name
pub type CallArguments = Map<String, Value>;

/// How the executor should hand back rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMode {
    /// One object per row, keyed by column name
    Objects,
    /// One positional array per row
    Arrays,
}

impl From<ResponseKind> for RowMode {
    fn from(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Value => Self::Arrays,
            ResponseKind::Table | ResponseKind::Row | ResponseKind::Void => Self::Objects,
        }
    }
}

/// Final query ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Expanded query text, referencing only `$1`
    pub text: String,

    /// Text of the single bound parameter
    pub param: String,

    pub row_mode: RowMode,
}

/// Check that an argument name is safe to splice into a pattern and into SQL
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENT_RX.is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::TemplateInvalidKey(name.to_string()))
    }
}

/// Replace each declared argument's macro with a field extraction from `$1`
///
/// Names must pass [`validate_identifier`] before they are spliced into the
/// macro pattern and the replacement text.
pub fn expand_extended<'a>(
    template: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<String> {
    let mut text = template.to_string();
    for name in names {
        validate_identifier(name)?;
        let macro_rx = Regex::new(&format!(r"\B:__{}__\b", name.to_uppercase()))
            .map_err(|e| GatewayError::internal(format!("macro pattern for '{name}': {e}")))?;
        let replacement = format!("(($1::jsonb)->>'{name}')");
        text = macro_rx.replace_all(&text, NoExpand(&replacement)).into_owned();
    }
    ensure_no_macros(&text)?;
    Ok(text)
}

/// Replace the legacy placeholder with the whole bound parameter
pub fn expand_legacy(template: &str, method: HttpMethod) -> Result<String> {
    let replacement = match method {
        HttpMethod::Post => "($1::jsonb)",
        HttpMethod::Get => "($1::text)",
    };
    let text = LEGACY_RX.replace_all(template, NoExpand(replacement)).into_owned();
    ensure_no_macros(&text)?;
    Ok(text)
}

/// Fail with every distinct macro still present, in order of appearance
pub fn ensure_no_macros(text: &str) -> Result<()> {
    let mut left: Vec<String> = Vec::new();
    for found in MACRO_RX.find_iter(text) {
        if !left.iter().any(|m| m == found.as_str()) {
            left.push(found.as_str().to_string());
        }
    }
    if left.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::TemplateUnresolvedMacro(left))
    }
}

/// Arguments as they reach the template engine
#[derive(Debug, Clone, PartialEq)]
pub enum CallPayload {
    /// Validated argument object
    Object(CallArguments),
    /// Legacy GET argument string, bound as-is
    Raw(String),
}

impl CallPayload {
    /// Text sent as the single query parameter
    pub fn to_param(&self) -> Result<String> {
        match self {
            Self::Object(arguments) => serde_json::to_string(arguments)
                .map_err(|e| GatewayError::internal(format!("Could not encode arguments: {e}"))),
            Self::Raw(raw) => Ok(raw.clone()),
        }
    }
}

/// Build the query for one request
///
/// Extended services always get an argument object; legacy GET services
/// bind the raw argument string as text.
pub fn build_query(
    template: &str,
    extended: bool,
    method: HttpMethod,
    payload: &CallPayload,
    response: ResponseKind,
) -> Result<QueryDescriptor> {
    let text = match (extended, payload) {
        (true, CallPayload::Object(arguments)) => {
            expand_extended(template, arguments.keys().map(String::as_str))?
        }
        (true, CallPayload::Raw(_)) => {
            return Err(GatewayError::arguments_malformed("object expected"));
        }
        (false, CallPayload::Object(_)) => expand_legacy(template, HttpMethod::Post)?,
        (false, CallPayload::Raw(_)) => expand_legacy(template, method)?,
    };

    Ok(QueryDescriptor { text, param: payload.to_param()?, row_mode: response.into() })
}
