//! Argument Validation
//!
//! Checks caller arguments against a service's schema and fills in defaults
//! and constants. On success the returned map has exactly the schema's keys.
//!
//! # Order of checks
//! Schema keys are scanned first, in declaration order:
//! 1. missing key: `default`, else `constant`, else `missing:<name>`
//! 2. supplied constant: `constant override:<name>`
//! 3. JSON type: `type mismatch:<name>`
//! 4. text pattern: `pattern mismatch:<name>`
//!
//! Then caller keys are scanned for anything undeclared: `unexpected:<name>`.
//! The first violation found is reported.

use serde_json::Value;

use crate::config::ArgumentSchema;
use crate::error::{GatewayError, Result};
use crate::template::CallArguments;

/// Validate caller arguments and inject defaults and constants
pub fn validate_arguments(
    supplied: CallArguments,
    schema: &ArgumentSchema,
) -> Result<CallArguments> {
    let mut arguments = supplied;

    for (name, spec) in schema.iter() {
        let Some(value) = arguments.get(name) else {
            let injected = spec
                .default
                .as_ref()
                .or(spec.constant.as_ref())
                .ok_or_else(|| GatewayError::ArgumentMissing(name.to_string()))?;
            arguments.insert(name.to_string(), injected.clone());
            continue;
        };

        if spec.constant.is_some() {
            return Err(GatewayError::ArgumentConstantOverride(name.to_string()));
        }

        if !spec.kind.accepts(value) {
            return Err(GatewayError::ArgumentTypeMismatch(name.to_string()));
        }

        if let (Some(pattern), Value::String(text)) = (&spec.pattern, value) {
            if !pattern.is_match(text) {
                return Err(GatewayError::ArgumentPatternMismatch(name.to_string()));
            }
        }
    }

    if let Some(extra) = arguments.keys().find(|key| !schema.contains(key)) {
        return Err(GatewayError::ArgumentUnexpected(extra.clone()));
    }

    Ok(arguments)
}

/// Parse a POST body into an argument object
///
/// The body must be a JSON object; an empty body counts as `{}`.
pub fn parse_body(body: &[u8]) -> Result<CallArguments> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CallArguments::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::arguments_malformed("object expected")),
        Err(_) => Err(GatewayError::arguments_malformed("invalid JSON")),
    }
}
