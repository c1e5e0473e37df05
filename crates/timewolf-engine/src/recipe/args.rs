//! `@token` placeholder substitution in recipe arguments.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("placeholder regex is valid"));

/// Substitute placeholders in `value` from `args`, then from `config`.
///
/// A string made of exactly one known placeholder takes the argument's value
/// as is, so numbers, booleans, lists and null keep their type. Known
/// placeholders embedded in a longer string are interpolated; a null
/// argument interpolates as an empty string. Unknown placeholders are left
/// untouched for [`check_placeholders`] to report.
pub fn resolve_args(value: &Value, args: &Map<String, Value>, config: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => resolve_string(s, args, config),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_args(item, args, config))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_args(v, args, config)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup<'a>(token: &str, args: &'a Map<String, Value>, config: &'a Map<String, Value>) -> Option<&'a Value> {
    args.get(token).or_else(|| config.get(token))
}

fn resolve_string(s: &str, args: &Map<String, Value>, config: &Map<String, Value>) -> Value {
    if let Some(caps) = TOKEN_REGEX.captures(s)
        && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len())
        && let Some(value) = lookup(&caps[1], args, config)
    {
        return value.clone();
    }

    let replaced = TOKEN_REGEX.replace_all(s, |caps: &Captures<'_>| {
        match lookup(&caps[1], args, config) {
            Some(Value::String(v)) => v.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

/// Fail if any string inside `value` still holds a placeholder.
pub fn check_placeholders(value: &Value) -> Result<()> {
    match value {
        Value::String(s) if TOKEN_REGEX.is_match(s) => Err(Error::config(format!(
            "{s} must be replaced in dictionary"
        ))),
        Value::Array(items) => items.iter().try_for_each(check_placeholders),
        Value::Object(map) => map.values().try_for_each(check_placeholders),
        _ => Ok(()),
    }
}
