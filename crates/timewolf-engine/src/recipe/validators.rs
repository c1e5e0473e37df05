//! Validation of recipe argument values.
//!
//! A [`RecipeArg`] names its validator through `format` (or
//! `validation_params.format`). Validators that accept lists honour
//! `validation_params.comma_separated`: the value is split on commas and every
//! item is validated on its own.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Timelike};
use ipnetwork::IpNetwork;
use regex::Regex;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::RecipeArg;
use crate::error::{Error, Result};

static FLAT_HOSTNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_a-z0-9]{3,64}$").expect("hostname regex is valid"));

/// Checks, and possibly converts, one argument value.
pub trait ArgValidator: Send + Sync {
    /// Name used as `format` in recipes.
    fn name(&self) -> &'static str;

    /// Whether `comma_separated` applies to this validator.
    fn comma_separable(&self) -> bool {
        true
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value>;
}

/// Maps format names to validators.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn ArgValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in validator.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [Arc<dyn ArgValidator>; 8] = [
            Arc::new(IntegerValidator),
            Arc::new(HostnameValidator),
            Arc::new(RegexValidator),
            Arc::new(UuidValidator),
            Arc::new(SubnetValidator),
            Arc::new(UrlValidator),
            Arc::new(DatetimeValidator { end_of_day: false }),
            Arc::new(DatetimeValidator { end_of_day: true }),
        ];
        for validator in builtin {
            registry
                .validators
                .insert(validator.name().to_string(), validator);
        }
        registry
    }

    /// Register a validator. Fails if its name is taken.
    pub fn register(&mut self, validator: impl ArgValidator + 'static) -> Result<()> {
        let name = validator.name();
        if self.validators.contains_key(name) {
            return Err(Error::Validator(format!(
                "validator {name} is already registered"
            )));
        }
        self.validators.insert(name.to_string(), Arc::new(validator));
        Ok(())
    }

    pub fn deregister(&mut self, name: &str) -> Result<()> {
        self.validators
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::Validator(format!("validator {name} is not registered")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate `value` for `arg`.
    ///
    /// Arguments without a validator keep the value as a string. Comma
    /// separated values come back as one string with the validated items
    /// joined by commas.
    pub fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        let Some(name) = arg.validator_name() else {
            return Ok(Value::String(value.to_string()));
        };
        let validator = self
            .validators
            .get(name)
            .ok_or_else(|| Error::Validator(format!("{name} is not a registered validator")))?;

        if !(validator.comma_separable() && param_flag(arg, "comma_separated")) {
            return validator.validate(value, arg);
        }

        let items = value
            .split(',')
            .map(str::trim)
            .map(|item| validator.validate(item, arg).map(as_text))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::String(items.join(",")))
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.names())
            .finish()
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn param_flag(arg: &RecipeArg, key: &str) -> bool {
    arg.validation_params
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn failure(arg: &RecipeArg, value: &str, validator: &str, reason: impl Into<String>) -> Error {
    Error::ArgumentValidation {
        switch: arg.switch.clone(),
        value: value.to_string(),
        validator: validator.to_string(),
        reason: reason.into(),
    }
}

/// Parses the value as an `i64`, optionally bounded by the `minimum` and
/// `maximum` parameters (inclusive).
pub struct IntegerValidator;

impl IntegerValidator {
    fn bound(arg: &RecipeArg, key: &str) -> Result<Option<i64>> {
        match arg.validation_params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::Validator(format!("{key} must be an integer, got {v}"))),
        }
    }
}

impl ArgValidator for IntegerValidator {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn comma_separable(&self) -> bool {
        false
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        let parsed: i64 = value
            .trim()
            .parse()
            .map_err(|_| failure(arg, value, self.name(), "Not a valid integer"))?;

        if let Some(minimum) = Self::bound(arg, "minimum")?
            && parsed < minimum
        {
            return Err(failure(arg, value, self.name(), format!("must be at least {minimum}")));
        }
        if let Some(maximum) = Self::bound(arg, "maximum")?
            && parsed > maximum
        {
            return Err(failure(arg, value, self.name(), format!("must be at most {maximum}")));
        }
        Ok(Value::from(parsed))
    }
}

/// Accepts FQDNs, and flat names like `localhost` unless `fqdn_only` is set.
pub struct HostnameValidator;

impl HostnameValidator {
    fn is_fqdn(value: &str) -> bool {
        if !(4..=253).contains(&value.len()) {
            return false;
        }
        let labels: Vec<&str> = value.split('.').collect();
        let Some((tld, rest)) = labels.split_last() else {
            return false;
        };
        if rest.is_empty() {
            return false;
        }
        let tld_ok = (2..=63).contains(&tld.len()) && tld.chars().all(|c| c.is_ascii_alphabetic());
        tld_ok
            && rest.iter().all(|label| {
                (1..=63).contains(&label.len())
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
    }
}

impl ArgValidator for HostnameValidator {
    fn name(&self) -> &'static str {
        "hostname"
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        let flat_allowed = !param_flag(arg, "fqdn_only");
        if Self::is_fqdn(value) || (flat_allowed && FLAT_HOSTNAME_REGEX.is_match(value)) {
            return Ok(Value::String(value.to_string()));
        }
        Err(failure(arg, value, self.name(), "Not a valid hostname"))
    }
}

/// Requires the value to match the `regex` parameter from its start.
pub struct RegexValidator;

impl RegexValidator {
    fn check(&self, expression: &str, value: &str, arg: &RecipeArg) -> Result<Value> {
        let regex = Regex::new(&format!("^(?:{expression})"))
            .map_err(|e| Error::Validator(format!("invalid regex /{expression}/: {e}")))?;
        if regex.is_match(value) {
            Ok(Value::String(value.to_string()))
        } else {
            Err(failure(
                arg,
                value,
                self.name(),
                format!("does not match regex /{expression}/"),
            ))
        }
    }
}

impl ArgValidator for RegexValidator {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        let expression = arg
            .validation_params
            .get("regex")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validator("Missing validator parameter: regex".to_string()))?;
        self.check(expression, value, arg)
    }
}

/// Lowercase, hyphenated UUIDs only.
pub struct UuidValidator;

impl ArgValidator for UuidValidator {
    fn name(&self) -> &'static str {
        "uuid"
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        match Uuid::parse_str(value) {
            Ok(uuid) if uuid.hyphenated().to_string() == value => {
                Ok(Value::String(value.to_string()))
            }
            _ => Err(failure(arg, value, self.name(), "Not a valid UUID")),
        }
    }
}

/// IPv4 or IPv6 networks in CIDR notation, host bits unset. A bare address
/// is a single-host network.
pub struct SubnetValidator;

impl ArgValidator for SubnetValidator {
    fn name(&self) -> &'static str {
        "subnet"
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        match IpNetwork::from_str(value) {
            Ok(network) if network.ip() == network.network() => {
                Ok(Value::String(value.to_string()))
            }
            Ok(_) => Err(failure(arg, value, self.name(), "has host bits set")),
            Err(_) => Err(failure(arg, value, self.name(), "Not a valid subnet")),
        }
    }
}

/// Absolute URLs with a scheme and a host.
pub struct UrlValidator;

impl ArgValidator for UrlValidator {
    fn name(&self) -> &'static str {
        "url"
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        match Url::parse(value) {
            Ok(url) if url.host_str().is_some_and(|host| !host.is_empty()) => {
                Ok(Value::String(value.to_string()))
            }
            _ => Err(failure(arg, value, self.name(), "Not a valid URL")),
        }
    }
}

/// ISO 8601 dates and times, UTC when no offset is given.
///
/// Optional `before` and `after` parameters bound the value (exclusive). The
/// `datetime_end` variant moves a bare midnight to 23:59:59. Values come back
/// in RFC 3339 form.
pub struct DatetimeValidator {
    end_of_day: bool,
}

impl DatetimeValidator {
    fn bound(arg: &RecipeArg, key: &str) -> Result<Option<DateTime<FixedOffset>>> {
        match arg.validation_params.get(key).and_then(Value::as_str) {
            None | Some("") => Ok(None),
            Some(raw) => parse_datetime(raw)
                .map(Some)
                .ok_or_else(|| Error::Validator(format!("Error in order comparison: {raw} is not a datetime"))),
        }
    }
}

impl ArgValidator for DatetimeValidator {
    fn name(&self) -> &'static str {
        if self.end_of_day {
            "datetime_end"
        } else {
            "datetime"
        }
    }

    fn comma_separable(&self) -> bool {
        false
    }

    fn validate(&self, value: &str, arg: &RecipeArg) -> Result<Value> {
        let mut parsed = parse_datetime(value)
            .ok_or_else(|| failure(arg, value, self.name(), "is not a valid datetime"))?;

        if let Some(before) = Self::bound(arg, "before")?
            && parsed >= before
        {
            return Err(failure(
                arg,
                value,
                self.name(),
                format!("{before} is after {parsed} but it should be the other way around"),
            ));
        }
        if let Some(after) = Self::bound(arg, "after")?
            && parsed <= after
        {
            return Err(failure(
                arg,
                value,
                self.name(),
                format!("{parsed} is before {after} but it should be the other way around"),
            ));
        }

        if self.end_of_day && (parsed.hour(), parsed.minute(), parsed.second()) == (0, 0, 0) {
            parsed = parsed
                .with_hour(23)
                .and_then(|dt| dt.with_minute(59))
                .and_then(|dt| dt.with_second(59))
                .unwrap_or(parsed);
        }
        Ok(Value::String(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    }
}

fn parse_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}
