//! cnpg schema: the closed catalog of operations and one validation path for all of them.
//!
//! Every operation declares its parameters statically ([`OpSpec`]). An argument
//! bag is checked against that declaration before anything touches the network:
//! unknown keys, missing required keys, wrong types and malformed values are all
//! reported together as a single `Validation` error.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use cnpg_core::{CnpgError, CnpgResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as Json};

mod catalog;

pub use catalog::{lookup, CATALOG};

/// What an operation does to the API server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpClass {
    /// Passthrough queries, no mutation.
    Read,
    /// Compile a new document and submit it.
    Create,
    /// Fetch, patch and replace an existing document.
    Update,
    Delete,
}

/// A regular expression with a human hint shown on mismatch.
#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub regex: &'static str,
    pub hint: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub enum ParamType {
    /// RFC 1123 label: lower-case alphanumerics and '-', at most 63 chars.
    Name,
    String,
    Integer { min: i64, max: i64 },
    Boolean,
    StringList,
    /// List of `key=value` strings.
    KeyValueList,
    Enum(&'static [&'static str]),
    Pattern(Pattern),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub description: &'static str,
}

/// Cross-parameter rules, checked after per-parameter validation.
#[derive(Debug, Clone, Copy)]
pub enum Constraint {
    AtMostOne(&'static [&'static str]),
    ExactlyOne(&'static [&'static str]),
    AtLeastOne(&'static [&'static str]),
    /// The first parameter is only meaningful together with the second.
    Requires(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub name: &'static str,
    pub class: OpClass,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub constraints: &'static [Constraint],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub param: String,
    pub error: String,
    pub hint: Option<String>,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.param.is_empty() { write!(f, "{}", self.error)? } else { write!(f, "'{}': {}", self.param, self.error)? }
        if let Some(h) = &self.hint { write!(f, " ({})", h)?; }
        Ok(())
    }
}

fn issue(param: &str, error: impl Into<String>, hint: Option<&str>) -> ValidationIssue {
    ValidationIssue { param: param.to_string(), error: error.into(), hint: hint.map(|h| h.to_string()) }
}

pub(crate) fn is_dns_label(s: &str) -> bool {
    let b = s.as_bytes();
    !b.is_empty()
        && b.len() <= 63
        && b.iter().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == b'-')
        && b[0] != b'-'
        && b[b.len() - 1] != b'-'
}

impl ParamType {
    /// Check one value and return its normalized form.
    fn check(&self, param: &str, raw: &Json) -> Result<Json, ValidationIssue> {
        match self {
            ParamType::Name => {
                let s = as_text(param, raw)?;
                if is_dns_label(&s) { Ok(Json::String(s)) } else {
                    Err(issue(param, format!("'{}' is not a valid name", s), Some("lower-case letters, digits and '-', at most 63 characters")))
                }
            }
            ParamType::String => {
                let s = as_text(param, raw)?;
                if s.trim().is_empty() { Err(issue(param, "must not be empty", None)) } else { Ok(Json::String(s)) }
            }
            ParamType::Integer { min, max } => {
                let n = match raw {
                    Json::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                    Json::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| issue(param, format!("expected an integer, got {}", raw), None))?;
                if n < *min || n > *max {
                    return Err(issue(param, format!("{} is out of range", n), Some(format!("between {} and {}", min, max).as_str())));
                }
                Ok(Json::from(n))
            }
            ParamType::Boolean => match raw {
                Json::Bool(b) => Ok(Json::Bool(*b)),
                Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(Json::Bool(true)),
                Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(Json::Bool(false)),
                other => Err(issue(param, format!("expected a boolean, got {}", other), None)),
            },
            ParamType::StringList => Ok(Json::Array(as_list(param, raw)?.into_iter().map(Json::String).collect())),
            ParamType::KeyValueList => {
                let items = as_list(param, raw)?;
                for item in &items {
                    match item.split_once('=') {
                        Some((k, _)) if !k.trim().is_empty() => {}
                        _ => return Err(issue(param, format!("'{}' is not a key=value pair", item), Some("e.g. max_connections=200"))),
                    }
                }
                Ok(Json::Array(items.into_iter().map(Json::String).collect()))
            }
            ParamType::Enum(allowed) => {
                let s = as_text(param, raw)?;
                if allowed.contains(&s.as_str()) { Ok(Json::String(s)) } else {
                    Err(issue(param, format!("'{}' is not allowed", s), Some(format!("one of: {}", allowed.join(", ")).as_str())))
                }
            }
            ParamType::Pattern(p) => {
                let s = as_text(param, raw)?;
                let re = compiled(p.regex).map_err(|e| issue(param, format!("bad pattern: {}", e), None))?;
                if re.is_match(&s) { Ok(Json::String(s)) } else { Err(issue(param, format!("'{}' is malformed", s), Some(p.hint))) }
            }
        }
    }

    fn json_schema(&self) -> Json {
        match self {
            ParamType::Name => serde_json::json!({"type": "string", "pattern": "^[a-z0-9]([-a-z0-9]*[a-z0-9])?$", "maxLength": 63}),
            ParamType::String => serde_json::json!({"type": "string", "minLength": 1}),
            ParamType::Integer { min, max } => serde_json::json!({"type": "integer", "minimum": min, "maximum": max}),
            ParamType::Boolean => serde_json::json!({"type": "boolean"}),
            ParamType::StringList => serde_json::json!({"type": "array", "minItems": 1, "items": {"type": "string"}}),
            ParamType::KeyValueList => serde_json::json!({"type": "array", "minItems": 1, "items": {"type": "string", "pattern": "^[^=]+=.*$"}}),
            ParamType::Enum(allowed) => serde_json::json!({"type": "string", "enum": allowed}),
            ParamType::Pattern(p) => serde_json::json!({"type": "string", "pattern": p.regex}),
        }
    }
}

fn as_text(param: &str, raw: &Json) -> Result<String, ValidationIssue> {
    match raw {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(n.to_string()),
        other => Err(issue(param, format!("expected a string, got {}", other), None)),
    }
}

/// Catalog patterns, compiled on first use.
static COMPILED: Lazy<Mutex<HashMap<&'static str, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn compiled(source: &'static str) -> Result<Regex, regex::Error> {
    let mut cache = COMPILED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(re) = cache.get(source) {
        return Ok(re.clone());
    }
    let re = Regex::new(source)?;
    cache.insert(source, re.clone());
    Ok(re)
}

fn as_list(param: &str, raw: &Json) -> Result<Vec<String>, ValidationIssue> {
    if matches!(raw, Json::Array(items) if items.is_empty()) {
        return Err(issue(param, "must not be empty", Some("omit the argument instead of passing []")));
    }
    match raw {
        Json::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()).ok_or_else(|| issue(param, format!("expected strings, got {}", v), None)))
            .collect(),
        // A lone string is a one-element list.
        Json::String(s) => Ok(vec![s.clone()]),
        other => Err(issue(param, format!("expected a list of strings, got {}", other), None)),
    }
}

impl OpSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate an argument bag and return the normalized arguments.
    pub fn validate(&self, bag: &Map<String, Json>) -> CnpgResult<Args> {
        let issues = self.issues(bag);
        if !issues.is_empty() {
            let msg = issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ");
            tracing::debug!(op = self.name, issues = issues.len(), "argument validation failed");
            return Err(CnpgError::Validation(format!("{}: {}", self.name, msg)));
        }
        let mut values = Map::new();
        for p in self.params {
            if let Some(raw) = bag.get(p.name).filter(|v| !v.is_null()) {
                if let Ok(v) = p.ty.check(p.name, raw) {
                    values.insert(p.name.to_string(), v);
                }
            }
        }
        Ok(Args { values })
    }

    /// All problems with a bag; empty when it is valid.
    pub fn issues(&self, bag: &Map<String, Json>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for key in bag.keys() {
            if self.param(key).is_none() {
                let known: Vec<_> = self.params.iter().map(|p| p.name).collect();
                out.push(issue(key, "unknown argument", Some(format!("accepted: {}", known.join(", ")).as_str())));
            }
        }
        // Null counts as absent.
        let present = |name: &str| bag.get(name).map(|v| !v.is_null()).unwrap_or(false);
        for p in self.params {
            match bag.get(p.name).filter(|v| !v.is_null()) {
                Some(raw) => {
                    if let Err(e) = p.ty.check(p.name, raw) { out.push(e); }
                }
                None if p.required => out.push(issue(p.name, "missing required argument", Some(p.description))),
                None => {}
            }
        }
        for c in self.constraints {
            match c {
                Constraint::AtMostOne(names) if names.iter().filter(|n| present(n)).count() > 1 => {
                    out.push(issue("", format!("at most one of {} may be given", names.join(", ")), None));
                }
                Constraint::ExactlyOne(names) if names.iter().filter(|n| present(n)).count() != 1 => {
                    out.push(issue("", format!("exactly one of {} must be given", names.join(", ")), None));
                }
                Constraint::AtLeastOne(names) if !names.iter().any(|n| present(n)) => {
                    out.push(issue("", format!("at least one of {} must be given", names.join(", ")), None));
                }
                Constraint::Requires(a, b) if present(a) && !present(b) => {
                    out.push(issue(a, format!("requires '{}'", b), None));
                }
                _ => {}
            }
        }
        out
    }

    /// JSON Schema for the argument object, as advertised to agents.
    pub fn input_schema(&self) -> Json {
        let mut props = Map::new();
        for p in self.params {
            let mut s = p.ty.json_schema();
            if let Some(obj) = s.as_object_mut() {
                obj.insert("description".into(), Json::String(p.description.to_string()));
            }
            props.insert(p.name.to_string(), s);
        }
        let required: Vec<&str> = self.params.iter().filter(|p| p.required).map(|p| p.name).collect();
        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Validated, normalized arguments for one intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Map<String, Json>,
}

impl Args {
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn str(&self, key: &str) -> CnpgResult<&str> {
        self.opt_str(key).ok_or_else(|| CnpgError::Validation(format!("missing required argument '{}'", key)))
    }

    pub fn opt_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn int(&self, key: &str) -> CnpgResult<i64> {
        self.opt_int(key).ok_or_else(|| CnpgError::Validation(format!("missing required argument '{}'", key)))
    }

    pub fn opt_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn bool(&self, key: &str) -> CnpgResult<bool> {
        self.opt_bool(key).ok_or_else(|| CnpgError::Validation(format!("missing required argument '{}'", key)))
    }

    /// String list, empty when absent.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default()
    }

    /// `key=value` list as a map of string values; later duplicates win.
    pub fn key_values(&self, key: &str) -> Map<String, Json> {
        let mut out = Map::new();
        for item in self.list(key) {
            if let Some((k, v)) = item.split_once('=') {
                out.insert(k.trim().to_string(), Json::String(v.trim().to_string()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(v: Json) -> Map<String, Json> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn scale_requires_instances_and_rejects_unknown_keys() {
        let op = lookup("scale_cluster").expect("catalog entry");
        let err = op.validate(&bag(json!({"name": "prod", "namespace": "db", "replicas": 5}))).unwrap_err();
        let msg = err.to_string();
        assert_eq!(err.kind(), cnpg_core::ErrorKind::Validation);
        assert!(msg.contains("'replicas': unknown argument"), "{}", msg);
        assert!(msg.contains("'instances': missing required argument"), "{}", msg);
    }

    #[test]
    fn integers_accept_numeric_strings_and_enforce_bounds() {
        let op = lookup("scale_cluster").unwrap();
        let args = op.validate(&bag(json!({"name": "prod", "namespace": "db", "instances": "5"}))).unwrap();
        assert_eq!(args.int("instances").unwrap(), 5);
        let err = op.validate(&bag(json!({"name": "prod", "namespace": "db", "instances": 0}))).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
    }

    #[test]
    fn names_must_be_dns_labels() {
        let op = lookup("pause_cluster").unwrap();
        let err = op.validate(&bag(json!({"name": "Prod_DB", "namespace": "db"}))).unwrap_err();
        assert!(err.to_string().contains("not a valid name"), "{}", err);
        assert!(is_dns_label("prod-1"));
        assert!(!is_dns_label("-prod"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn null_optional_is_treated_as_absent() {
        let op = lookup("create_backup").unwrap();
        let args = op.validate(&bag(json!({"clusterName": "prod", "namespace": "db", "backupName": null}))).unwrap();
        assert!(!args.has("backupName"));
    }

    #[test]
    fn exactly_one_constraint() {
        let op = lookup("upgrade_cluster").unwrap();
        assert!(op.validate(&bag(json!({"name": "prod", "namespace": "db"}))).is_err());
        assert!(op.validate(&bag(json!({"name": "prod", "namespace": "db", "postgresVersion": "16", "imageName": "x:16"}))).is_err());
        assert!(op.validate(&bag(json!({"name": "prod", "namespace": "db", "postgresVersion": "16.4"}))).is_ok());
    }

    #[test]
    fn key_value_lists_normalize() {
        let op = lookup("update_parameters").unwrap();
        let args = op
            .validate(&bag(json!({"name": "prod", "namespace": "db", "parameters": ["max_connections = 200", "work_mem=64MB"]})))
            .unwrap();
        let kv = args.key_values("parameters");
        assert_eq!(kv["max_connections"], "200");
        assert_eq!(kv["work_mem"], "64MB");
        let err = op.validate(&bag(json!({"name": "prod", "namespace": "db", "parameters": ["oops"]}))).unwrap_err();
        assert!(err.to_string().contains("not a key=value pair"));
    }

    #[test]
    fn empty_lists_are_not_arguments() {
        let op = lookup("update_parameters").unwrap();
        let err = op.validate(&bag(json!({"name": "prod", "namespace": "db", "parameters": []}))).unwrap_err();
        assert!(err.to_string().contains("'parameters': must not be empty"), "{}", err);
        let op = lookup("configure_pooler").unwrap();
        assert!(op.validate(&bag(json!({"name": "p", "namespace": "db", "parameters": []}))).is_err());
        assert!(op.validate(&bag(json!({"name": "p", "namespace": "db", "parameters": ["max_client_conn=100"]}))).is_ok());
    }

    #[test]
    fn patterns_compile_once() {
        let source = "^only-here-[0-9]+$";
        assert!(!COMPILED.lock().unwrap().contains_key(source));
        assert!(compiled(source).unwrap().is_match("only-here-1"));
        assert!(COMPILED.lock().unwrap().contains_key(source));
        assert!(!compiled(source).unwrap().is_match("elsewhere"));
        assert!(compiled("(").is_err());
    }

    #[test]
    fn enum_and_pattern_hints() {
        let op = lookup("create_pooler").unwrap();
        let err = op.validate(&bag(json!({"clusterName": "prod", "namespace": "db", "poolMode": "statement"}))).unwrap_err();
        assert!(err.to_string().contains("one of: session, transaction"), "{}", err);
        let op = lookup("create_scheduled_backup").unwrap();
        let err = op
            .validate(&bag(json!({"name": "nightly", "namespace": "db", "clusterName": "prod", "schedule": "0 0 * * *", "backupRetentionPolicy": "30x"})))
            .unwrap_err();
        assert!(err.to_string().contains("backupRetentionPolicy"), "{}", err);
    }

    #[test]
    fn input_schema_lists_required_params() {
        let op = lookup("create_scheduled_backup").unwrap();
        let s = op.input_schema();
        assert_eq!(s["additionalProperties"], false);
        let req: Vec<&str> = s["required"].as_array().unwrap().iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(req, vec!["name", "namespace", "clusterName", "schedule"]);
        assert_eq!(s["properties"]["suspend"]["type"], "boolean");
    }
}
