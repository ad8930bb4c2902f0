//! Template helpers for compose manifests.
//!
//! MiniJinja's builtins cover the Jinja basics (`default`, `upper`, `join`,
//! `indent`, `tojson`, ...). The helpers here add what compose templates
//! commonly reach for: quoting, encoding, YAML embedding and hashing.

use base64::Engine as _;
use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, Value};
use sha2::{Digest, Sha256};

/// Registers every helper on an environment.
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("toyaml", toyaml);
    env.add_filter("b64enc", b64enc);
    env.add_filter("b64dec", b64dec);
    env.add_filter("quote", quote);
    env.add_filter("squote", squote);
    env.add_filter("nindent", nindent);
    env.add_filter("required", required);
    env.add_filter("sha256sum", sha256sum);
    env.add_filter("trimprefix", trimprefix);
    env.add_filter("trimsuffix", trimsuffix);

    env.add_function("dict", dict);
    env.add_function("list", list);
    env.add_function("coalesce", coalesce);
    env.add_function("ternary", ternary);
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Usage: `{{ Values.labels | toyaml | nindent(6) }}`
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&value).map_err(|e| invalid(e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

pub fn b64enc(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

pub fn b64dec(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;
    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

fn display(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

pub fn quote(value: Value) -> String {
    format!(
        "\"{}\"",
        display(&value).replace('\\', "\\\\").replace('"', "\\\"")
    )
}

pub fn squote(value: Value) -> String {
    format!("'{}'", display(&value).replace('\'', "''"))
}

/// Newline followed by the text indented by `spaces`. Blank lines stay blank.
pub fn nindent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    let body: Vec<String> = value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect();
    format!("\n{}", body.join("\n"))
}

/// Usage: `{{ Values.domain | required("domain is required") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);
    if missing {
        Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ))
    } else {
        Ok(value)
    }
}

pub fn sha256sum(value: String) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Usage: `{{ dict("app", "web", "tier", "frontend") | toyaml }}`
pub fn dict(args: Rest<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(invalid("dict requires an even number of arguments"));
    }

    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| invalid("dict keys must be strings"))?;
        let value = serde_json::to_value(&pair[1]).map_err(|e| invalid(e.to_string()))?;
        map.insert(key.to_string(), value);
    }
    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

pub fn list(args: Rest<Value>) -> Value {
    Value::from(args.0)
}

/// First argument that is neither undefined, none, nor an empty string.
pub fn coalesce(args: Rest<Value>) -> Value {
    args.0
        .into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && !arg.as_str().is_some_and(str::is_empty)
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Usage: `{{ ternary("always", "on-failure", Values.critical) }}`
pub fn ternary(when_true: Value, when_false: Value, condition: Value) -> Value {
    if condition.is_true() {
        when_true
    } else {
        when_false
    }
}
