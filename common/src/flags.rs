//! Parsing of the `chartFlags` field: `key=value` pairs separated by commas,
//! with dotted keys for nesting and `{a,b}` for lists.
use crate::{Error, Result};
use serde_json::{Map, Value};

pub fn parse_flags(input: &str) -> Result<Map<String, Value>> {
    let mut values = Value::Object(Map::new());
    if input.trim().is_empty() {
        return Ok(Map::new());
    }
    for entry in split_top_level(input)? {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| Error::BuildError(format!("invalid flag '{entry}': expected key=value")))?;
        let path: Vec<&str> = key.trim().split('.').collect();
        if path.iter().any(|p| p.is_empty()) {
            return Err(Error::BuildError(format!("invalid flag key '{key}'")));
        }
        set_nested(&mut values, &path, parse_value(raw.trim())?);
    }
    match values {
        Value::Object(m) => Ok(m),
        _ => Ok(Map::new()),
    }
}

/// Split on commas that are neither escaped nor inside braces
fn split_top_level(input: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(n) = chars.next() {
                    current.push(n);
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::BuildError(format!("unbalanced braces in flags '{input}'")));
                }
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(Error::BuildError(format!("unbalanced braces in flags '{input}'")));
    }
    parts.push(current);
    Ok(parts.into_iter().filter(|p| !p.trim().is_empty()).collect())
}

fn parse_value(raw: &str) -> Result<Value> {
    if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        if inner.trim().is_empty() {
            return Ok(Value::Array(vec![]));
        }
        let items = split_top_level(inner)?
            .iter()
            .map(|i| parse_value(i.trim()))
            .collect::<Result<Vec<Value>>>()?;
        return Ok(Value::Array(items));
    }
    Ok(typed_scalar(&unescape(raw)))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(n) = chars.next() {
                out.push(n);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Helm `--set` typing: booleans and null ignore case, integers without a
/// leading zero become numbers, anything else stays a string
fn typed_scalar(val: &str) -> Value {
    if val.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if val.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if val.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if val == "0" {
        return Value::Number(0.into());
    }
    if !val.is_empty() && !val.starts_with('0') {
        if let Ok(num) = val.parse::<i64>() {
            return Value::Number(num.into());
        }
    }
    Value::String(val.to_string())
}

fn set_nested(value: &mut Value, path: &[&str], new_value: Value) {
    if path.is_empty() {
        *value = new_value;
        return;
    }
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    if let Value::Object(map) = value {
        let entry = map
            .entry(path[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if path.len() == 1 {
            *entry = new_value;
        } else {
            set_nested(entry, &path[1..], new_value);
        }
    }
}
