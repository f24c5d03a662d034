use toml::Value;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};

fn parse_override(item: &str) -> Result<(Vec<String>, Value)> {
    let Some((k, v)) = item.trim().split_once('=') else {
        return Err(Error::msg(format!(
            "invalid --set value '{}'; expected KEY=VALUE",
            item
        )));
    };
    let key = k.trim();
    if key.is_empty() {
        return Err(Error::msg(format!(
            "invalid --set value '{}'; key is empty",
            item
        )));
    }
    let segs: Vec<String> = key.split('.').map(|s| s.trim().to_string()).collect();
    if segs.iter().any(String::is_empty) {
        return Err(Error::msg(format!(
            "invalid --set key '{}'; empty path segment",
            key
        )));
    }
    Ok((segs, parse_raw_value(v)))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_raw_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(b) = parse_bool(raw) {
        return Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(raw.to_string())
}

fn set_path(root: &mut Value, segs: &[String], value: Value) -> Result<()> {
    let Some((last, parents)) = segs.split_last() else {
        return Ok(());
    };
    let mut cur = root;
    for (i, seg) in parents.iter().enumerate() {
        cur = match cur {
            Value::Table(tbl) => tbl
                .entry(seg.clone())
                .or_insert_with(|| Value::Table(Default::default())),
            _ => {
                return Err(Error::msg(format!(
                    "cannot set '{}': '{}' is not a table",
                    segs.join("."),
                    segs[..i].join(".")
                )));
            }
        };
    }
    let Value::Table(tbl) = cur else {
        return Err(Error::msg(format!(
            "cannot set '{}': '{}' is not a table",
            segs.join("."),
            parents.join(".")
        )));
    };
    tbl.insert(last.clone(), value);
    Ok(())
}

/// Apply `KEY=VALUE` pairs (dotted keys) onto the loaded document.
pub fn apply_cli_overrides(doc: &mut ConfigDoc, raw: &[String]) -> Result<()> {
    for item in raw {
        let (segs, value) = parse_override(item)?;
        set_path(&mut doc.value, &segs, value)?;
    }
    Ok(())
}
