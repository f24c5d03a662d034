use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

/// A fully merged run definition (after `extends` and `imports`).
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModuleToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    // Skip a module when any declared resource is unavailable instead of
    // running it against the partial set.
    pub strict: bool,
    pub report: Option<String>,
}

impl ConfigDoc {
    pub fn from_toml(path: impl Into<PathBuf>, src: &str) -> Result<Self> {
        let value: Value = toml::from_str(src)?;
        Ok(Self {
            path: path.into(),
            value,
        })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn table_path(&self, path: &str) -> Option<&toml::value::Table> {
        self.value_path(path)?.as_table()
    }

    pub fn has_table_path(&self, path: &str) -> bool {
        self.table_path(path).is_some()
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }

    pub fn module_enabled(&self, module_id: &str) -> Result<bool> {
        let toggle: ModuleToggle = self
            .deserialize_path(&format!("modules.{module_id}"))?
            .unwrap_or_default();
        Ok(toggle.enabled)
    }

    pub fn host(&self) -> Result<HostConfig> {
        Ok(self.deserialize_path("host")?.unwrap_or_default())
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn relative_to(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        return p;
    }
    from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
}

fn take_imports(path: &Path, table: &mut toml::value::Table) -> Result<Vec<String>> {
    let Some(raw) = table.remove("imports") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(Error::msg(format!(
            "imports in {} must be an array of strings",
            path.display()
        )));
    };
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let s = v.as_str().ok_or_else(|| {
            Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            ))
        })?;
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

// Imports are merged first, then the importing table is layered on top.
fn inline_imports(file: &Path, value: &mut Value, seen: &mut HashSet<PathBuf>) -> Result<()> {
    let Value::Table(tbl) = value else {
        return Ok(());
    };

    let imports = take_imports(file, tbl)?;
    if !imports.is_empty() {
        let mut acc = Value::Table(Default::default());
        for imp in imports {
            let loaded = load_value(&relative_to(file, &imp), seen)?;
            merge(&mut acc, loaded);
        }
        merge(&mut acc, Value::Table(std::mem::take(tbl)));
        if let Value::Table(merged) = acc {
            *tbl = merged;
        }
    }

    for (_, v) in tbl.iter_mut() {
        inline_imports(file, v, seen)?;
    }
    Ok(())
}

fn load_value(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(key.clone()) {
        return Err(Error::msg(format!(
            "config import cycle detected at {}",
            key.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(tbl) = value.as_table_mut()
        && let Some(parent) = tbl.remove("extends")
    {
        let Some(parent) = parent.as_str() else {
            return Err(Error::msg(format!(
                "extends in {} must be a string",
                path.display()
            )));
        };
        out = load_value(&relative_to(path, parent), seen)?;
    }

    inline_imports(path, &mut value, seen)?;
    merge(&mut out, value);

    seen.remove(&key);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    let value = load_value(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn extends_and_imports_are_merged() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "base.toml",
            r#"
[host]
strict = true

[images.ext.system]
tree = "base/system"
"#,
        );
        write(
            tmp.path(),
            "vendor.toml",
            r#"
[ext.vendor]
tree = "work/vendor"
"#,
        );
        let run = write(
            tmp.path(),
            "run.toml",
            r#"
extends = "base.toml"

[images]
imports = ["vendor.toml"]

[images.ext.system]
tree = "work/system"
"#,
        );

        let doc = load(&run).unwrap();
        assert!(doc.host().unwrap().strict);
        assert_eq!(
            doc.value_path("images.ext.system.tree")
                .and_then(Value::as_str),
            Some("work/system")
        );
        assert_eq!(
            doc.value_path("images.ext.vendor.tree")
                .and_then(Value::as_str),
            Some("work/vendor")
        );
        assert!(doc.value_path("images.imports").is_none());
    }

    #[test]
    fn import_cycles_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.toml", "extends = \"b.toml\"\n");
        let b = write(tmp.path(), "b.toml", "extends = \"a.toml\"\n");
        let err = load(&b).unwrap_err().to_string();
        assert!(err.contains("cycle"), "unexpected err: {err}");
    }

    #[test]
    fn modules_are_enabled_unless_disabled() {
        let doc = ConfigDoc::from_toml(
            "<mem>",
            r#"
[modules.debug]
enabled = false
"#,
        )
        .unwrap();
        assert!(!doc.module_enabled("debug").unwrap());
        assert!(doc.module_enabled("other").unwrap());
    }
}
