use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};

fn default_root_dir() -> String {
    ".".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    pub paths: BTreeMap<String, String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            paths: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub named_dirs: BTreeMap<String, PathBuf>,
}

impl WorkspacePaths {
    // - `@alias/...` expands from `[workspace.paths]`
    // - absolute paths are used as-is
    // - relative paths are rooted at the workspace root
    pub fn resolve_config_path(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg("empty path"));
        }

        if let Some(after_at) = raw.strip_prefix('@') {
            let (alias, rest) = match after_at.split_once('/') {
                Some((a, r)) => (a.trim(), r),
                None => (after_at.trim(), ""),
            };
            if alias.is_empty() {
                return Err(Error::msg(format!("invalid alias path '{}'", raw)));
            }
            let base = self.named_dirs.get(alias).ok_or_else(|| {
                let known = self.named_dirs.keys().cloned().collect::<Vec<_>>().join(", ");
                Error::msg(format!(
                    "unknown workspace path alias '{}' in '{}' (known: {})",
                    alias, raw, known
                ))
            })?;
            return Ok(if rest.is_empty() {
                base.clone()
            } else {
                base.join(rest)
            });
        }

        Ok(rooted(&self.root, raw))
    }
}

fn rooted(base: &Path, raw: &str) -> PathBuf {
    let pb = PathBuf::from(raw);
    if pb.is_absolute() { pb } else { base.join(pb) }
}

/// Workspace root is relative to the run definition's directory, not the cwd.
pub fn load_paths(doc: &ConfigDoc) -> Result<WorkspacePaths> {
    let cfg: WorkspaceConfig = doc.deserialize_path("workspace")?.unwrap_or_default();
    let doc_dir = doc
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let root_dir = cfg.root_dir.trim();
    if root_dir.is_empty() {
        return Err(Error::msg("workspace.root_dir is empty"));
    }
    let root = rooted(&doc_dir, root_dir);

    let mut named_dirs = BTreeMap::new();
    named_dirs.insert("root".to_string(), root.clone());
    for (name, raw) in &cfg.paths {
        let key = name.trim();
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::msg(format!(
                "workspace.paths key '{}' is invalid (allowed: a-zA-Z0-9_-)",
                name
            )));
        }
        if key == "root" {
            return Err(Error::msg("workspace.paths key 'root' is reserved"));
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg(format!("workspace.paths.{key} is empty")));
        }
        named_dirs.insert(key.to_string(), rooted(&root, raw));
    }

    Ok(WorkspacePaths { root, named_dirs })
}
