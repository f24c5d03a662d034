use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::requirements::{Partition, PartitionKind, ResourceRequirement};
use crate::workspace::WorkspacePaths;

/// A partition image the host has materialized as a directory tree.
pub trait ExtFs {
    fn partition(&self) -> Partition;
    fn tree(&self) -> &Path;
}

/// A raw boot image handle. Unpacking and repacking stay with the host.
pub trait BootImage {
    fn partition(&self) -> Partition;
    fn path(&self) -> &Path;
}

#[derive(Debug, Clone)]
pub struct ExtractedTree {
    partition: Partition,
    root: PathBuf,
}

impl ExtractedTree {
    pub fn new(partition: Partition, root: impl Into<PathBuf>) -> Self {
        Self {
            partition,
            root: root.into(),
        }
    }
}

impl ExtFs for ExtractedTree {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn tree(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Clone)]
pub struct BootImageFile {
    partition: Partition,
    path: PathBuf,
}

impl BootImageFile {
    pub fn new(partition: Partition, path: impl Into<PathBuf>) -> Self {
        Self {
            partition,
            path: path.into(),
        }
    }
}

impl BootImage for BootImageFile {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// What a module receives for the duration of one `inject` call.
pub struct PreparedResources<'a> {
    pub boot: BTreeMap<Partition, &'a mut dyn BootImage>,
    pub ext: BTreeMap<Partition, &'a dyn ExtFs>,
    pub selinux_policies: &'a [PathBuf],
}

impl<'a> PreparedResources<'a> {
    pub fn empty() -> Self {
        Self {
            boot: BTreeMap::new(),
            ext: BTreeMap::new(),
            selinux_policies: &[],
        }
    }

    pub fn ext_tree(&self, partition: Partition) -> Option<&Path> {
        self.ext.get(&partition).map(|fs| fs.tree())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ImagesConfig {
    boot: BTreeMap<Partition, BootImageEntry>,
    ext: BTreeMap<Partition, ExtImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct BootImageEntry {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtImageEntry {
    tree: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SelinuxConfig {
    policies: Vec<String>,
}

/// Everything the host has on hand for a run. Handles live here; modules
/// only ever see borrows handed out by `prepare_for`.
#[derive(Debug, Default)]
pub struct ResourcePool {
    boot: BTreeMap<Partition, BootImageFile>,
    ext: BTreeMap<Partition, ExtractedTree>,
    selinux_policies: Vec<PathBuf>,
}

impl ResourcePool {
    pub fn load(doc: &ConfigDoc, ws: &WorkspacePaths) -> Result<Self> {
        let images: ImagesConfig = doc.deserialize_path("images")?.unwrap_or_default();
        let selinux: SelinuxConfig = doc.deserialize_path("selinux")?.unwrap_or_default();

        let mut pool = ResourcePool::default();
        for (partition, entry) in images.boot {
            let path = ws.resolve_config_path(&entry.path)?;
            pool.add_boot_image(BootImageFile::new(partition, path))?;
        }
        for (partition, entry) in images.ext {
            let root = ws.resolve_config_path(&entry.tree)?;
            pool.add_ext_tree(ExtractedTree::new(partition, root))?;
        }
        for raw in &selinux.policies {
            pool.selinux_policies.push(ws.resolve_config_path(raw)?);
        }
        Ok(pool)
    }

    pub fn add_boot_image(&mut self, image: BootImageFile) -> Result<()> {
        let p = image.partition();
        if p.kind() != PartitionKind::BootImage {
            return Err(Error::msg(format!(
                "images.boot.{p}: '{p}' is not a boot image partition"
            )));
        }
        self.boot.insert(p, image);
        Ok(())
    }

    pub fn add_ext_tree(&mut self, tree: ExtractedTree) -> Result<()> {
        let p = ExtFs::partition(&tree);
        if p.kind() != PartitionKind::Filesystem {
            return Err(Error::msg(format!(
                "images.ext.{p}: '{p}' is not a filesystem partition"
            )));
        }
        self.ext.insert(p, tree);
        Ok(())
    }

    pub fn add_selinux_policy(&mut self, path: impl Into<PathBuf>) {
        self.selinux_policies.push(path.into());
    }

    fn boot_available(&self, p: Partition) -> bool {
        self.boot.get(&p).is_some_and(|b| b.path().is_file())
    }

    fn ext_available(&self, p: Partition) -> bool {
        self.ext.get(&p).is_some_and(|t| t.tree().is_dir())
    }

    /// Declared identifiers the host cannot produce right now.
    pub fn missing_for(&self, req: &ResourceRequirement) -> Vec<Partition> {
        let mut out = Vec::new();
        out.extend(
            req.boot_images
                .iter()
                .copied()
                .filter(|p| !self.boot_available(*p)),
        );
        out.extend(
            req.ext_images
                .iter()
                .copied()
                .filter(|p| !self.ext_available(*p)),
        );
        out
    }

    /// True when at least one declared resource can be handed over.
    pub fn satisfies_any(&self, req: &ResourceRequirement) -> bool {
        req.boot_images.iter().any(|p| self.boot_available(*p))
            || req.ext_images.iter().any(|p| self.ext_available(*p))
            || (req.selinux_patching && !self.selinux_policies.is_empty())
    }

    /// Borrow exactly the resources inside `req`, nothing outside it.
    pub fn prepare_for(&mut self, req: &ResourceRequirement) -> PreparedResources<'_> {
        let ext_available: Vec<Partition> = req
            .ext_images
            .iter()
            .copied()
            .filter(|p| self.ext_available(*p))
            .collect();
        let boot_available: Vec<Partition> = req
            .boot_images
            .iter()
            .copied()
            .filter(|p| self.boot_available(*p))
            .collect();

        let ext = self
            .ext
            .iter()
            .filter(|(p, _)| ext_available.contains(p))
            .map(|(p, t)| (*p, t as &dyn ExtFs))
            .collect();
        let boot = self
            .boot
            .iter_mut()
            .filter(|(p, _)| boot_available.contains(p))
            .map(|(p, b)| (*p, b as &mut dyn BootImage))
            .collect();
        let selinux_policies: &[PathBuf] = if req.selinux_patching {
            &self.selinux_policies
        } else {
            &[]
        };

        PreparedResources {
            boot,
            ext,
            selinux_policies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn prepare_hands_out_only_declared_and_present_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let system = tmp.path().join("system");
        let product = tmp.path().join("product");
        fs::create_dir_all(&system).unwrap();
        fs::create_dir_all(&product).unwrap();

        let mut pool = ResourcePool::default();
        pool.add_ext_tree(ExtractedTree::new(Partition::System, &system))
            .unwrap();
        pool.add_ext_tree(ExtractedTree::new(Partition::Product, &product))
            .unwrap();
        pool.add_ext_tree(ExtractedTree::new(
            Partition::Vendor,
            tmp.path().join("vendor-not-extracted"),
        ))
        .unwrap();
        pool.add_selinux_policy(tmp.path().join("plat.cil"));

        let req = ResourceRequirement::new(&[], &[Partition::System, Partition::Vendor], false);
        assert_eq!(pool.missing_for(&req), vec![Partition::Vendor]);
        assert!(pool.satisfies_any(&req));

        let res = pool.prepare_for(&req);
        assert_eq!(res.ext.keys().copied().collect::<Vec<_>>(), vec![Partition::System]);
        assert_eq!(res.ext_tree(Partition::System), Some(system.as_path()));
        assert!(res.boot.is_empty());
        assert!(res.selinux_policies.is_empty());
    }

    #[test]
    fn policies_are_only_handed_out_when_requested() {
        let mut pool = ResourcePool::default();
        pool.add_selinux_policy("/tmp/a.cil");
        pool.add_selinux_policy("/tmp/b.cil");

        let req = ResourceRequirement::new(&[], &[], true);
        let res = pool.prepare_for(&req);
        assert_eq!(
            res.selinux_policies,
            &[PathBuf::from("/tmp/a.cil"), PathBuf::from("/tmp/b.cil")]
        );
    }

    #[test]
    fn pool_rejects_partition_in_wrong_class() {
        let mut pool = ResourcePool::default();
        assert!(
            pool.add_ext_tree(ExtractedTree::new(Partition::Boot, "/tmp/x"))
                .is_err()
        );
        assert!(
            pool.add_boot_image(BootImageFile::new(Partition::System, "/tmp/x.img"))
                .is_err()
        );
    }

    #[test]
    fn load_resolves_paths_against_workspace() {
        let doc = ConfigDoc::from_toml(
            "/work/run.toml",
            r#"
[workspace.paths]
extracted = "/data/extracted"

[images.boot.init_boot]
path = "images/init_boot.img"

[images.ext.system]
tree = "@extracted/system"

[selinux]
policies = ["@extracted/vendor/etc/selinux/vendor_sepolicy.cil"]
"#,
        )
        .unwrap();
        let ws = crate::workspace::load_paths(&doc).unwrap();
        let pool = ResourcePool::load(&doc, &ws).unwrap();

        assert_eq!(
            pool.ext[&Partition::System].tree(),
            Path::new("/data/extracted/system")
        );
        assert_eq!(
            pool.boot[&Partition::InitBoot].path(),
            Path::new("/work/images/init_boot.img")
        );
        assert_eq!(
            pool.selinux_policies,
            vec![PathBuf::from(
                "/data/extracted/vendor/etc/selinux/vendor_sepolicy.cil"
            )]
        );
    }

    #[test]
    fn load_rejects_unknown_partition_keys() {
        let doc = ConfigDoc::from_toml(
            "/work/run.toml",
            r#"
[images.ext.userdata]
tree = "userdata"
"#,
        )
        .unwrap();
        let ws = crate::workspace::load_paths(&doc).unwrap();
        let err = ResourcePool::load(&doc, &ws).unwrap_err().to_string();
        assert!(err.contains("unknown partition 'userdata'"), "unexpected err: {err}");
    }
}
