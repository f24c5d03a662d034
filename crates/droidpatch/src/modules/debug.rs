use std::path::PathBuf;

use droidpatch_macros::Module;

use crate::error::Result;
use crate::executor::ExecCtx;
use crate::modules::util;
use crate::requirements::Partition;
use crate::resources::PreparedResources;

/// Rules appended to every policy file, in this order.
pub const SELINUX_RULES: &[&str] = &[
    "allow adbd adbd process setcurrent",
    "allow adbd su process dyntransition",
    "allow su * * *",
    "allow init overlayfs_file dir relabelfrom",
    "allow init overlayfs_file dir mounton",
    "allow init overlayfs_file dir write",
    "allow init overlayfs_file file append",
    "allow init system_block_device blk_file write",
    "allow fsck system_block_device blk_file ioctl",
    "allow fsck system_block_device blk_file read",
    "allow fsck system_block_device blk_file write",
    "allow fsck system_block_device blk_file getattr",
    "allow fsck system_block_device blk_file lock",
    "allow fsck system_block_device blk_file append",
    "allow fsck system_block_device blk_file map",
    "allow fsck system_block_device blk_file open",
    "allow fsck system_block_device blk_file watch",
    "allow fsck system_block_device blk_file watch_reads",
];

/// Properties appended to each build.prop, in write order.
pub const SYSTEM_PROPS: &[(&str, &str)] = &[
    ("ro.debuggable", "1"),
    ("ro.adb.secure", "0"),
    ("persist.service.adb.enable", "1"),
    ("persist.service.debuggable", "1"),
    ("persist.sys.usb.config", "mtp,adb"),
];

pub const PROP_MARKER: &str = "# Added by DebugMod";

/// build.prop locations relative to each partition's tree root.
pub const PROP_FILES: &[(Partition, &str)] = &[
    (Partition::System, "system/build.prop"),
    (Partition::Vendor, "build.prop"),
];

/// Opens up adbd/init/fsck under SELinux and flips the debug properties.
#[Module(
    id = "debug",
    boot_images = [],
    ext_images = [System, Vendor],
    selinux_patching = true
)]
pub struct DebugModule;

impl DebugModule {
    fn run(&self, res: &mut PreparedResources<'_>, ctx: &mut ExecCtx) -> Result<()> {
        for policy in res.selinux_policies {
            util::append_lines(ctx, policy, SELINUX_RULES)?;
        }

        for (partition, rel) in PROP_FILES {
            let Some(root) = res.ext_tree(*partition) else {
                continue;
            };
            let prop_file: PathBuf = root.join(rel);
            if !prop_file.exists() {
                ctx.log(&format!("{} not present, skipped", prop_file.display()));
                continue;
            }
            util::append_prop_block(ctx, &prop_file, PROP_MARKER, SYSTEM_PROPS)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_data_shape() {
        assert_eq!(SELINUX_RULES.len(), 18);
        assert!(SELINUX_RULES.iter().all(|r| r.starts_with("allow ")));
        assert!(
            SELINUX_RULES
                .iter()
                .all(|r| r.split_whitespace().count() == 5)
        );
        assert_eq!(SYSTEM_PROPS.len(), 5);
        assert_eq!(SYSTEM_PROPS[0], ("ro.debuggable", "1"));
        assert_eq!(SYSTEM_PROPS[4], ("persist.sys.usb.config", "mtp,adb"));
    }

    #[test]
    fn declared_constants_match_macro_input() {
        assert_eq!(DebugModule::ID, "debug");
        assert!(DebugModule::BOOT_IMAGES.is_empty());
        assert_eq!(
            DebugModule::EXT_IMAGES,
            &[Partition::System, Partition::Vendor]
        );
        assert!(DebugModule::SELINUX_PATCHING);
    }
}
