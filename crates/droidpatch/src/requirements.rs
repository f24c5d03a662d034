use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    BootImage,
    Filesystem,
}

/// Partition identifiers the host knows how to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Partition {
    Boot,
    InitBoot,
    VendorBoot,
    Recovery,
    System,
    SystemExt,
    Vendor,
    Product,
    Odm,
}

impl Partition {
    pub const ALL: &'static [Partition] = &[
        Partition::Boot,
        Partition::InitBoot,
        Partition::VendorBoot,
        Partition::Recovery,
        Partition::System,
        Partition::SystemExt,
        Partition::Vendor,
        Partition::Product,
        Partition::Odm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Boot => "boot",
            Partition::InitBoot => "init_boot",
            Partition::VendorBoot => "vendor_boot",
            Partition::Recovery => "recovery",
            Partition::System => "system",
            Partition::SystemExt => "system_ext",
            Partition::Vendor => "vendor",
            Partition::Product => "product",
            Partition::Odm => "odm",
        }
    }

    pub fn kind(self) -> PartitionKind {
        match self {
            Partition::Boot
            | Partition::InitBoot
            | Partition::VendorBoot
            | Partition::Recovery => PartitionKind::BootImage,
            Partition::System
            | Partition::SystemExt
            | Partition::Vendor
            | Partition::Product
            | Partition::Odm => PartitionKind::Filesystem,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Partition::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                let known = Partition::ALL
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::msg(format!("unknown partition '{s}' (known: {known})"))
            })
    }
}

impl Serialize for Partition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Partition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What a module needs the host to prepare before `inject` is called.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceRequirement {
    pub boot_images: BTreeSet<Partition>,
    pub ext_images: BTreeSet<Partition>,
    pub selinux_patching: bool,
}

impl ResourceRequirement {
    pub fn new(boot_images: &[Partition], ext_images: &[Partition], selinux_patching: bool) -> Self {
        Self {
            boot_images: boot_images.iter().copied().collect(),
            ext_images: ext_images.iter().copied().collect(),
            selinux_patching,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.boot_images.is_empty() && self.ext_images.is_empty() && !self.selinux_patching
    }

    pub fn validate(&self) -> Result<()> {
        for p in &self.boot_images {
            if p.kind() != PartitionKind::BootImage {
                return Err(Error::msg(format!(
                    "'{p}' is a filesystem partition and cannot be declared as a boot image"
                )));
            }
        }
        for p in &self.ext_images {
            if p.kind() != PartitionKind::Filesystem {
                return Err(Error::msg(format!(
                    "'{p}' is a boot image partition and cannot be declared as an extracted filesystem"
                )));
            }
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &ResourceRequirement) {
        self.boot_images.extend(other.boot_images.iter().copied());
        self.ext_images.extend(other.ext_images.iter().copied());
        self.selinux_patching |= other.selinux_patching;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip_through_strings() {
        for p in Partition::ALL {
            assert_eq!(p.as_str().parse::<Partition>().unwrap(), *p);
        }
    }

    #[test]
    fn unknown_identifier_lists_known_partitions() {
        let err = "userdata".parse::<Partition>().unwrap_err().to_string();
        assert!(err.contains("unknown partition 'userdata'"), "{err}");
        assert!(err.contains("vendor_boot"), "{err}");
    }

    #[test]
    fn new_collapses_duplicates() {
        let req = ResourceRequirement::new(
            &[],
            &[Partition::Vendor, Partition::System, Partition::Vendor],
            false,
        );
        assert_eq!(req.ext_images.len(), 2);
        assert!(!req.is_empty());
    }

    #[test]
    fn validate_rejects_mismatched_partition_class() {
        let req = ResourceRequirement::new(&[Partition::System], &[], false);
        assert!(req.validate().is_err());

        let req = ResourceRequirement::new(&[], &[Partition::Boot], false);
        assert!(req.validate().is_err());

        let req = ResourceRequirement::new(&[Partition::InitBoot], &[Partition::Odm], true);
        req.validate().unwrap();
    }

    #[test]
    fn merge_unions_sets_and_flags() {
        let mut a = ResourceRequirement::new(&[Partition::Boot], &[Partition::System], false);
        let b = ResourceRequirement::new(&[], &[Partition::System, Partition::Vendor], true);
        a.merge(&b);
        assert_eq!(
            a,
            ResourceRequirement::new(
                &[Partition::Boot],
                &[Partition::System, Partition::Vendor],
                true
            )
        );
    }
}
