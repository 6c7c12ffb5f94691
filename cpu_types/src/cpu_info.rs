use bitflags::bitflags;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum Vendor {
    Intel,
    Amd,
    Hygon,
    Other,
}

impl Vendor {
    /// Vendor from the 12 byte identification string of cpuid leaf 0.
    pub fn from_vendor_id(id: &str) -> Vendor {
        match id {
            "GenuineIntel" => Vendor::Intel,
            "AuthenticAMD" => Vendor::Amd,
            "HygonGenuine" => Vendor::Hygon,
            _ => Vendor::Other,
        }
    }

    /// AMD and Hygon share the 0x8000_001d cache topology leaf and the
    /// northbridge based L3 handling.
    pub fn is_amd_like(self) -> bool {
        matches!(self, Vendor::Amd | Vendor::Hygon)
    }
}

bitflags! {
    /// The subset of processor capabilities the cache code looks at.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CpuFeatures: u32 {
        /// cpuid 0x8000_001d is implemented.
        const TOPOEXT = 1 << 0;
        /// Multi-node package; the packed L3 descriptor covers both nodes.
        const AMD_DCM = 1 << 1;
        /// Caches snoop themselves, flushing on cache disable is redundant.
        const SELF_SNOOP = 1 << 2;
        const PGE = 1 << 3;
        const MTRR = 1 << 4;
        const PAT = 1 << 5;
    }
}

/// Per-processor identification, filled in by the generic cpu setup code
/// before any cache enumeration happens on that processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuInfo {
    pub vendor: Vendor,
    pub family: u8,
    pub model: u8,
    /// Highest basic cpuid leaf.
    pub cpuid_level: u32,
    /// Highest extended cpuid leaf (0x8000_xxxx).
    pub extended_cpuid_level: u32,
    pub apicid: u32,
    pub pkg_id: u32,
    pub die_id: u32,
    /// Northbridge node owning this processor (AMD).
    pub node_id: u32,
    pub cores_per_package: u32,
    /// Errata corrected L2 size in KB. The legacy AMD L2 emulation needs
    /// this to be populated before it runs.
    pub cache_size_kb: Option<u32>,
    pub features: CpuFeatures,
}

impl CpuInfo {
    pub fn new(vendor: Vendor) -> CpuInfo {
        CpuInfo {
            vendor,
            family: 0,
            model: 0,
            cpuid_level: 0,
            extended_cpuid_level: 0,
            apicid: 0,
            pkg_id: 0,
            die_id: 0,
            node_id: 0,
            cores_per_package: 1,
            cache_size_kb: None,
            features: CpuFeatures::empty(),
        }
    }

    pub fn has(&self, feature: CpuFeatures) -> bool {
        self.features.contains(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_strings() {
        assert_eq!(Vendor::from_vendor_id("GenuineIntel"), Vendor::Intel);
        assert_eq!(Vendor::from_vendor_id("AuthenticAMD"), Vendor::Amd);
        assert_eq!(Vendor::from_vendor_id("HygonGenuine"), Vendor::Hygon);
        assert_eq!(Vendor::from_vendor_id("CentaurHauls"), Vendor::Other);
        assert!(Vendor::Hygon.is_amd_like());
        assert!(!Vendor::Intel.is_amd_like());
    }
}
