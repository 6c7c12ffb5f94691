use cpu_types::{CpuFeatures, CpuInfo, Vendor};
use cpuid::amd_legacy::{emulate_leaf, EmulationError, EmulationInputs, LegacyCacheRegisters};
use cpuid::{
    CacheRegisterSnapshot, CacheType, LEAF_AMD_CACHE_TOPOLOGY, LEAF_AMD_L2_L3_CACHE,
    LEAF_CACHE_PARAMETERS,
};
use log::warn;
use raw_cpuid::CpuIdReader;

use crate::CacheInfoError;

/// How cache leaves are read on a processor family. Picked once from the boot
/// processor, then used for every processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorCacheProbe {
    /// Deterministic cache parameters: leaf 4, or 0x8000_001d on AMD / Hygon.
    Standard { leaf: u32 },
    /// AMD parts without 0x8000_001d, leaves rebuilt from the packed
    /// 0x8000_0005 / 0x8000_0006 descriptors.
    LegacyEmulated { dual_core_module: bool },
}

impl VendorCacheProbe {
    /// `None` when the processor has no usable cache enumeration, in which
    /// case it reports zero leaves.
    pub fn select(cpu: &CpuInfo) -> Option<VendorCacheProbe> {
        match cpu.vendor {
            Vendor::Amd => {
                if cpu.has(CpuFeatures::TOPOEXT) {
                    Some(VendorCacheProbe::Standard {
                        leaf: LEAF_AMD_CACHE_TOPOLOGY,
                    })
                } else if cpu.extended_cpuid_level >= LEAF_AMD_L2_L3_CACHE {
                    Some(VendorCacheProbe::LegacyEmulated {
                        dual_core_module: cpu.has(CpuFeatures::AMD_DCM),
                    })
                } else {
                    None
                }
            }
            Vendor::Hygon => Some(VendorCacheProbe::Standard {
                leaf: LEAF_AMD_CACHE_TOPOLOGY,
            }),
            Vendor::Intel | Vendor::Other => {
                if cpu.cpuid_level > 3 {
                    Some(VendorCacheProbe::Standard {
                        leaf: LEAF_CACHE_PARAMETERS,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// L3 leaves read this way belong to an AMD northbridge.
    pub fn has_northbridge(&self) -> bool {
        match *self {
            VendorCacheProbe::Standard { leaf } => leaf == LEAF_AMD_CACHE_TOPOLOGY,
            VendorCacheProbe::LegacyEmulated { .. } => true,
        }
    }

    /// Reads leaf `index` of the processor `reader` runs on.
    ///
    /// The legacy L2 needs `cpu.cache_size_kb` to be filled in first; without
    /// it the leaf reads as [`CacheInfoError::Io`].
    pub fn probe<R: CpuIdReader>(
        &self,
        reader: &R,
        cpu: &CpuInfo,
        index: u32,
    ) -> Result<CacheRegisterSnapshot, CacheInfoError> {
        let snapshot = match *self {
            VendorCacheProbe::Standard { leaf } => {
                CacheRegisterSnapshot::from_cpuid(reader.cpuid2(leaf, index))
            }
            VendorCacheProbe::LegacyEmulated { dual_core_module } => {
                let regs = LegacyCacheRegisters::read(reader);
                let inputs = EmulationInputs {
                    l2_size_kb: cpu.cache_size_kb,
                    dual_core_module,
                    cores_per_package: cpu.cores_per_package,
                };
                match emulate_leaf(index, &regs, &inputs) {
                    Ok(snapshot) => snapshot,
                    Err(EmulationError::NotPresent) => {
                        return Err(CacheInfoError::NotPresent(index))
                    }
                    Err(EmulationError::MissingL2Size) => {
                        warn!("cache leaf {}: L2 size not known yet", index);
                        return Err(CacheInfoError::Io(index));
                    }
                }
            }
        };
        if snapshot.cache_type() == CacheType::Null {
            return Err(CacheInfoError::NotPresent(index));
        }
        Ok(snapshot)
    }
}

/// Number of subleaves of a leaf 4 style `leaf` before the first null one.
pub fn count_standard_leaves<R: CpuIdReader>(reader: &R, leaf: u32) -> u32 {
    let mut index = 0;
    while CacheRegisterSnapshot::from_cpuid(reader.cpuid2(leaf, index)).cache_type()
        != CacheType::Null
    {
        index += 1;
    }
    index
}
