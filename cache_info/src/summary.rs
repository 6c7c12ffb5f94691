//! Per vendor cache totals and last level cache identifiers, as the generic
//! cpu setup code records them for each processor.

use cpu_types::CpuInfo;
use cpuid::descriptors::LegacyCacheSizes;
use cpuid::{
    count_order, CacheRegisterSnapshot, CacheType, LEAF_AMD_CACHE_TOPOLOGY, LEAF_AMD_L2_L3_CACHE,
};
use raw_cpuid::CpuIdReader;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

use crate::probe::count_standard_leaves;
use crate::CacheTopology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct CacheSummary {
    pub l1i_kb: u32,
    pub l1d_kb: u32,
    pub l2_kb: u32,
    pub l3_kb: u32,
    pub llc_id: u32,
    pub l2c_id: Option<u32>,
    /// The largest level present, or both L1s together.
    pub cache_size_kb: u32,
    /// Neither enumeration found an L2; the caller sizes the cache some
    /// other way.
    pub needs_size_fallback: bool,
}

fn sharing_mask_id(apicid: u32, snapshot: &CacheRegisterSnapshot) -> u32 {
    let index_msb = count_order(snapshot.threads_sharing());
    apicid & !((1u32 << index_msb) - 1)
}

impl CacheTopology {
    /// Intel cache sizes for `cpu`, from the cache leaves when there are any
    /// and from the leaf 2 descriptors otherwise.
    pub fn intel_cache_summary<R: CpuIdReader>(
        &mut self,
        reader: &R,
        cpu: &CpuInfo,
    ) -> CacheSummary {
        let mut leaf_sizes = LegacyCacheSizes::default();
        let mut l2_id = None;
        let mut l3_id = None;

        let count = self.leaf_count(reader, cpu);
        for index in 0..count {
            let Ok(regs) = self.lookup_leaf(reader, cpu, index) else {
                continue;
            };
            let size_kb = (regs.size / 1024) as u32;
            match (regs.snapshot.level(), regs.snapshot.cache_type()) {
                (1, CacheType::Data) => leaf_sizes.l1d = size_kb,
                (1, CacheType::Instruction) => leaf_sizes.l1i = size_kb,
                (2, _) => {
                    leaf_sizes.l2 = size_kb;
                    l2_id = Some(sharing_mask_id(cpu.apicid, &regs.snapshot));
                }
                (3, _) => {
                    leaf_sizes.l3 = size_kb;
                    l3_id = Some(sharing_mask_id(cpu.apicid, &regs.snapshot));
                }
                _ => {}
            }
        }

        let mut sizes = LegacyCacheSizes::default();
        if count == 0 && cpu.cpuid_level > 1 {
            sizes = LegacyCacheSizes::read(reader);
        }
        let prefer = |new: u32, old: u32| if new != 0 { new } else { old };
        let l1i = prefer(leaf_sizes.l1i, sizes.l1i);
        let l1d = prefer(leaf_sizes.l1d, sizes.l1d);
        let l2 = prefer(leaf_sizes.l2, sizes.l2);
        let l3 = prefer(leaf_sizes.l3, sizes.l3);

        let mut llc_id = None;
        let mut l2c_id = None;
        if l2 != 0 {
            llc_id = l2_id;
            l2c_id = l2_id;
        }
        if l3 != 0 {
            llc_id = l3_id;
        }

        CacheSummary {
            l1i_kb: l1i,
            l1d_kb: l1d,
            l2_kb: l2,
            l3_kb: l3,
            llc_id: llc_id.unwrap_or(cpu.pkg_id),
            l2c_id,
            cache_size_kb: if l3 != 0 {
                l3
            } else if l2 != 0 {
                l2
            } else {
                l1i + l1d
            },
            needs_size_fallback: l2 == 0,
        }
    }
}

/// Last level cache id of an AMD processor, `None` without L2 and L3.
pub fn amd_llc_id<R: CpuIdReader>(reader: &R, cpu: &CpuInfo) -> Option<u32> {
    if reader.cpuid1(LEAF_AMD_L2_L3_CACHE).edx == 0 {
        return None;
    }
    if cpu.family < 0x17 {
        // one L3 per node
        return Some(cpu.die_id);
    }
    if cpu.family == 0x17 && cpu.model <= 0x1f {
        // one L3 per core complex of up to 8 threads
        return Some(cpu.apicid >> 3);
    }
    let last = count_standard_leaves(reader, LEAF_AMD_CACHE_TOPOLOGY).checked_sub(1)?;
    let llc = CacheRegisterSnapshot::from_cpuid(reader.cpuid2(LEAF_AMD_CACHE_TOPOLOGY, last));
    Some(cpu.apicid >> count_order(llc.threads_sharing()))
}

pub fn hygon_llc_id<R: CpuIdReader>(reader: &R, cpu: &CpuInfo) -> Option<u32> {
    if reader.cpuid1(LEAF_AMD_L2_L3_CACHE).edx == 0 {
        return None;
    }
    Some(cpu.apicid >> 3)
}
