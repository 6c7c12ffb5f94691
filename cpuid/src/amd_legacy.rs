//! Leaf 4 emulation from the packed AMD cache descriptors, for AMD
//! processors without the 0x8000_001d topology leaf.
//!
//! The result is laid out exactly like a leaf 4 subleaf so the rest of the
//! code never has to know where a snapshot came from.

use bit_field::BitField;
use core::ops::Range;
use raw_cpuid::CpuIdReader;

use crate::cache_leaf::{Associativity, CacheRegisterSnapshot, CacheType};
use crate::{LEAF_AMD_L1_CACHE, LEAF_AMD_L2_L3_CACHE};

// 0x8000_0005 ECX (L1d) and EDX (L1i)
const L1_LINE_SIZE: Range<usize> = 0..8;
const L1_LINES_PER_TAG: Range<usize> = 8..16;
const L1_ASSOC: Range<usize> = 16..24;
const L1_SIZE_KB: Range<usize> = 24..32;

// 0x8000_0006 ECX (L2) and EDX (L3)
const LINE_SIZE: Range<usize> = 0..8;
const LINES_PER_TAG: Range<usize> = 8..12;
const ASSOC: Range<usize> = 12..16;
const L2_SIZE_KB: Range<usize> = 16..32;
const L3_SIZE_512KB: Range<usize> = 18..32;

/// Way counts of the 4 bit associativity code, 0 is reserved.
const ASSOCS: [u32; 16] = [0, 1, 2, 0, 4, 0, 8, 0, 16, 0, 32, 48, 64, 96, 128, 0];
const FULLY_ASSOCIATIVE_CODE: u32 = 0xf;

const LEVELS: [u8; 4] = [1, 1, 2, 3];
const TYPES: [CacheType; 4] = [
    CacheType::Data,
    CacheType::Instruction,
    CacheType::Unified,
    CacheType::Unified,
];

pub fn decode_associativity(code: u32) -> Option<Associativity> {
    if code == FULLY_ASSOCIATIVE_CODE {
        return Some(Associativity::Full);
    }
    match ASSOCS.get(code as usize) {
        Some(&ways) if ways != 0 => Some(Associativity::Ways(ways)),
        _ => None,
    }
}

/// The L1 descriptors carry the way count itself, 0xff meaning fully
/// associative.
fn decode_l1_associativity(raw: u32) -> Option<Associativity> {
    match raw {
        0 => None,
        0xff => Some(Associativity::Full),
        ways => Some(Associativity::Ways(ways)),
    }
}

/// The four packed descriptor registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyCacheRegisters {
    pub l1d: u32,
    pub l1i: u32,
    pub l2: u32,
    pub l3: u32,
}

impl LegacyCacheRegisters {
    pub fn read<R: CpuIdReader>(reader: &R) -> LegacyCacheRegisters {
        let l1 = reader.cpuid1(LEAF_AMD_L1_CACHE);
        let l2_l3 = reader.cpuid1(LEAF_AMD_L2_L3_CACHE);
        LegacyCacheRegisters {
            l1d: l1.ecx,
            l1i: l1.edx,
            l2: l2_l3.ecx,
            l3: l2_l3.edx,
        }
    }

    /// An L3 is present when its associativity field is not zero.
    pub fn has_l3(&self) -> bool {
        self.l3.get_bits(ASSOC) != 0
    }
}

/// Values the emulation needs from outside the descriptor registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulationInputs {
    /// Errata corrected L2 size; the packed L2 size is not trusted.
    pub l2_size_kb: Option<u32>,
    /// The packed L3 descriptor covers both nodes of the package.
    pub dual_core_module: bool,
    pub cores_per_package: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationError {
    NotPresent,
    /// The L2 leaf was asked for before the corrected size was known.
    MissingL2Size,
}

struct Geometry {
    line_size: u32,
    lines_per_tag: u32,
    associativity: Associativity,
    size_kb: u32,
}

fn geometry(
    index: u32,
    regs: &LegacyCacheRegisters,
    inputs: &EmulationInputs,
) -> Result<Geometry, EmulationError> {
    match index {
        0 | 1 => {
            let l1 = if index == 0 { regs.l1d } else { regs.l1i };
            if l1 == 0 {
                return Err(EmulationError::NotPresent);
            }
            Ok(Geometry {
                line_size: l1.get_bits(L1_LINE_SIZE),
                lines_per_tag: l1.get_bits(L1_LINES_PER_TAG),
                associativity: decode_l1_associativity(l1.get_bits(L1_ASSOC))
                    .ok_or(EmulationError::NotPresent)?,
                size_kb: l1.get_bits(L1_SIZE_KB),
            })
        }
        2 => {
            if regs.l2 == 0 {
                return Err(EmulationError::NotPresent);
            }
            Ok(Geometry {
                line_size: regs.l2.get_bits(LINE_SIZE),
                lines_per_tag: regs.l2.get_bits(LINES_PER_TAG),
                associativity: decode_associativity(regs.l2.get_bits(ASSOC))
                    .ok_or(EmulationError::NotPresent)?,
                size_kb: inputs.l2_size_kb.ok_or(EmulationError::MissingL2Size)?,
            })
        }
        3 => {
            if regs.l3 == 0 {
                return Err(EmulationError::NotPresent);
            }
            let mut associativity = decode_associativity(regs.l3.get_bits(ASSOC))
                .ok_or(EmulationError::NotPresent)?;
            let mut size_kb = regs.l3.get_bits(L3_SIZE_512KB) * 512;
            if inputs.dual_core_module {
                size_kb >>= 1;
                if let Associativity::Ways(ways) = associativity {
                    associativity = Associativity::Ways(ways >> 1);
                }
            }
            Ok(Geometry {
                line_size: regs.l3.get_bits(LINE_SIZE),
                lines_per_tag: regs.l3.get_bits(LINES_PER_TAG),
                associativity,
                size_kb,
            })
        }
        _ => Err(EmulationError::NotPresent),
    }
}

/// Builds the leaf 4 image of cache `index` (0: L1d, 1: L1i, 2: L2, 3: L3).
///
/// A fully associative cache is reported as one way with one set per line,
/// plus the fully associative flag.
pub fn emulate_leaf(
    index: u32,
    regs: &LegacyCacheRegisters,
    inputs: &EmulationInputs,
) -> Result<CacheRegisterSnapshot, EmulationError> {
    let geometry = geometry(index, regs, inputs)?;
    if geometry.line_size == 0 {
        return Err(EmulationError::NotPresent);
    }
    let ways = match geometry.associativity {
        Associativity::Ways(0) => return Err(EmulationError::NotPresent),
        Associativity::Ways(ways) => ways,
        Associativity::Full => 1,
    };
    let sets = (geometry.size_kb as u64 * 1024) / geometry.line_size as u64 / ways as u64;

    let slot = index as usize;
    let mut snapshot = CacheRegisterSnapshot::default();
    snapshot
        .set_self_initializing(true)
        .set_cache_type(TYPES[slot])
        .set_level(LEVELS[slot])
        .set_threads_sharing(1)
        .set_cores_on_die(inputs.cores_per_package)
        .set_fully_associative(geometry.associativity == Associativity::Full)
        .set_line_size(geometry.line_size)
        .set_ways(ways)
        .set_physical_line_partitions(geometry.lines_per_tag)
        .set_sets(sets.min(u32::MAX as u64) as u32);
    Ok(snapshot)
}
