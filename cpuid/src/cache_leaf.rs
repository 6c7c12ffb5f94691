use core::ops::Range;

use bit_field::BitField;
use raw_cpuid::CpuIdResult;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum CacheType {
    Null = 0,
    Data = 1,
    Instruction = 2,
    Unified = 3,
}

impl CacheType {
    /// Reserved encodings are reported as no cache.
    pub fn from_raw(raw: u32) -> CacheType {
        match raw {
            1 => CacheType::Data,
            2 => CacheType::Instruction,
            3 => CacheType::Unified,
            _ => CacheType::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum Associativity {
    Ways(u32),
    Full,
}

// EAX
const TYPE: Range<usize> = 0..5;
const LEVEL: Range<usize> = 5..8;
const SELF_INIT: usize = 8;
const FULLY_ASSOC: usize = 9;
const THREADS_SHARING: Range<usize> = 14..26; // N - 1
const CORES_ON_DIE: Range<usize> = 26..32;
// EBX
const LINE_SIZE: Range<usize> = 0..12; // N - 1
const PARTITIONS: Range<usize> = 12..22; // N - 1
const WAYS: Range<usize> = 22..32; // N - 1
// ECX holds the number of sets - 1 on all 32 bits

/// Raw registers of one deterministic cache parameters subleaf
/// (cpuid 4, or 0x8000_001d which has the same layout).
///
/// The `N - 1` encoded fields are kept as the hardware reports them, the
/// accessors add the one back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheRegisterSnapshot {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
}

fn put(reg: &mut u32, range: Range<usize>, value: u32) {
    let width = range.end - range.start;
    let mask = if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    };
    reg.set_bits(range, value & mask);
}

impl CacheRegisterSnapshot {
    pub fn from_cpuid(result: CpuIdResult) -> Self {
        CacheRegisterSnapshot {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
        }
    }

    pub fn cache_type(&self) -> CacheType {
        CacheType::from_raw(self.eax.get_bits(TYPE))
    }

    pub fn level(&self) -> u8 {
        self.eax.get_bits(LEVEL) as u8
    }

    pub fn is_self_initializing(&self) -> bool {
        self.eax.get_bit(SELF_INIT)
    }

    pub fn is_fully_associative(&self) -> bool {
        self.eax.get_bit(FULLY_ASSOC)
    }

    /// Number of logical processors sharing this cache, as reported
    /// (hardware encodes N - 1, this is N).
    pub fn threads_sharing(&self) -> u32 {
        self.eax.get_bits(THREADS_SHARING) + 1
    }

    /// Raw cores-on-die field. Leaf 4 encodes N - 1 here, the AMD emulation
    /// stores the core count itself.
    pub fn cores_on_die(&self) -> u32 {
        self.eax.get_bits(CORES_ON_DIE)
    }

    pub fn line_size(&self) -> u32 {
        self.ebx.get_bits(LINE_SIZE) + 1
    }

    pub fn physical_line_partitions(&self) -> u32 {
        self.ebx.get_bits(PARTITIONS) + 1
    }

    pub fn ways(&self) -> u32 {
        self.ebx.get_bits(WAYS) + 1
    }

    pub fn associativity(&self) -> Associativity {
        if self.is_fully_associative() {
            Associativity::Full
        } else {
            Associativity::Ways(self.ways())
        }
    }

    pub fn sets(&self) -> u64 {
        self.ecx as u64 + 1
    }

    /// sets * line size * partitions * ways, in bytes.
    pub fn size(&self) -> u64 {
        self.sets()
            * self.line_size() as u64
            * self.physical_line_partitions() as u64
            * self.ways() as u64
    }

    pub fn set_cache_type(&mut self, cache_type: CacheType) -> &mut Self {
        put(&mut self.eax, TYPE, cache_type as u32);
        self
    }

    pub fn set_level(&mut self, level: u8) -> &mut Self {
        put(&mut self.eax, LEVEL, level as u32);
        self
    }

    pub fn set_self_initializing(&mut self, value: bool) -> &mut Self {
        self.eax.set_bit(SELF_INIT, value);
        self
    }

    pub fn set_fully_associative(&mut self, value: bool) -> &mut Self {
        self.eax.set_bit(FULLY_ASSOC, value);
        self
    }

    pub fn set_threads_sharing(&mut self, threads: u32) -> &mut Self {
        put(&mut self.eax, THREADS_SHARING, threads.saturating_sub(1));
        self
    }

    pub fn set_cores_on_die(&mut self, raw: u32) -> &mut Self {
        put(&mut self.eax, CORES_ON_DIE, raw);
        self
    }

    pub fn set_line_size(&mut self, bytes: u32) -> &mut Self {
        put(&mut self.ebx, LINE_SIZE, bytes.saturating_sub(1));
        self
    }

    pub fn set_physical_line_partitions(&mut self, partitions: u32) -> &mut Self {
        put(&mut self.ebx, PARTITIONS, partitions.saturating_sub(1));
        self
    }

    pub fn set_ways(&mut self, ways: u32) -> &mut Self {
        put(&mut self.ebx, WAYS, ways.saturating_sub(1));
        self
    }

    pub fn set_sets(&mut self, sets: u32) -> &mut Self {
        self.ecx = sets.saturating_sub(1);
        self
    }
}

/// ceil(log2(n)), 0 for n <= 1.
pub fn count_order(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        u32::BITS - (n - 1).leading_zeros()
    }
}
