use cpu_types::CpuMask;
use cpuid::{Associativity, CacheRegisterSnapshot, CacheType};
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

/// What a successful leaf lookup yields before it becomes a [`CacheLeaf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRegisters {
    pub snapshot: CacheRegisterSnapshot,
    /// In bytes, `sets * line size * partitions * ways`.
    pub size: u64,
    /// Northbridge node whose L3 descriptor was attached to this leaf.
    pub northbridge: Option<u32>,
}

/// One cache instance as seen from one logical processor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct CacheLeaf {
    /// Equal for every processor observing the same physical instance.
    pub id: u32,
    pub level: u8,
    pub cache_type: CacheType,
    pub coherency_line_size: u32,
    /// Way count as reported. A fully associative cache keeps the value used
    /// in the size product here and says so in `associativity`.
    pub ways_of_associativity: u32,
    pub associativity: Associativity,
    pub number_of_sets: u64,
    pub physical_line_partition: u32,
    pub size: u64,
    pub shared_cpu_map: CpuMask,
    pub northbridge: Option<u32>,
}

impl CacheLeaf {
    pub fn new(regs: &LeafRegisters, id: u32) -> CacheLeaf {
        let snapshot = &regs.snapshot;
        CacheLeaf {
            id,
            level: snapshot.level(),
            cache_type: snapshot.cache_type(),
            coherency_line_size: snapshot.line_size(),
            ways_of_associativity: snapshot.ways(),
            associativity: snapshot.associativity(),
            number_of_sets: snapshot.sets(),
            physical_line_partition: snapshot.physical_line_partitions(),
            size: regs.size,
            shared_cpu_map: CpuMask::new(),
            northbridge: regs.northbridge,
        }
    }

    pub fn size_kb(&self) -> u32 {
        (self.size / 1024) as u32
    }
}
