#![cfg_attr(feature = "no_std", no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Decoding of the cpuid leaves describing the cache hierarchy.
//!
//! Nothing in here issues cpuid by itself except through a
//! [`raw_cpuid::CpuIdReader`], so every decoder can be fed recorded register
//! values.

extern crate alloc;

use static_assertions::assert_cfg;

assert_cfg!(
    all(
        not(all(feature = "use_std", feature = "no_std")),
        any(feature = "use_std", feature = "no_std")
    ),
    "Choose std or no-std but not both"
);

pub mod amd_legacy;
pub mod cache_leaf;
pub mod descriptors;
pub mod recorded;

pub use cache_leaf::{count_order, Associativity, CacheRegisterSnapshot, CacheType};

/// Legacy cache / TLB descriptor bytes.
pub const LEAF_CACHE_DESCRIPTORS: u32 = 0x02;
/// Deterministic cache parameters (Intel and most others).
pub const LEAF_CACHE_PARAMETERS: u32 = 0x04;
/// L1 data / instruction cache geometry, packed (AMD).
pub const LEAF_AMD_L1_CACHE: u32 = 0x8000_0005;
/// L2 / L3 cache geometry, packed (AMD).
pub const LEAF_AMD_L2_L3_CACHE: u32 = 0x8000_0006;
/// Cache topology, same layout as leaf 4 (AMD with TOPOEXT, Hygon).
pub const LEAF_AMD_CACHE_TOPOLOGY: u32 = 0x8000_001d;
