#![cfg_attr(feature = "no_std", no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Per processor cache hierarchy: which caches a logical processor sees, their
//! geometry, and which other processors share each of them.
//!
//! Discovery runs on the processor being described, through a
//! [`raw_cpuid::CpuIdReader`] for that processor. The cross processor part
//! (sharing masks) reads the identification the generic topology code
//! collected in a [`cpu_types::SystemTopology`].

extern crate alloc;

use static_assertions::assert_cfg;

assert_cfg!(
    all(
        not(all(feature = "use_std", feature = "no_std")),
        any(feature = "use_std", feature = "no_std")
    ),
    "Choose std or no-std but not both"
);

pub mod amd_l3;
mod error;
pub mod leaf;
pub mod probe;
pub mod summary;
pub mod topology;

pub use error::CacheInfoError;
pub use leaf::{CacheLeaf, LeafRegisters};
pub use probe::VendorCacheProbe;
pub use summary::{amd_llc_id, hygon_llc_id, CacheSummary};
pub use topology::{get_cache_id, CacheTopology};
