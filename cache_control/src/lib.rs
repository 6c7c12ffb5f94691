#![cfg_attr(feature = "no_std", no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Disabling caches around memory type (MTRR / PAT) reprogramming, and
//! getting every processor through that sequence, including the ones that
//! come online later.

use bitflags::bitflags;
use cpu_types::{CpuMask, LogicalCpu};
use static_assertions::assert_cfg;

assert_cfg!(
    all(
        not(all(feature = "use_std", feature = "no_std")),
        any(feature = "use_std", feature = "no_std")
    ),
    "Choose std or no-std but not both"
);

pub mod controller;
#[cfg(target_arch = "x86_64")]
pub mod native;
pub mod ops;
pub mod rendezvous;
#[cfg(test)]
mod testing;

pub use controller::CacheController;
pub use ops::{CacheControlOps, CacheMode, CR4_PAGE_GLOBAL};
pub use rendezvous::{CacheControlRendezvous, CachesDisabled};

bitflags! {
    /// Memory type mechanisms whose per processor state this code has to
    /// program.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemoryCachingControl: u32 {
        const MTRR = 1 << 0;
        const PAT = 1 << 1;
    }
}

/// The MTRR / PAT code, seen from here.
pub trait MemoryTypeHooks: Sync {
    /// Boot processor setup, returns which mechanisms are in use.
    fn init_boot_processor(&self) -> MemoryCachingControl;
    /// Loads the saved MTRR state into the current processor.
    fn apply_generic_state(&self);
    /// Loads the PAT into the current processor.
    fn apply_page_attribute_state(&self);
    fn enter_reprogramming(&self);
    fn commit_configuration(&self);
}

/// Runs a function on a set of processors, one processor at a time, while
/// all the others in the set wait. Returns once every one has run it.
pub trait StopMachine: Sync {
    fn stop_machine(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync));
    /// Same, called from a processor that is not online yet.
    fn stop_machine_from_inactive_cpu(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync));
}
