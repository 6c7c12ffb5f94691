use cpu_types::CpuFeatures;
use log::warn;
use spin::{Mutex, MutexGuard};

use crate::{CacheControlOps, CacheMode, MemoryTypeHooks, CR4_PAGE_GLOBAL};

struct RendezvousState {
    saved_cr4: u64,
}

/// Machine wide lock held while a processor runs with caches disabled.
///
/// Only one processor at a time may be in no fill mode changing its memory
/// type state; the others spin in [`CacheControlRendezvous::enter`].
pub struct CacheControlRendezvous {
    state: Mutex<RendezvousState>,
}

impl Default for CacheControlRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheControlRendezvous {
    pub const fn new() -> Self {
        CacheControlRendezvous {
            state: Mutex::new(RendezvousState { saved_cr4: 0 }),
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.state.is_locked()
    }

    /// Takes the lock, puts the calling processor in no fill mode, and
    /// flushes its caches and TLB.
    ///
    /// Interrupts must already be masked and stay masked until the returned
    /// guard is dropped: running with caches disabled and interrupts
    /// enabled is dramatically slow.
    pub fn enter<'a, O, H>(
        &'a self,
        ops: &'a O,
        hooks: &'a H,
        features: CpuFeatures,
    ) -> CachesDisabled<'a, O, H>
    where
        O: CacheControlOps,
        H: MemoryTypeHooks + ?Sized,
    {
        if ops.interrupts_enabled() {
            warn!("disabling caches with interrupts enabled");
        }
        let mut state = self.state.lock();

        ops.set_cache_mode(CacheMode::NoFill);
        // a self snooping processor keeps its caches coherent on its own
        let flush = !features.contains(CpuFeatures::SELF_SNOOP);
        if flush {
            ops.wbinvd();
        }

        if features.contains(CpuFeatures::PGE) {
            state.saved_cr4 = ops.read_cr4();
            ops.write_cr4(state.saved_cr4 & !CR4_PAGE_GLOBAL);
        }

        ops.flush_tlb_local();

        if features.contains(CpuFeatures::MTRR) {
            hooks.enter_reprogramming();
        }

        if flush {
            ops.wbinvd();
        }

        CachesDisabled {
            state,
            ops,
            hooks,
            features,
        }
    }
}

/// A processor in no fill mode holding the rendezvous lock. Dropping it
/// restores normal caching and releases the lock.
pub struct CachesDisabled<'a, O, H>
where
    O: CacheControlOps,
    H: MemoryTypeHooks + ?Sized,
{
    state: MutexGuard<'a, RendezvousState>,
    ops: &'a O,
    hooks: &'a H,
    features: CpuFeatures,
}

impl<'a, O, H> CachesDisabled<'a, O, H>
where
    O: CacheControlOps,
    H: MemoryTypeHooks + ?Sized,
{
    pub fn exit(self) {}
}

impl<'a, O, H> Drop for CachesDisabled<'a, O, H>
where
    O: CacheControlOps,
    H: MemoryTypeHooks + ?Sized,
{
    fn drop(&mut self) {
        // caches are off, only the TLB needs flushing
        self.ops.flush_tlb_local();

        if self.features.contains(CpuFeatures::MTRR) {
            self.hooks.commit_configuration();
        }

        self.ops.set_cache_mode(CacheMode::Normal);

        if self.features.contains(CpuFeatures::PGE) {
            self.ops.write_cr4(self.state.saved_cr4);
        }
    }
}
