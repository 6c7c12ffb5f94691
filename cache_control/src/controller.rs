use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use cpu_types::{CpuFeatures, CpuMask, LogicalCpu};
use log::{debug, info};
use spin::Mutex;

use crate::{
    CacheControlOps, CacheControlRendezvous, MemoryCachingControl, MemoryTypeHooks, StopMachine,
};

/// Per processor memory type setup, at boot, on resume and on hotplug.
///
/// While application processors are being brought up at boot, their setup
/// is deferred and done for all of them at once by
/// [`CacheController::drain_deferred_pass`]. After that, each processor
/// coming online is set up on its own.
///
/// The online / offline callbacks are serialized by the caller, and never
/// run concurrently with the deferred pass.
pub struct CacheController<O, H> {
    ops: O,
    hooks: H,
    /// Boot processor features, the sequence is the same everywhere.
    features: CpuFeatures,
    rendezvous: CacheControlRendezvous,
    control: AtomicU32,
    deferred: AtomicBool,
    participants: Mutex<CpuMask>,
}

impl<O, H> CacheController<O, H>
where
    O: CacheControlOps,
    H: MemoryTypeHooks,
{
    pub fn new(
        ops: O,
        hooks: H,
        features: CpuFeatures,
        boot_cpu: LogicalCpu,
        deferred: bool,
    ) -> Self {
        let mut participants = CpuMask::new();
        participants.set(boot_cpu);
        CacheController {
            ops,
            hooks,
            features,
            rendezvous: CacheControlRendezvous::new(),
            control: AtomicU32::new(MemoryCachingControl::empty().bits()),
            deferred: AtomicBool::new(deferred),
            participants: Mutex::new(participants),
        }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn rendezvous(&self) -> &CacheControlRendezvous {
        &self.rendezvous
    }

    pub fn memory_caching_control(&self) -> MemoryCachingControl {
        MemoryCachingControl::from_bits_truncate(self.control.load(Ordering::Acquire))
    }

    pub fn set_deferred_init(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::Release);
    }

    pub fn deferred_init(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    /// Processors that take part in the rendezvous.
    pub fn participants(&self) -> CpuMask {
        self.participants.lock().clone()
    }

    /// Programs MTRR and PAT state into the calling processor, with caches
    /// disabled and interrupts masked.
    pub fn cache_cpu_init(&self) {
        let control = self.memory_caching_control();
        if control.is_empty() {
            return;
        }
        self.ops.without_interrupts(|| {
            let disabled = self.rendezvous.enter(&self.ops, &self.hooks, self.features);
            if control.contains(MemoryCachingControl::MTRR) {
                self.hooks.apply_generic_state();
            }
            if control.contains(MemoryCachingControl::PAT) {
                self.hooks.apply_page_attribute_state();
            }
            disabled.exit();
        });
    }

    /// Runs on every processor of a rendezvous. Processors already online
    /// only take part in the deferred pass.
    pub fn rendezvous_handler(&self, online: bool) {
        if self.deferred_init() || !online {
            self.cache_cpu_init();
        }
    }

    pub fn boot_processor_init(&self) {
        let control = self.hooks.init_boot_processor();
        self.control.store(control.bits(), Ordering::Release);
        debug!("memory caching control: {:?}", control);
        if !control.is_empty() {
            self.cache_cpu_init();
        }
    }

    /// Resume path of the boot processor.
    pub fn boot_processor_restore(&self) {
        if !self.memory_caching_control().is_empty() {
            self.cache_cpu_init();
        }
    }

    /// `cpu` is starting and not in `online` yet.
    pub fn on_processor_online<S>(&self, cpu: LogicalCpu, online: &CpuMask, stop: &S)
    where
        S: StopMachine + ?Sized,
    {
        let participants = {
            let mut participants = self.participants.lock();
            participants.set(cpu);
            participants.clone()
        };

        if self.memory_caching_control().is_empty() || self.deferred_init() {
            return;
        }

        stop.stop_machine_from_inactive_cpu(&participants, &|c| {
            self.rendezvous_handler(online.contains(c))
        });
    }

    pub fn on_processor_offline(&self, cpu: LogicalCpu) {
        self.participants.lock().clear(cpu);
    }

    /// Sets up every online processor in one rendezvous, then stops
    /// deferring. Does nothing the second time.
    pub fn drain_deferred_pass<S>(&self, online: &CpuMask, stop: &S)
    where
        S: StopMachine + ?Sized,
    {
        if self.memory_caching_control().is_empty() || !self.deferred_init() {
            return;
        }
        info!("setting up caches of {} processors", online.weight());
        stop.stop_machine(online, &|c| self.rendezvous_handler(online.contains(c)));
        self.set_deferred_init(false);
    }
}
