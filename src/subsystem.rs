use cache_control::{CacheControlOps, CacheController, MemoryTypeHooks, StopMachine};
use cache_info::amd_l3::{L3CacheControl, Northbridges, Privilege};
use cache_info::{CacheInfoError, CacheLeaf, CacheSummary, CacheTopology};
use cpu_types::{CpuInfo, LogicalCpu, SystemTopology};
use log::info;
use raw_cpuid::CpuIdReader;
use spin::Mutex;

use crate::Config;

/// Cache leaves of every processor plus the cache control state.
///
/// The hotplug code calls `processor_starting` on a processor before it is
/// marked online, `processor_online` on it once it is, and
/// `processor_offline` when it goes away; those calls never overlap.
pub struct CacheSubsystem<O, H, S> {
    config: Config,
    topology: Mutex<CacheTopology>,
    controller: CacheController<O, H>,
    stop: S,
}

impl<O, H, S> CacheSubsystem<O, H, S>
where
    O: CacheControlOps,
    H: MemoryTypeHooks,
    S: StopMachine,
{
    /// `system` must know the boot processor (logical cpu 0).
    pub fn new(
        config: Config,
        system: &SystemTopology,
        ops: O,
        hooks: H,
        stop: S,
    ) -> Result<Self, CacheInfoError> {
        let boot = system.boot_cpu().ok_or(CacheInfoError::NoEntry)?;
        let topology = CacheTopology::with_capacity(boot, config.max_cpus);
        let controller = CacheController::new(
            ops,
            hooks,
            boot.features,
            LogicalCpu::new(0),
            config.defer_ap_init,
        );
        Ok(CacheSubsystem {
            config,
            topology: Mutex::new(topology),
            controller,
            stop,
        })
    }

    /// Attaches the AMD northbridges. Only leaves discovered afterwards get
    /// L3 controls.
    pub fn with_northbridges(self, northbridges: Northbridges) -> Self {
        let topology = self.topology.into_inner().with_northbridges(northbridges);
        CacheSubsystem {
            topology: Mutex::new(topology),
            ..self
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &CacheController<O, H> {
        &self.controller
    }

    pub fn boot_processor_init(&self) {
        self.controller.boot_processor_init();
    }

    pub fn boot_processor_restore(&self) {
        self.controller.boot_processor_restore();
    }

    /// Early bring up of `cpu`, on `cpu`, before it is online.
    pub fn processor_starting(&self, cpu: LogicalCpu, system: &SystemTopology) {
        let mut online = system.online_mask().clone();
        online.clear(cpu);
        self.controller
            .on_processor_online(cpu, &online, &self.stop);
    }

    /// Cache discovery for `cpu`; `reader` issues cpuid on `cpu`.
    pub fn processor_online<R: CpuIdReader>(
        &self,
        cpu: LogicalCpu,
        reader: &R,
        system: &SystemTopology,
    ) -> Result<(), CacheInfoError> {
        self.topology
            .lock()
            .populate_cache_leaves(cpu, reader, system)
    }

    pub fn processor_offline(&self, cpu: LogicalCpu) {
        self.topology.lock().remove_cpu(cpu);
        self.controller.on_processor_offline(cpu);
    }

    /// Deferred setup of the application processors, once all of them are
    /// online.
    pub fn aps_init(&self, system: &SystemTopology) {
        if self.controller.deferred_init() {
            info!("deferred cache setup");
        }
        self.controller
            .drain_deferred_pass(system.online_mask(), &self.stop);
    }

    pub fn with_topology<T>(&self, f: impl FnOnce(&CacheTopology) -> T) -> T {
        f(&self.topology.lock())
    }

    pub fn leaf(&self, cpu: LogicalCpu, index: u32) -> Option<CacheLeaf> {
        self.with_topology(|topology| topology.leaf(cpu, index).cloned())
    }

    pub fn leaves(&self, cpu: LogicalCpu) -> Vec<CacheLeaf> {
        self.with_topology(|topology| {
            topology
                .leaves(cpu)
                .map(|(_, leaf)| leaf.clone())
                .collect()
        })
    }

    pub fn intel_cache_summary<R: CpuIdReader>(&self, reader: &R, cpu: &CpuInfo) -> CacheSummary {
        self.topology.lock().intel_cache_summary(reader, cpu)
    }

    fn with_l3<T>(
        &self,
        cpu: LogicalCpu,
        index: u32,
        f: impl FnOnce(&L3CacheControl<'_>) -> Result<T, CacheInfoError>,
    ) -> Result<T, CacheInfoError> {
        self.with_topology(|topology| {
            let control = topology
                .l3_control(cpu, index)
                .ok_or(CacheInfoError::Unsupported)?;
            f(&control)
        })
    }

    pub fn show_cache_disable(
        &self,
        cpu: LogicalCpu,
        index: u32,
        slot: usize,
    ) -> Result<String, CacheInfoError> {
        self.with_l3(cpu, index, |l3| l3.show_cache_disable(slot))
    }

    pub fn store_cache_disable(
        &self,
        cpu: LogicalCpu,
        index: u32,
        slot: usize,
        text: &str,
        privilege: Privilege,
    ) -> Result<(), CacheInfoError> {
        self.with_l3(cpu, index, |l3| l3.store_cache_disable(slot, text, privilege))
    }

    pub fn show_subcaches(&self, cpu: LogicalCpu, index: u32) -> Result<String, CacheInfoError> {
        self.with_l3(cpu, index, |l3| l3.show_subcaches())
    }

    pub fn store_subcaches(
        &self,
        cpu: LogicalCpu,
        index: u32,
        text: &str,
        privilege: Privilege,
    ) -> Result<(), CacheInfoError> {
        self.with_l3(cpu, index, |l3| l3.store_subcaches(text, privilege))
    }
}
