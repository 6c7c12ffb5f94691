use alloc::vec::Vec;

use crate::{CpuInfo, CpuMask, LogicalCpu};

/// What the generic topology code knows about the machine: identification
/// of every possible processor, which ones are online, and the last level
/// cache sharing masks it derived. The cache code only reads this.
#[derive(Clone, Debug, Default)]
pub struct SystemTopology {
    cpus: Vec<Option<CpuInfo>>,
    llc_shared: Vec<CpuMask>,
    online: CpuMask,
}

impl SystemTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cpu(&mut self, cpu: LogicalCpu, info: CpuInfo) {
        if cpu.index >= self.cpus.len() {
            self.cpus.resize(cpu.index + 1, None);
            self.llc_shared.resize(cpu.index + 1, CpuMask::new());
        }
        self.cpus[cpu.index] = Some(info);
    }

    pub fn cpu(&self, cpu: LogicalCpu) -> Option<&CpuInfo> {
        self.cpus.get(cpu.index).and_then(Option::as_ref)
    }

    /// The boot processor is always logical cpu 0.
    pub fn boot_cpu(&self) -> Option<&CpuInfo> {
        self.cpu(LogicalCpu::new(0))
    }

    pub fn possible_cpus(&self) -> impl Iterator<Item = LogicalCpu> + '_ {
        self.cpus
            .iter()
            .enumerate()
            .filter(|(_, info)| info.is_some())
            .map(|(index, _)| LogicalCpu::new(index))
    }

    pub fn set_online(&mut self, cpu: LogicalCpu, online: bool) {
        if online {
            self.online.set(cpu);
        } else {
            self.online.clear(cpu);
        }
    }

    pub fn is_online(&self, cpu: LogicalCpu) -> bool {
        self.online.contains(cpu)
    }

    pub fn online_mask(&self) -> &CpuMask {
        &self.online
    }

    pub fn online_cpus(&self) -> impl Iterator<Item = LogicalCpu> + '_ {
        self.online.iter()
    }

    pub fn set_llc_shared_mask(&mut self, cpu: LogicalCpu, mask: CpuMask) {
        if cpu.index >= self.llc_shared.len() {
            self.llc_shared.resize(cpu.index + 1, CpuMask::new());
        }
        self.llc_shared[cpu.index] = mask;
    }

    /// Processors sharing `cpu`'s last level cache, empty when unknown.
    pub fn llc_shared_mask(&self, cpu: LogicalCpu) -> CpuMask {
        self.llc_shared.get(cpu.index).cloned().unwrap_or_default()
    }
}
