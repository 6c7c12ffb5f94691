use alloc::vec;
use alloc::vec::Vec;

use cpu_types::{CpuFeatures, CpuInfo, CpuMask, LogicalCpu, SystemTopology};
use cpuid::{count_order, CacheRegisterSnapshot};
use itertools::iproduct;
use log::{debug, warn};
use raw_cpuid::CpuIdReader;

use crate::amd_l3::{L3CacheControl, Northbridges};
use crate::{CacheInfoError, CacheLeaf, LeafRegisters, VendorCacheProbe};

/// On AMD the leaf at this index is the L3, whose sharing comes from the
/// last level cache masks of the generic topology code.
const AMD_L3_INDEX: u32 = 3;

/// `apicid >> ceil(log2(threads sharing the cache))`.
///
/// Processors whose APIC ids only differ in the bits shifted out sit behind
/// the same physical cache.
pub fn get_cache_id(apicid: u32, snapshot: &CacheRegisterSnapshot) -> u32 {
    apicid >> count_order(snapshot.threads_sharing())
}

/// Leaves of one processor, indexed by leaf number. A leaf that could not
/// be read stays `None`.
#[derive(Debug, Clone, Default)]
struct CpuCacheInfo {
    leaves: Vec<Option<CacheLeaf>>,
}

/// Cache leaves of every processor that went through discovery.
///
/// Processors are added one at a time, by the processor being brought up,
/// and the caller serializes those calls. Sharing masks refer to other
/// processors by index only.
pub struct CacheTopology {
    probe: Option<VendorCacheProbe>,
    leaf_count: Option<u32>,
    cpus: Vec<Option<CpuCacheInfo>>,
    northbridges: Option<Northbridges>,
}

impl CacheTopology {
    pub fn new(boot_cpu: &CpuInfo) -> CacheTopology {
        Self::with_capacity(boot_cpu, 0)
    }

    pub fn with_capacity(boot_cpu: &CpuInfo, cpus: usize) -> CacheTopology {
        CacheTopology {
            probe: VendorCacheProbe::select(boot_cpu),
            leaf_count: None,
            cpus: Vec::with_capacity(cpus),
            northbridges: None,
        }
    }

    pub fn with_northbridges(mut self, northbridges: Northbridges) -> CacheTopology {
        self.northbridges = Some(northbridges);
        self
    }

    pub fn probe(&self) -> Option<VendorCacheProbe> {
        self.probe
    }

    pub fn northbridges(&self) -> Option<&Northbridges> {
        self.northbridges.as_ref()
    }

    /// Probes leaves 0, 1, 2, ... and returns the first one that is not
    /// present. Leaves that exist but fail to decode still count.
    pub fn discover_leaf_count<R: CpuIdReader>(&self, reader: &R, cpu: &CpuInfo) -> u32 {
        let Some(probe) = self.probe else {
            return 0;
        };
        let mut index = 0;
        while !matches!(
            probe.probe(reader, cpu, index),
            Err(CacheInfoError::NotPresent(_))
        ) {
            index += 1;
        }
        index
    }

    /// Leaf count of the processor family, discovered on first use.
    pub fn leaf_count<R: CpuIdReader>(&mut self, reader: &R, cpu: &CpuInfo) -> u32 {
        if let Some(count) = self.leaf_count {
            return count;
        }
        let count = self.discover_leaf_count(reader, cpu);
        debug!("{} cache leaves", count);
        self.leaf_count = Some(count);
        count
    }

    /// Forgets the cached leaf count, for when the processor family changes
    /// under us (microcode or firmware update).
    pub fn invalidate_leaf_count(&mut self) {
        self.leaf_count = None;
    }

    pub fn init_cache_level<R: CpuIdReader>(
        &mut self,
        reader: &R,
        cpu: &CpuInfo,
    ) -> Result<u32, CacheInfoError> {
        match self.leaf_count(reader, cpu) {
            0 => Err(CacheInfoError::NoEntry),
            count => Ok(count),
        }
    }

    /// Reads leaf `index`, expecting it to exist: a missing leaf is an
    /// [`CacheInfoError::Io`] here.
    ///
    /// L3 leaves on AMD get the northbridge descriptor of their node attached,
    /// computing it on first sight.
    pub fn lookup_leaf<R: CpuIdReader>(
        &self,
        reader: &R,
        cpu: &CpuInfo,
        index: u32,
    ) -> Result<LeafRegisters, CacheInfoError> {
        let probe = self.probe.ok_or(CacheInfoError::Io(index))?;
        let snapshot = probe.probe(reader, cpu, index).map_err(|e| match e {
            CacheInfoError::NotPresent(leaf) => CacheInfoError::Io(leaf),
            e => e,
        })?;

        let mut northbridge = None;
        if probe.has_northbridge() && index >= AMD_L3_INDEX {
            if let Some(northbridges) = &self.northbridges {
                if northbridges.l3_descriptor(cpu.node_id).is_some() {
                    northbridge = Some(cpu.node_id);
                }
            }
        }

        Ok(LeafRegisters {
            snapshot,
            size: snapshot.size(),
            northbridge,
        })
    }

    /// Discovery for `cpu`, run on `cpu` itself (`reader` issues cpuid there).
    ///
    /// Leaves that fail to read are logged and left empty. Sharing masks of
    /// processors discovered earlier are updated to include `cpu`.
    pub fn populate_cache_leaves<R: CpuIdReader>(
        &mut self,
        cpu: LogicalCpu,
        reader: &R,
        topology: &SystemTopology,
    ) -> Result<(), CacheInfoError> {
        let info = topology.cpu(cpu).ok_or(CacheInfoError::NoEntry)?;
        let count = self.init_cache_level(reader, info)?;

        if cpu.index >= self.cpus.len() {
            self.cpus.resize(cpu.index + 1, None);
        }
        self.cpus[cpu.index] = Some(CpuCacheInfo {
            leaves: vec![None; count as usize],
        });

        for index in 0..count {
            let regs = match self.lookup_leaf(reader, info, index) {
                Ok(regs) => regs,
                Err(e) => {
                    warn!("cpu {}: skipping cache leaf {}: {}", cpu, index, e);
                    continue;
                }
            };
            let id = get_cache_id(info.apicid, &regs.snapshot);
            if let Some(slot) = self.slot_mut(cpu, index) {
                *slot = Some(CacheLeaf::new(&regs, id));
            }
            self.build_sharing_map(cpu, index, &regs.snapshot, topology);
        }
        Ok(())
    }

    fn build_sharing_map(
        &mut self,
        cpu: LogicalCpu,
        index: u32,
        snapshot: &CacheRegisterSnapshot,
        topology: &SystemTopology,
    ) {
        let Some(info) = topology.cpu(cpu) else {
            return;
        };
        if info.vendor.is_amd_like() && self.amd_sharing_map(cpu, index, snapshot, info, topology)
        {
            return;
        }

        if let Some(leaf) = self.leaf_mut(cpu, index) {
            leaf.shared_cpu_map.set(cpu);
        }
        let threads = snapshot.threads_sharing();
        if threads == 1 {
            return;
        }
        let index_msb = count_order(threads);
        let group = info.apicid >> index_msb;
        let siblings: Vec<LogicalCpu> = topology
            .online_cpus()
            .filter(|&other| other != cpu && self.leaf(other, index).is_some())
            .filter(|&other| {
                topology
                    .cpu(other)
                    .map_or(false, |o| o.apicid >> index_msb == group)
            })
            .collect();
        for sibling in siblings {
            if let Some(leaf) = self.leaf_mut(cpu, index) {
                leaf.shared_cpu_map.set(sibling);
            }
            if let Some(leaf) = self.leaf_mut(sibling, index) {
                leaf.shared_cpu_map.set(cpu);
            }
        }
    }

    /// Returns false when the generic APIC id matching has to be used.
    fn amd_sharing_map(
        &mut self,
        cpu: LogicalCpu,
        index: u32,
        snapshot: &CacheRegisterSnapshot,
        info: &CpuInfo,
        topology: &SystemTopology,
    ) -> bool {
        // cpu is being brought up and may not be marked online yet
        let mut online = topology.online_mask().clone();
        online.set(cpu);

        let members: CpuMask = if index == AMD_L3_INDEX {
            topology.llc_shared_mask(cpu)
        } else if info.has(CpuFeatures::TOPOEXT) {
            let nshared = snapshot.threads_sharing();
            let first = info.apicid - info.apicid % nshared;
            let last = first + nshared - 1;
            online
                .iter()
                .filter(|&other| {
                    topology
                        .cpu(other)
                        .map_or(false, |o| (first..=last).contains(&o.apicid))
                })
                .collect()
        } else {
            return false;
        };

        let owners: Vec<LogicalCpu> = members
            .iter()
            .filter(|&owner| self.leaf(owner, index).is_some())
            .collect();
        let siblings: Vec<LogicalCpu> = members
            .iter()
            .filter(|&sibling| online.contains(sibling))
            .collect();
        for (owner, sibling) in iproduct!(owners.iter(), siblings.iter()) {
            if let Some(leaf) = self.leaf_mut(*owner, index) {
                leaf.shared_cpu_map.set(*sibling);
            }
        }
        true
    }

    /// Drops `cpu`'s leaves and takes it out of every sibling's sharing mask.
    pub fn remove_cpu(&mut self, cpu: LogicalCpu) {
        let Some(record) = self.cpus.get_mut(cpu.index).and_then(Option::take) else {
            return;
        };
        for (index, leaf) in record.leaves.iter().enumerate() {
            let Some(leaf) = leaf else {
                continue;
            };
            for sibling in leaf.shared_cpu_map.iter().filter(|&s| s != cpu) {
                if let Some(sibling_leaf) = self.leaf_mut(sibling, index as u32) {
                    sibling_leaf.shared_cpu_map.clear(cpu);
                }
            }
        }
    }

    pub fn has_cpu(&self, cpu: LogicalCpu) -> bool {
        matches!(self.cpus.get(cpu.index), Some(Some(_)))
    }

    /// Number of leaf slots of `cpu`, including unreadable ones.
    pub fn num_leaves(&self, cpu: LogicalCpu) -> usize {
        self.record(cpu).map_or(0, |record| record.leaves.len())
    }

    pub fn leaf(&self, cpu: LogicalCpu, index: u32) -> Option<&CacheLeaf> {
        self.record(cpu)?.leaves.get(index as usize)?.as_ref()
    }

    /// Readable leaves of `cpu` with their index.
    pub fn leaves(&self, cpu: LogicalCpu) -> impl Iterator<Item = (u32, &CacheLeaf)> + '_ {
        self.record(cpu)
            .into_iter()
            .flat_map(|record| record.leaves.iter().enumerate())
            .filter_map(|(index, leaf)| leaf.as_ref().map(|leaf| (index as u32, leaf)))
    }

    /// The AMD L3 controls of a leaf, when it has them.
    pub fn l3_control(&self, cpu: LogicalCpu, index: u32) -> Option<L3CacheControl<'_>> {
        L3CacheControl::new(self.northbridges.as_ref()?, self.leaf(cpu, index)?)
    }

    fn record(&self, cpu: LogicalCpu) -> Option<&CpuCacheInfo> {
        self.cpus.get(cpu.index)?.as_ref()
    }

    fn slot_mut(&mut self, cpu: LogicalCpu, index: u32) -> Option<&mut Option<CacheLeaf>> {
        self.cpus
            .get_mut(cpu.index)?
            .as_mut()?
            .leaves
            .get_mut(index as usize)
    }

    fn leaf_mut(&mut self, cpu: LogicalCpu, index: u32) -> Option<&mut CacheLeaf> {
        self.slot_mut(cpu, index)?.as_mut()
    }
}
