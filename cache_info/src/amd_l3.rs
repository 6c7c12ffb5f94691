//! AMD L3 index disable and subcache partitioning, through the northbridge
//! configuration space of the node owning the cache.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use alloc::format;
use core::ops::Range;

use bit_field::BitField;
use bitflags::bitflags;
use cpu_types::LogicalCpu;
use log::warn;
use spin::Once;

use crate::{CacheInfoError, CacheLeaf};

const L3_CONFIG: u32 = 0x1c4;
/// Slot 0, slot 1 is the next register.
const L3_DISABLE_SLOT: u32 = 0x1bc;

const SLOT_STATE: Range<usize> = 30..32;
const SLOT_INDEX: Range<usize> = 0..12;
const SLOT_ACTIVE: u32 = 1 << 30;
const SLOT_VALID: u32 = 1 << 31;
const SUBCACHE_SHIFT: u32 = 20;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NorthbridgeFeatures: u32 {
        const L3_INDEX_DISABLE = 1 << 0;
        const L3_PARTITIONING = 1 << 1;
    }
}

/// Access to the northbridges, provided by the chipset code.
pub trait NorthbridgeBus: Send + Sync {
    fn read_config(&self, node: u32, register: u32) -> u32;
    fn write_config(&self, node: u32, register: u32, value: u32);
    fn features(&self) -> NorthbridgeFeatures;
    /// Subcache partition mask of the compute unit of `cpu`.
    fn subcaches(&self, cpu: LogicalCpu) -> u32;
    fn set_subcaches(&self, cpu: LogicalCpu, mask: u32) -> Result<(), CacheInfoError>;
    /// Write back and invalidate every cache of `cpu`, on `cpu`, and wait
    /// for it.
    fn wbinvd_on_cpu(&self, cpu: LogicalCpu);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct L3Descriptor {
    /// Enabled subcaches per quadrant.
    pub subcaches: [u8; 4],
    /// Highest index that can be disabled.
    pub indices: u32,
}

impl L3Descriptor {
    pub fn from_config(config: u32, family: u8) -> L3Descriptor {
        let off = |bit: usize| !config.get_bit(bit) as u8;
        let mut subcaches = [off(0), off(4), off(8) + off(9), off(12) + off(13)];
        if family == 0x15 {
            subcaches[0] += off(1);
            subcaches[1] += off(5);
        }
        let largest = subcaches.iter().copied().max().unwrap_or(0) as u32;
        L3Descriptor {
            subcaches,
            indices: (largest << 10).saturating_sub(1),
        }
    }
}

/// The northbridges of the machine, one per node, and their L3 descriptors
/// computed on first use.
pub struct Northbridges {
    bus: Arc<dyn NorthbridgeBus>,
    family: u8,
    l3: Vec<Once<L3Descriptor>>,
}

impl Northbridges {
    pub fn new(bus: Arc<dyn NorthbridgeBus>, family: u8, nodes: usize) -> Northbridges {
        Northbridges {
            bus,
            family,
            l3: (0..nodes).map(|_| Once::new()).collect(),
        }
    }

    pub fn bus(&self) -> &dyn NorthbridgeBus {
        self.bus.as_ref()
    }

    pub fn features(&self) -> NorthbridgeFeatures {
        self.bus.features()
    }

    /// `None` for a node without a northbridge.
    pub fn l3_descriptor(&self, node: u32) -> Option<&L3Descriptor> {
        let cell = self.l3.get(node as usize)?;
        Some(cell.call_once(|| {
            L3Descriptor::from_config(self.bus.read_config(node, L3_CONFIG), self.family)
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User,
    Admin,
}

/// Which of the controls exist for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L3Attributes {
    pub cache_disable: bool,
    pub subcaches: bool,
}

/// The L3 controls of one cache leaf.
pub struct L3CacheControl<'a> {
    northbridges: &'a Northbridges,
    node: u32,
    descriptor: &'a L3Descriptor,
    /// Flushes have to run on a processor behind this cache.
    representative: LogicalCpu,
}

fn slot_register(slot: usize) -> Result<u32, CacheInfoError> {
    match slot {
        0 | 1 => Ok(L3_DISABLE_SLOT + 4 * slot as u32),
        _ => Err(CacheInfoError::InvalidArgument),
    }
}

impl<'a> L3CacheControl<'a> {
    /// Only an L3 with a northbridge and a non zero index count has
    /// controls.
    pub fn new(northbridges: &'a Northbridges, leaf: &CacheLeaf) -> Option<L3CacheControl<'a>> {
        if leaf.level < 3 {
            return None;
        }
        let node = leaf.northbridge?;
        let descriptor = northbridges.l3_descriptor(node)?;
        if descriptor.indices == 0 {
            return None;
        }
        Some(L3CacheControl {
            northbridges,
            node,
            descriptor,
            representative: leaf.shared_cpu_map.first()?,
        })
    }

    pub fn attributes(&self) -> L3Attributes {
        let features = self.northbridges.features();
        L3Attributes {
            cache_disable: features.contains(NorthbridgeFeatures::L3_INDEX_DISABLE),
            subcaches: features.contains(NorthbridgeFeatures::L3_PARTITIONING),
        }
    }

    pub fn descriptor(&self) -> &L3Descriptor {
        self.descriptor
    }

    /// Index disabled through `slot`, if the slot is in use.
    pub fn disable_slot(&self, slot: usize) -> Result<Option<u32>, CacheInfoError> {
        let reg = self
            .northbridges
            .bus()
            .read_config(self.node, slot_register(slot)?);
        if reg.get_bits(SLOT_STATE) != 0 {
            Ok(Some(reg.get_bits(SLOT_INDEX)))
        } else {
            Ok(None)
        }
    }

    pub fn set_disable_slot(&self, slot: usize, index: u32) -> Result<(), CacheInfoError> {
        if self.disable_slot(slot)?.is_some() {
            return Err(CacheInfoError::AlreadyExists);
        }
        if index > self.descriptor.indices {
            return Err(CacheInfoError::InvalidArgument);
        }
        if self.disable_slot(1 - slot)? == Some(index) {
            return Err(CacheInfoError::AlreadyExists);
        }
        self.disable_index(slot, index);
        Ok(())
    }

    // Once per present subcache: arm, flush from inside the node, validate.
    fn disable_index(&self, slot: usize, index: u32) {
        let register = L3_DISABLE_SLOT + 4 * slot as u32;
        let bus = self.northbridges.bus();
        let index = index | SLOT_ACTIVE;
        for (quadrant, &present) in self.descriptor.subcaches.iter().enumerate() {
            if present == 0 {
                continue;
            }
            let mut value = index | (quadrant as u32) << SUBCACHE_SHIFT;
            bus.write_config(self.node, register, value);
            bus.wbinvd_on_cpu(self.representative);
            value |= SLOT_VALID;
            bus.write_config(self.node, register, value);
        }
    }

    fn check(visible: bool, privilege: Option<Privilege>) -> Result<(), CacheInfoError> {
        if !visible {
            return Err(CacheInfoError::Unsupported);
        }
        match privilege {
            Some(Privilege::User) => Err(CacheInfoError::PermissionDenied),
            _ => Ok(()),
        }
    }

    /// Decimal index, or `FREE`.
    pub fn show_cache_disable(&self, slot: usize) -> Result<String, CacheInfoError> {
        Self::check(self.attributes().cache_disable, None)?;
        Ok(match self.disable_slot(slot)? {
            Some(index) => index.to_string(),
            None => String::from("FREE"),
        })
    }

    pub fn store_cache_disable(
        &self,
        slot: usize,
        text: &str,
        privilege: Privilege,
    ) -> Result<(), CacheInfoError> {
        Self::check(self.attributes().cache_disable, Some(privilege))?;
        let index: u32 = text
            .trim()
            .parse()
            .map_err(|_| CacheInfoError::InvalidArgument)?;
        let result = self.set_disable_slot(slot, index);
        if result == Err(CacheInfoError::AlreadyExists) {
            warn!("L3 slot {} in use/index already disabled!", slot);
        }
        result
    }

    /// Lowercase hex.
    pub fn show_subcaches(&self) -> Result<String, CacheInfoError> {
        Self::check(self.attributes().subcaches, None)?;
        Ok(format!(
            "{:x}",
            self.northbridges.bus().subcaches(self.representative)
        ))
    }

    pub fn store_subcaches(&self, text: &str, privilege: Privilege) -> Result<(), CacheInfoError> {
        Self::check(self.attributes().subcaches, Some(privilege))?;
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let mask =
            u32::from_str_radix(digits, 16).map_err(|_| CacheInfoError::InvalidArgument)?;
        self.northbridges
            .bus()
            .set_subcaches(self.representative, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use cpu_types::CpuMask;
    use cpuid::{CacheRegisterSnapshot, CacheType};
    use spin::Mutex;

    use crate::LeafRegisters;

    struct FakeBus {
        features: NorthbridgeFeatures,
        registers: Mutex<BTreeMap<(u32, u32), u32>>,
        writes: Mutex<Vec<(u32, u32)>>,
        flushes: Mutex<Vec<LogicalCpu>>,
        subcaches: Mutex<u32>,
    }

    impl FakeBus {
        fn new(features: NorthbridgeFeatures, config: u32) -> Arc<FakeBus> {
            let mut registers = BTreeMap::new();
            registers.insert((0, L3_CONFIG), config);
            Arc::new(FakeBus {
                features,
                registers: Mutex::new(registers),
                writes: Mutex::new(Vec::new()),
                flushes: Mutex::new(Vec::new()),
                subcaches: Mutex::new(0xf),
            })
        }
    }

    impl NorthbridgeBus for FakeBus {
        fn read_config(&self, node: u32, register: u32) -> u32 {
            self.registers
                .lock()
                .get(&(node, register))
                .copied()
                .unwrap_or(0)
        }

        fn write_config(&self, node: u32, register: u32, value: u32) {
            self.registers.lock().insert((node, register), value);
            self.writes.lock().push((register, value));
        }

        fn features(&self) -> NorthbridgeFeatures {
            self.features
        }

        fn subcaches(&self, _cpu: LogicalCpu) -> u32 {
            *self.subcaches.lock()
        }

        fn set_subcaches(&self, _cpu: LogicalCpu, mask: u32) -> Result<(), CacheInfoError> {
            if mask > 0xf {
                return Err(CacheInfoError::InvalidArgument);
            }
            *self.subcaches.lock() = mask;
            Ok(())
        }

        fn wbinvd_on_cpu(&self, cpu: LogicalCpu) {
            self.flushes.lock().push(cpu);
        }
    }

    fn l3_leaf(level: u8, northbridge: Option<u32>) -> CacheLeaf {
        let mut snapshot = CacheRegisterSnapshot::default();
        snapshot
            .set_cache_type(CacheType::Unified)
            .set_level(level)
            .set_line_size(64)
            .set_ways(16)
            .set_sets(4096);
        let regs = LeafRegisters {
            snapshot,
            size: snapshot.size(),
            northbridge,
        };
        let mut leaf = CacheLeaf::new(&regs, 0);
        leaf.shared_cpu_map = [2, 3].into_iter().map(LogicalCpu::new).collect::<CpuMask>();
        leaf
    }

    fn all_features() -> NorthbridgeFeatures {
        NorthbridgeFeatures::L3_INDEX_DISABLE | NorthbridgeFeatures::L3_PARTITIONING
    }

    #[test]
    fn descriptor_from_config() {
        assert_eq!(
            L3Descriptor::from_config(0, 0x10),
            L3Descriptor {
                subcaches: [1, 1, 2, 2],
                indices: 2047
            }
        );
        assert_eq!(L3Descriptor::from_config(0, 0x15).subcaches, [2, 2, 2, 2]);
        // every subcache disabled
        assert_eq!(
            L3Descriptor::from_config(0x3333, 0x15),
            L3Descriptor {
                subcaches: [0, 0, 0, 0],
                indices: 0
            }
        );
        assert_eq!(L3Descriptor::from_config(0x3300, 0x10).indices, 1023);
    }

    #[test]
    fn descriptor_is_read_once_per_node() {
        let bus = FakeBus::new(all_features(), 0);
        let northbridges = Northbridges::new(bus.clone(), 0x10, 1);
        assert_eq!(northbridges.l3_descriptor(0).map(|d| d.indices), Some(2047));
        bus.registers.lock().insert((0, L3_CONFIG), 0x3333);
        assert_eq!(northbridges.l3_descriptor(0).map(|d| d.indices), Some(2047));
        assert!(northbridges.l3_descriptor(1).is_none());
    }

    #[test]
    fn controls_need_an_l3_with_a_northbridge() {
        let northbridges = Northbridges::new(FakeBus::new(all_features(), 0), 0x10, 1);
        assert!(L3CacheControl::new(&northbridges, &l3_leaf(2, Some(0))).is_none());
        assert!(L3CacheControl::new(&northbridges, &l3_leaf(3, None)).is_none());
        assert!(L3CacheControl::new(&northbridges, &l3_leaf(3, Some(0))).is_some());

        let disabled = Northbridges::new(FakeBus::new(all_features(), 0x3333), 0x15, 1);
        assert!(L3CacheControl::new(&disabled, &l3_leaf(3, Some(0))).is_none());
    }

    #[test]
    fn slot_conflicts() {
        let northbridges = Northbridges::new(FakeBus::new(all_features(), 0), 0x10, 1);
        let leaf = l3_leaf(3, Some(0));
        let control = L3CacheControl::new(&northbridges, &leaf).unwrap();

        assert_eq!(control.show_cache_disable(1).unwrap(), "FREE");
        control.store_cache_disable(0, "5\n", Privilege::Admin).unwrap();
        assert_eq!(control.show_cache_disable(0).unwrap(), "5");
        assert_eq!(
            control.store_cache_disable(1, "5", Privilege::Admin),
            Err(CacheInfoError::AlreadyExists)
        );
        assert_eq!(
            control.store_cache_disable(1, "9000", Privilege::Admin),
            Err(CacheInfoError::InvalidArgument)
        );
        assert_eq!(
            control.store_cache_disable(0, "6", Privilege::Admin),
            Err(CacheInfoError::AlreadyExists)
        );
        assert_eq!(control.show_cache_disable(1).unwrap(), "FREE");
        control.store_cache_disable(1, "2047", Privilege::Admin).unwrap();
        assert_eq!(control.disable_slot(1), Ok(Some(2047)));
        assert_eq!(control.disable_slot(2), Err(CacheInfoError::InvalidArgument));
    }

    #[test]
    fn writes_need_privilege_and_valid_text() {
        let northbridges = Northbridges::new(FakeBus::new(all_features(), 0), 0x10, 1);
        let leaf = l3_leaf(3, Some(0));
        let control = L3CacheControl::new(&northbridges, &leaf).unwrap();
        assert_eq!(
            control.store_cache_disable(0, "5", Privilege::User),
            Err(CacheInfoError::PermissionDenied)
        );
        assert_eq!(
            control.store_cache_disable(0, "five", Privilege::Admin),
            Err(CacheInfoError::InvalidArgument)
        );
        assert_eq!(
            control.store_subcaches("3", Privilege::User),
            Err(CacheInfoError::PermissionDenied)
        );
        assert_eq!(control.show_cache_disable(0).unwrap(), "FREE");
    }

    #[test]
    fn disabling_walks_the_present_subcaches() {
        // subcache 0 is off
        let bus = FakeBus::new(all_features(), 0x1);
        let northbridges = Northbridges::new(bus.clone(), 0x10, 1);
        let leaf = l3_leaf(3, Some(0));
        let control = L3CacheControl::new(&northbridges, &leaf).unwrap();
        control.set_disable_slot(1, 12).unwrap();

        let slot1 = L3_DISABLE_SLOT + 4;
        let armed = 12 | SLOT_ACTIVE;
        assert_eq!(
            *bus.writes.lock(),
            [
                (slot1, armed | 1 << 20),
                (slot1, armed | 1 << 20 | SLOT_VALID),
                (slot1, armed | 2 << 20),
                (slot1, armed | 2 << 20 | SLOT_VALID),
                (slot1, armed | 3 << 20),
                (slot1, armed | 3 << 20 | SLOT_VALID),
            ]
        );
        assert_eq!(*bus.flushes.lock(), [LogicalCpu::new(2); 3]);
    }

    #[test]
    fn subcaches_in_hex() {
        let bus = FakeBus::new(all_features(), 0);
        let northbridges = Northbridges::new(bus.clone(), 0x15, 1);
        let leaf = l3_leaf(3, Some(0));
        let control = L3CacheControl::new(&northbridges, &leaf).unwrap();
        assert_eq!(control.show_subcaches().unwrap(), "f");
        control.store_subcaches("0xa", Privilege::Admin).unwrap();
        assert_eq!(control.show_subcaches().unwrap(), "a");
        assert_eq!(
            control.store_subcaches("1f", Privilege::Admin),
            Err(CacheInfoError::InvalidArgument)
        );
        assert_eq!(
            control.store_subcaches("zz", Privilege::Admin),
            Err(CacheInfoError::InvalidArgument)
        );
    }

    #[test]
    fn controls_follow_northbridge_features() {
        let northbridges = Northbridges::new(
            FakeBus::new(NorthbridgeFeatures::L3_PARTITIONING, 0),
            0x15,
            1,
        );
        let leaf = l3_leaf(3, Some(0));
        let control = L3CacheControl::new(&northbridges, &leaf).unwrap();
        assert_eq!(
            control.attributes(),
            L3Attributes {
                cache_disable: false,
                subcaches: true
            }
        );
        assert_eq!(control.show_cache_disable(0), Err(CacheInfoError::Unsupported));
        assert_eq!(
            control.store_cache_disable(0, "1", Privilege::Admin),
            Err(CacheInfoError::Unsupported)
        );
        assert!(control.show_subcaches().is_ok());
    }
}
