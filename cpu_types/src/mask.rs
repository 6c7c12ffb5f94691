use core::fmt::{Display, Formatter};

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

/// Index of a logical processor, as handed out by the boot / hotplug code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct LogicalCpu {
    pub index: usize,
}

impl LogicalCpu {
    pub const fn new(index: usize) -> Self {
        LogicalCpu { index }
    }
}

impl Display for LogicalCpu {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.index)
    }
}

impl From<usize> for LogicalCpu {
    fn from(index: usize) -> Self {
        LogicalCpu { index }
    }
}

/// A set of logical processors.
///
/// Holds plain indices, never references to per-cpu records, so two
/// processors can appear in each other's masks.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct CpuMask {
    bits: BitVec<usize, Lsb0>,
}

impl CpuMask {
    pub fn new() -> Self {
        CpuMask {
            bits: BitVec::new(),
        }
    }

    pub fn set(&mut self, cpu: LogicalCpu) {
        if cpu.index >= self.bits.len() {
            self.bits.resize(cpu.index + 1, false);
        }
        self.bits.set(cpu.index, true);
    }

    pub fn clear(&mut self, cpu: LogicalCpu) {
        if cpu.index < self.bits.len() {
            self.bits.set(cpu.index, false);
        }
    }

    pub fn contains(&self, cpu: LogicalCpu) -> bool {
        self.bits.get(cpu.index).map_or(false, |bit| *bit)
    }

    /// Lowest numbered processor in the mask.
    pub fn first(&self) -> Option<LogicalCpu> {
        self.bits.first_one().map(LogicalCpu::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = LogicalCpu> + '_ {
        self.bits.iter_ones().map(LogicalCpu::new)
    }

    pub fn weight(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn clear_all(&mut self) {
        self.bits.clear();
    }
}

// Masks of different backing lengths compare by members.
impl PartialEq for CpuMask {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for CpuMask {}

impl FromIterator<LogicalCpu> for CpuMask {
    fn from_iter<I: IntoIterator<Item = LogicalCpu>>(iter: I) -> Self {
        let mut mask = CpuMask::new();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

impl Display for CpuMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        for cpu in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", cpu)?;
            first = false;
        }
        Ok(())
    }
}
