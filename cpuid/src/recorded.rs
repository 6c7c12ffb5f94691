use alloc::collections::BTreeMap;
use raw_cpuid::{CpuIdReader, CpuIdResult};

/// A cpuid "processor" answering from a register dump.
///
/// Leaves that were not recorded read as all zero, like leaves above the
/// maximum supported one on real hardware.
#[derive(Debug, Clone, Default)]
pub struct RecordedCpuid {
    leaves: BTreeMap<(u32, u32), [u32; 4]>,
}

impl RecordedCpuid {
    pub fn new() -> Self {
        Self::default()
    }

    /// `regs` is `[eax, ebx, ecx, edx]`.
    pub fn insert(&mut self, leaf: u32, subleaf: u32, regs: [u32; 4]) {
        self.leaves.insert((leaf, subleaf), regs);
    }

    pub fn with(mut self, leaf: u32, subleaf: u32, regs: [u32; 4]) -> Self {
        self.insert(leaf, subleaf, regs);
        self
    }
}

impl CpuIdReader for RecordedCpuid {
    fn cpuid2(&self, eax: u32, ecx: u32) -> CpuIdResult {
        let [a, b, c, d] = self.leaves.get(&(eax, ecx)).copied().unwrap_or_default();
        CpuIdResult {
            eax: a,
            ebx: b,
            ecx: c,
            edx: d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_leaves_read_zero() {
        let cpuid = RecordedCpuid::new().with(4, 1, [1, 2, 3, 4]);
        let r = cpuid.cpuid2(4, 1);
        assert_eq!((r.eax, r.ebx, r.ecx, r.edx), (1, 2, 3, 4));
        let r = cpuid.cpuid2(4, 2);
        assert_eq!((r.eax, r.ebx, r.ecx, r.edx), (0, 0, 0, 0));
        assert_eq!(cpuid.cpuid1(4).eax, 0);
    }
}
