//! cpuid leaf 2 descriptor bytes, used only when leaf 4 is not available.

use bit_field::BitField;
use raw_cpuid::{CpuIdReader, CpuIdResult};

use crate::LEAF_CACHE_DESCRIPTORS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorLevel {
    L1Instruction,
    L1Data,
    L2,
    L3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDescriptor {
    pub descriptor: u8,
    pub level: DescriptorLevel,
    pub size_kb: u32,
}

const fn entry(descriptor: u8, level: DescriptorLevel, size_kb: u32) -> CacheDescriptor {
    CacheDescriptor {
        descriptor,
        level,
        size_kb,
    }
}

const fn mb(x: u32) -> u32 {
    x * 1024
}

use DescriptorLevel::{L1Data, L1Instruction, L2, L3};

// Caches only, no TLB or trace cache entries. Sorted by descriptor.
static CACHE_TABLE: [CacheDescriptor; 68] = [
    entry(0x06, L1Instruction, 8),  // 4-way, 32 byte lines
    entry(0x08, L1Instruction, 16), // 4-way, 32 byte lines
    entry(0x09, L1Instruction, 32), // 4-way, 64 byte lines
    entry(0x0a, L1Data, 8),         // 2-way, 32 byte lines
    entry(0x0c, L1Data, 16),        // 4-way, 32 byte lines
    entry(0x0d, L1Data, 16),        // 4-way, 64 byte lines
    entry(0x0e, L1Data, 24),        // 6-way, 64 byte lines
    entry(0x21, L2, 256),           // 8-way, 64 byte lines
    entry(0x22, L3, 512),           // 4-way, sectored, 64 byte lines
    entry(0x23, L3, mb(1)),         // 8-way, sectored, 64 byte lines
    entry(0x25, L3, mb(2)),         // 8-way, sectored, 64 byte lines
    entry(0x29, L3, mb(4)),         // 8-way, sectored, 64 byte lines
    entry(0x2c, L1Data, 32),        // 8-way, 64 byte lines
    entry(0x30, L1Instruction, 32), // 8-way, 64 byte lines
    entry(0x39, L2, 128),           // 4-way, sectored, 64 byte lines
    entry(0x3a, L2, 192),           // 6-way, sectored, 64 byte lines
    entry(0x3b, L2, 128),           // 2-way, sectored, 64 byte lines
    entry(0x3c, L2, 256),           // 4-way, sectored, 64 byte lines
    entry(0x3d, L2, 384),           // 6-way, sectored, 64 byte lines
    entry(0x3e, L2, 512),           // 4-way, sectored, 64 byte lines
    entry(0x3f, L2, 256),           // 2-way, 64 byte lines
    entry(0x41, L2, 128),           // 4-way, 32 byte lines
    entry(0x42, L2, 256),           // 4-way, 32 byte lines
    entry(0x43, L2, 512),           // 4-way, 32 byte lines
    entry(0x44, L2, mb(1)),         // 4-way, 32 byte lines
    entry(0x45, L2, mb(2)),         // 4-way, 32 byte lines
    entry(0x46, L3, mb(4)),         // 4-way, 64 byte lines
    entry(0x47, L3, mb(8)),         // 8-way, 64 byte lines
    entry(0x48, L2, mb(3)),         // 12-way, 64 byte lines
    entry(0x49, L3, mb(4)),         // 16-way, 64 byte lines
    entry(0x4a, L3, mb(6)),         // 12-way, 64 byte lines
    entry(0x4b, L3, mb(8)),         // 16-way, 64 byte lines
    entry(0x4c, L3, mb(12)),        // 12-way, 64 byte lines
    entry(0x4d, L3, mb(16)),        // 16-way, 64 byte lines
    entry(0x4e, L2, mb(6)),         // 24-way, 64 byte lines
    entry(0x60, L1Data, 16),        // 8-way, sectored, 64 byte lines
    entry(0x66, L1Data, 8),         // 4-way, sectored, 64 byte lines
    entry(0x67, L1Data, 16),        // 4-way, sectored, 64 byte lines
    entry(0x68, L1Data, 32),        // 4-way, sectored, 64 byte lines
    entry(0x78, L2, mb(1)),         // 4-way, 64 byte lines
    entry(0x79, L2, 128),           // 8-way, sectored, 64 byte lines
    entry(0x7a, L2, 256),           // 8-way, sectored, 64 byte lines
    entry(0x7b, L2, 512),           // 8-way, sectored, 64 byte lines
    entry(0x7c, L2, mb(1)),         // 8-way, sectored, 64 byte lines
    entry(0x7d, L2, mb(2)),         // 8-way, 64 byte lines
    entry(0x7f, L2, 512),           // 2-way, 64 byte lines
    entry(0x80, L2, 512),           // 8-way, 64 byte lines
    entry(0x82, L2, 256),           // 8-way, 32 byte lines
    entry(0x83, L2, 512),           // 8-way, 32 byte lines
    entry(0x84, L2, mb(1)),         // 8-way, 32 byte lines
    entry(0x85, L2, mb(2)),         // 8-way, 32 byte lines
    entry(0x86, L2, 512),           // 4-way, 64 byte lines
    entry(0x87, L2, mb(1)),         // 8-way, 64 byte lines
    entry(0xd0, L3, 512),           // 4-way, 64 byte lines
    entry(0xd1, L3, mb(1)),         // 4-way, 64 byte lines
    entry(0xd2, L3, mb(2)),         // 4-way, 64 byte lines
    entry(0xd6, L3, mb(1)),         // 8-way, 64 byte lines
    entry(0xd7, L3, mb(2)),         // 8-way, 64 byte lines
    entry(0xd8, L3, mb(4)),         // 12-way, 64 byte lines
    entry(0xdc, L3, mb(2)),         // 12-way, 64 byte lines
    entry(0xdd, L3, mb(4)),         // 12-way, 64 byte lines
    entry(0xde, L3, mb(8)),         // 12-way, 64 byte lines
    entry(0xe2, L3, mb(2)),         // 16-way, 64 byte lines
    entry(0xe3, L3, mb(4)),         // 16-way, 64 byte lines
    entry(0xe4, L3, mb(8)),         // 16-way, 64 byte lines
    entry(0xea, L3, mb(12)),        // 24-way, 64 byte lines
    entry(0xeb, L3, mb(18)),        // 24-way, 64 byte lines
    entry(0xec, L3, mb(24)),        // 24-way, 64 byte lines
];

pub fn lookup(descriptor: u8) -> Option<&'static CacheDescriptor> {
    CACHE_TABLE
        .binary_search_by_key(&descriptor, |d| d.descriptor)
        .ok()
        .map(|i| &CACHE_TABLE[i])
}

/// Per level totals, in KB. Several descriptors of the same level add up,
/// each one describes a distinct structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyCacheSizes {
    pub l1i: u32,
    pub l1d: u32,
    pub l2: u32,
    pub l3: u32,
}

impl LegacyCacheSizes {
    pub fn add(&mut self, descriptor: &CacheDescriptor) {
        let total = match descriptor.level {
            L1Instruction => &mut self.l1i,
            L1Data => &mut self.l1d,
            L2 => &mut self.l2,
            L3 => &mut self.l3,
        };
        *total += descriptor.size_kb;
    }

    /// Unknown descriptors (TLBs, prefetch hints, ...) are ignored.
    pub fn accumulate_descriptor(&mut self, descriptor: u8) {
        if let Some(d) = lookup(descriptor) {
            self.add(d);
        }
    }

    /// Accumulates the 15 descriptor bytes of one leaf 2 invocation.
    ///
    /// A register with bit 31 set holds no valid descriptors, and the low
    /// byte of EAX is the iteration count.
    pub fn accumulate_registers(&mut self, regs: &CpuIdResult) {
        for (i, reg) in [regs.eax, regs.ebx, regs.ecx, regs.edx].into_iter().enumerate() {
            if reg.get_bit(31) {
                continue;
            }
            let first = if i == 0 { 1 } else { 0 };
            for byte in reg.to_le_bytes().into_iter().skip(first) {
                self.accumulate_descriptor(byte);
            }
        }
    }

    /// Runs leaf 2 as many times as it asks for (at most 255).
    pub fn read<R: CpuIdReader>(reader: &R) -> LegacyCacheSizes {
        let mut sizes = LegacyCacheSizes::default();
        let iterations = reader.cpuid1(LEAF_CACHE_DESCRIPTORS).eax.get_bits(0..8);
        for _ in 0..iterations {
            let regs = reader.cpuid1(LEAF_CACHE_DESCRIPTORS);
            sizes.accumulate_registers(&regs);
        }
        sizes
    }
}
