#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use x86_cacheinfo::cache_control::{
    CacheControlOps, CacheMode, MemoryCachingControl, MemoryTypeHooks,
};
use x86_cacheinfo::cpu_types::{CpuFeatures, CpuInfo, LogicalCpu, SystemTopology, Vendor};
use x86_cacheinfo::cpuid::recorded::RecordedCpuid;
use x86_cacheinfo::cpuid::{CacheRegisterSnapshot, CacheType};

pub const CR4: u64 = 0x0036_06f0;

/// One processor state shared by every thread; the rendezvous lets a single
/// thread in at a time anyway.
pub struct FakeCpu {
    cr4: AtomicU64,
    interrupts: AtomicBool,
    no_fill: AtomicBool,
    pub unmasked_mode_changes: AtomicUsize,
    pub wbinvds: AtomicUsize,
}

impl FakeCpu {
    pub fn new() -> Self {
        FakeCpu {
            cr4: AtomicU64::new(CR4),
            interrupts: AtomicBool::new(true),
            no_fill: AtomicBool::new(false),
            unmasked_mode_changes: AtomicUsize::new(0),
            wbinvds: AtomicUsize::new(0),
        }
    }

    pub fn cr4(&self) -> u64 {
        self.cr4.load(Ordering::SeqCst)
    }

    pub fn caches_disabled(&self) -> bool {
        self.no_fill.load(Ordering::SeqCst)
    }
}

impl CacheControlOps for FakeCpu {
    fn set_cache_mode(&self, mode: CacheMode) {
        if self.interrupts_enabled() {
            self.unmasked_mode_changes.fetch_add(1, Ordering::SeqCst);
        }
        self.no_fill
            .store(mode == CacheMode::NoFill, Ordering::SeqCst);
    }

    fn wbinvd(&self) {
        self.wbinvds.fetch_add(1, Ordering::SeqCst);
    }

    fn read_cr4(&self) -> u64 {
        self.cr4()
    }

    fn write_cr4(&self, value: u64) {
        self.cr4.store(value, Ordering::SeqCst);
    }

    fn flush_tlb_local(&self) {}

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn without_interrupts<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let was_enabled = self.interrupts.swap(false, Ordering::SeqCst);
        let r = f();
        self.interrupts.store(was_enabled, Ordering::SeqCst);
        r
    }
}

pub struct FakeMemoryTypes {
    control: MemoryCachingControl,
    pub generic: AtomicUsize,
    pub pat: AtomicUsize,
    pub commits: AtomicUsize,
}

impl FakeMemoryTypes {
    pub fn new(control: MemoryCachingControl) -> Self {
        FakeMemoryTypes {
            control,
            generic: AtomicUsize::new(0),
            pat: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn generic(&self) -> usize {
        self.generic.load(Ordering::SeqCst)
    }
}

impl MemoryTypeHooks for FakeMemoryTypes {
    fn init_boot_processor(&self) -> MemoryCachingControl {
        self.control
    }

    fn apply_generic_state(&self) {
        self.generic.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_page_attribute_state(&self) {
        self.pat.fetch_add(1, Ordering::SeqCst);
    }

    fn enter_reprogramming(&self) {}

    fn commit_configuration(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn leaf4(cache_type: CacheType, level: u8, threads: u32, ways: u32, sets: u32) -> [u32; 4] {
    let mut s = CacheRegisterSnapshot::default();
    s.set_cache_type(cache_type)
        .set_level(level)
        .set_self_initializing(true)
        .set_threads_sharing(threads)
        .set_line_size(64)
        .set_physical_line_partitions(1)
        .set_ways(ways)
        .set_sets(sets);
    [s.eax, s.ebx, s.ecx, 0]
}

/// Two threads per core, four per L3.
pub fn intel_reader() -> RecordedCpuid {
    RecordedCpuid::new()
        .with(4, 0, leaf4(CacheType::Data, 1, 2, 8, 64))
        .with(4, 1, leaf4(CacheType::Instruction, 1, 2, 8, 64))
        .with(4, 2, leaf4(CacheType::Unified, 2, 2, 4, 1024))
        .with(4, 3, leaf4(CacheType::Unified, 3, 4, 16, 8192))
}

/// Every processor known, none online.
pub fn machine(cpus: usize, template: &CpuInfo) -> SystemTopology {
    let mut system = SystemTopology::new();
    for i in 0..cpus {
        let mut info = template.clone();
        info.apicid = i as u32;
        system.add_cpu(LogicalCpu::new(i), info);
    }
    system
}

pub fn intel_cpu() -> CpuInfo {
    let mut cpu = CpuInfo::new(Vendor::Intel);
    cpu.family = 6;
    cpu.cpuid_level = 0x16;
    cpu.features = CpuFeatures::PGE | CpuFeatures::MTRR | CpuFeatures::PAT;
    cpu
}

pub fn cpu(index: usize) -> LogicalCpu {
    LogicalCpu::new(index)
}
