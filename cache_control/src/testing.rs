use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpu_types::{CpuMask, LogicalCpu};
use spin::Mutex;

use crate::{CacheControlOps, CacheMode, MemoryCachingControl, MemoryTypeHooks, StopMachine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CacheMode(CacheMode),
    Wbinvd,
    WriteCr4(u64),
    FlushTlb,
    EnterReprogramming,
    CommitConfiguration,
    ApplyGenericState,
    ApplyPageAttributeState,
    InitBootProcessor,
    StopMachine { from_inactive: bool, cpus: CpuMask },
    Run(LogicalCpu),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

pub struct RecordingOps<'a> {
    recorder: &'a Recorder,
    cr4: AtomicU64,
    interrupts: AtomicBool,
    saw_interrupts_enabled: AtomicBool,
}

impl<'a> RecordingOps<'a> {
    pub fn new(recorder: &'a Recorder, cr4: u64) -> Self {
        RecordingOps {
            recorder,
            cr4: AtomicU64::new(cr4),
            interrupts: AtomicBool::new(true),
            saw_interrupts_enabled: AtomicBool::new(false),
        }
    }

    pub fn cr4(&self) -> u64 {
        self.cr4.load(Ordering::SeqCst)
    }

    /// Whether the cache mode was ever changed with interrupts enabled.
    pub fn saw_interrupts_enabled(&self) -> bool {
        self.saw_interrupts_enabled.load(Ordering::SeqCst)
    }
}

impl CacheControlOps for RecordingOps<'_> {
    fn set_cache_mode(&self, mode: CacheMode) {
        if self.interrupts_enabled() {
            self.saw_interrupts_enabled.store(true, Ordering::SeqCst);
        }
        self.recorder.push(Event::CacheMode(mode));
    }

    fn wbinvd(&self) {
        self.recorder.push(Event::Wbinvd);
    }

    fn read_cr4(&self) -> u64 {
        self.cr4()
    }

    fn write_cr4(&self, value: u64) {
        self.cr4.store(value, Ordering::SeqCst);
        self.recorder.push(Event::WriteCr4(value));
    }

    fn flush_tlb_local(&self) {
        self.recorder.push(Event::FlushTlb);
    }

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

pub struct RecordingHooks<'a> {
    recorder: &'a Recorder,
    control: MemoryCachingControl,
}

impl<'a> RecordingHooks<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        Self::with_control(recorder, MemoryCachingControl::all())
    }

    pub fn with_control(recorder: &'a Recorder, control: MemoryCachingControl) -> Self {
        RecordingHooks { recorder, control }
    }
}

impl MemoryTypeHooks for RecordingHooks<'_> {
    fn init_boot_processor(&self) -> MemoryCachingControl {
        self.recorder.push(Event::InitBootProcessor);
        self.control
    }

    fn apply_generic_state(&self) {
        self.recorder.push(Event::ApplyGenericState);
    }

    fn apply_page_attribute_state(&self) {
        self.recorder.push(Event::ApplyPageAttributeState);
    }

    fn enter_reprogramming(&self) {
        self.recorder.push(Event::EnterReprogramming);
    }

    fn commit_configuration(&self) {
        self.recorder.push(Event::CommitConfiguration);
    }
}

/// Runs the function for each processor in turn on the calling thread.
pub struct SerialStop<'a> {
    pub recorder: &'a Recorder,
}

impl SerialStop<'_> {
    fn run(&self, from_inactive: bool, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync)) {
        self.recorder.push(Event::StopMachine {
            from_inactive,
            cpus: cpus.clone(),
        });
        for cpu in cpus.iter() {
            self.recorder.push(Event::Run(cpu));
            f(cpu);
        }
    }
}

impl StopMachine for SerialStop<'_> {
    fn stop_machine(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync)) {
        self.run(false, cpus, f);
    }

    fn stop_machine_from_inactive_cpu(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync)) {
        self.run(true, cpus, f);
    }
}
