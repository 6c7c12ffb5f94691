/// CR4.PGE
pub const CR4_PAGE_GLOBAL: u64 = 1 << 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Normal,
    /// CR0.CD set, CR0.NW clear: caches are neither filled nor used to hit.
    NoFill,
}

/// Privileged operations on the processor executing the call.
pub trait CacheControlOps: Sync {
    fn set_cache_mode(&self, mode: CacheMode);
    /// Write back and invalidate all caches.
    fn wbinvd(&self);
    fn read_cr4(&self) -> u64;
    fn write_cr4(&self, value: u64);
    /// Flushes the non global TLB entries.
    fn flush_tlb_local(&self);
    fn interrupts_enabled(&self) -> bool;
    fn without_interrupts<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}
