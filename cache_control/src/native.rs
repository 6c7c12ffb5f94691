use core::arch::asm;

use static_assertions::const_assert_eq;
use x86_64::instructions::{interrupts, tlb};
use x86_64::registers::control::{Cr0, Cr0Flags, Cr4, Cr4Flags};

use crate::{CacheControlOps, CacheMode, CR4_PAGE_GLOBAL};

const_assert_eq!(CR4_PAGE_GLOBAL, Cr4Flags::PAGE_GLOBAL.bits());

/// The processor this runs on. Ring 0 only.
pub struct NativeCacheControl;

impl CacheControlOps for NativeCacheControl {
    fn set_cache_mode(&self, mode: CacheMode) {
        unsafe {
            Cr0::update(|flags| {
                flags.set(Cr0Flags::CACHE_DISABLE, mode == CacheMode::NoFill);
                flags.remove(Cr0Flags::NOT_WRITE_THROUGH);
            })
        };
    }

    fn wbinvd(&self) {
        unsafe { asm!("wbinvd", options(nostack, preserves_flags)) };
    }

    fn read_cr4(&self) -> u64 {
        Cr4::read_raw()
    }

    fn write_cr4(&self, value: u64) {
        unsafe { Cr4::write_raw(value) };
    }

    fn flush_tlb_local(&self) {
        tlb::flush_all();
    }

    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn without_interrupts<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        interrupts::without_interrupts(f)
    }
}
