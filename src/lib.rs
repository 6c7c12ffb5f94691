//! x86 cache topology discovery and cache control, tied to the processor
//! hotplug callbacks.
//!
//! [`CacheSubsystem`] is the one object the rest of the kernel talks to. It
//! owns the cache leaves of every processor and the memory type rendezvous
//! state; the hotplug code calls into it as processors come and go.

pub mod config;
pub mod stop_machine;
pub mod subsystem;

pub use config::Config;
pub use stop_machine::TurnStopMachine;
pub use subsystem::CacheSubsystem;

pub use cache_control;
pub use cache_info;
pub use cpu_types;
pub use cpuid;
