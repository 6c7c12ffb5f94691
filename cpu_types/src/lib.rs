#![no_std]
extern crate alloc;

pub mod cpu_info;
pub mod mask;
pub mod topology;

pub use cpu_info::{CpuFeatures, CpuInfo, Vendor};
pub use mask::{CpuMask, LogicalCpu};
pub use topology::SystemTopology;
