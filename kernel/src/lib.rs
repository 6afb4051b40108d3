//! Coremap physical frame allocator and per-process virtual memory for a
//! small teaching kernel.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod constants;
pub mod cpu;
pub mod error;
pub mod interrupts;
pub mod logging;
pub mod memory;
pub mod processes;
#[cfg(target_arch = "x86_64")]
pub mod serial;
pub mod syscalls;

pub use error::VmError;

pub mod prelude {
    pub use crate::{
        cpu::Cpu,
        error::VmError,
        memory::{
            addrspace::{AddressSpace, ProtFlags},
            fault::{vm_fault, CurrentProcess},
            Vm,
        },
    };
}
