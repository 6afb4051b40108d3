//! Per-core interrupt masking.
//!
//! Core-local hardware state (the TLB) is only ever updated with interrupts
//! masked on that core. [`splhigh`] returns a guard that masks interrupts and
//! puts the previous state back when dropped, so nested sections compose.

use core::sync::atomic::{AtomicBool, Ordering};

pub trait InterruptControl {
    fn are_enabled(&self) -> bool;
    fn enable(&self);
    fn disable(&self);
}

/// The real interrupt flag of the executing x86_64 core.
#[cfg(target_arch = "x86_64")]
pub struct HardwareInterrupts;

#[cfg(target_arch = "x86_64")]
impl InterruptControl for HardwareInterrupts {
    fn are_enabled(&self) -> bool {
        x86_64::instructions::interrupts::are_enabled()
    }

    fn enable(&self) {
        x86_64::instructions::interrupts::enable();
    }

    fn disable(&self) {
        x86_64::instructions::interrupts::disable();
    }
}

/// A software interrupt flag, for cores that are emulated rather than real.
#[derive(Debug)]
pub struct EmulatedInterrupts {
    enabled: AtomicBool,
}

impl EmulatedInterrupts {
    pub const fn new() -> Self {
        EmulatedInterrupts {
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for EmulatedInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for EmulatedInterrupts {
    fn are_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

/// Interrupts stay masked on this core until the guard is dropped.
pub struct SplGuard<'a, I: InterruptControl + ?Sized> {
    control: &'a I,
    initially_enabled: bool,
}

/// Masks interrupts on the local core.
pub fn splhigh<I: InterruptControl + ?Sized>(control: &I) -> SplGuard<'_, I> {
    let initially_enabled = control.are_enabled();
    if initially_enabled {
        control.disable();
    }
    SplGuard {
        control,
        initially_enabled,
    }
}

impl<I: InterruptControl + ?Sized> Drop for SplGuard<'_, I> {
    fn drop(&mut self) {
        if self.initially_enabled {
            self.control.enable();
        }
    }
}

/// Executes a closure with interrupts disabled.
///
/// # Arguments
/// * `control` - The interrupt flag of the executing core
/// * `f` - The closure to execute
///
/// # Returns
/// Returns the result of the closure
pub fn without_interrupts<I, F, R>(control: &I, f: F) -> R
where
    I: InterruptControl + ?Sized,
    F: FnOnce() -> R,
{
    let _spl = splhigh(control);
    f()
}
