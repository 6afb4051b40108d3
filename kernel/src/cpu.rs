//! Per-core state owned by the VM system.

#[cfg(target_arch = "x86_64")]
use crate::interrupts::HardwareInterrupts;
use crate::{
    constants::MAX_CORES,
    interrupts::{splhigh, EmulatedInterrupts, InterruptControl},
    memory::tlb::{EvictionPolicy, RandomEviction, Tlb},
};

/// One processor core: its private TLB and its interrupt flag.
pub struct Cpu<I: InterruptControl = EmulatedInterrupts, P: EvictionPolicy = RandomEviction> {
    id: u32,
    tlb: Tlb<P>,
    interrupts: I,
}

impl<I: InterruptControl, P: EvictionPolicy> Cpu<I, P> {
    pub fn new(id: u32, interrupts: I, policy: P) -> Self {
        assert!((id as usize) < MAX_CORES, "core {} out of range", id);
        Cpu {
            id,
            tlb: Tlb::new(policy),
            interrupts,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn tlb(&self) -> &Tlb<P> {
        &self.tlb
    }

    pub fn interrupts(&self) -> &I {
        &self.interrupts
    }

    /// Runs `f` on this core's TLB with interrupts masked.
    pub fn with_tlb<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Tlb<P>) -> R,
    {
        let _spl = splhigh(&self.interrupts);
        f(&mut self.tlb)
    }
}

impl Cpu {
    /// A core with a software interrupt flag and seeded random eviction.
    pub fn emulated(id: u32) -> Self {
        Cpu::new(id, EmulatedInterrupts::new(), RandomEviction::default())
    }
}

#[cfg(target_arch = "x86_64")]
impl Cpu<HardwareInterrupts> {
    /// The executing core, masking interrupts with the real IF flag.
    pub fn hardware(id: u32) -> Self {
        Cpu::new(id, HardwareInterrupts, RandomEviction::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tlb::TlbEntry;
    use x86_64::{
        structures::paging::{Page, PhysFrame},
        PhysAddr, VirtAddr,
    };

    #[test]
    fn test_with_tlb_restores_interrupts() {
        let mut cpu = Cpu::emulated(1);
        assert_eq!(cpu.id(), 1);

        let masked = cpu.with_tlb(|tlb| {
            tlb.write(
                TlbEntry::new(
                    Page::containing_address(VirtAddr::new(0x40_0000)),
                    PhysFrame::containing_address(PhysAddr::new(0x9000)),
                    true,
                ),
                0,
            );
            tlb.valid_entries().count()
        });
        assert_eq!(masked, 1);
        assert!(cpu.interrupts().are_enabled());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_core_id_bounded() {
        Cpu::emulated(MAX_CORES as u32);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_hardware_core_reads_if_flag() {
        let cpu = Cpu::hardware(0);
        assert_eq!(cpu.id(), 0);
        // user mode always runs with IF set
        assert!(cpu.interrupts().are_enabled());
        assert_eq!(cpu.tlb().valid_entries().count(), 0);
    }
}
