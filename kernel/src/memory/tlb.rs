//! Software model of a core's translation lookaside buffer.
//!
//! The TLB is a small fully-associative cache: any slot may hold any page.
//! A slot is valid when its flags carry `PRESENT`; a valid slot permits
//! writes only when it also carries `WRITABLE` (the MIPS "dirty" bit).

use rand::{rngs::SmallRng, Rng, SeedableRng};
use x86_64::{
    structures::paging::{Page, PageTableFlags, PhysFrame},
    PhysAddr, VirtAddr,
};

use crate::{
    constants::memory::{DEFAULT_TLB_SEED, NUM_TLB},
    memory::fault::FaultKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub page: Page,
    pub frame: PhysFrame,
    pub flags: PageTableFlags,
}

impl TlbEntry {
    pub fn invalid() -> Self {
        TlbEntry {
            page: Page::containing_address(VirtAddr::zero()),
            frame: PhysFrame::containing_address(PhysAddr::zero()),
            flags: PageTableFlags::empty(),
        }
    }

    pub fn new(page: Page, frame: PhysFrame, writable: bool) -> Self {
        let mut flags = PageTableFlags::PRESENT;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        TlbEntry { page, frame, flags }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(PageTableFlags::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(PageTableFlags::WRITABLE)
    }
}

/// Picks the slot to overwrite when every slot is valid.
pub trait EvictionPolicy {
    /// Must return an index below `slots`.
    fn victim(&mut self, slots: usize) -> usize;
}

/// Uniformly random replacement.
pub struct RandomEviction {
    rng: SmallRng,
}

impl RandomEviction {
    pub fn seeded(seed: u64) -> Self {
        RandomEviction {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomEviction {
    fn default() -> Self {
        Self::seeded(DEFAULT_TLB_SEED)
    }
}

impl EvictionPolicy for RandomEviction {
    fn victim(&mut self, slots: usize) -> usize {
        self.rng.gen_range(0..slots)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

pub struct Tlb<P: EvictionPolicy = RandomEviction> {
    slots: [TlbEntry; NUM_TLB],
    policy: P,
}

impl<P: EvictionPolicy> Tlb<P> {
    pub fn new(policy: P) -> Self {
        Tlb {
            slots: [TlbEntry::invalid(); NUM_TLB],
            policy,
        }
    }

    pub fn read(&self, index: usize) -> TlbEntry {
        self.slots[index]
    }

    pub fn write(&mut self, entry: TlbEntry, index: usize) {
        self.slots[index] = entry;
    }

    /// Overwrites a slot chosen by the eviction policy and returns its index.
    pub fn random(&mut self, entry: TlbEntry) -> usize {
        let index = self.policy.victim(NUM_TLB);
        assert!(index < NUM_TLB, "eviction policy chose slot {}", index);
        self.slots[index] = entry;
        index
    }

    /// Index of the valid slot mapping `page`, if any.
    pub fn probe(&self, page: Page) -> Option<usize> {
        self.slots
            .iter()
            .position(|entry| entry.is_valid() && entry.page == page)
    }

    pub fn invalidate_all(&mut self) {
        self.slots.fill(TlbEntry::invalid());
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &TlbEntry> + '_ {
        self.slots.iter().filter(|entry| entry.is_valid())
    }

    /// What the MMU does on an access: a physical address on a hit, or the
    /// fault the access raises.
    pub fn translate(&self, vaddr: VirtAddr, access: Access) -> Result<PhysAddr, FaultKind> {
        let page = Page::containing_address(vaddr);
        let Some(index) = self.probe(page) else {
            return Err(match access {
                Access::Read => FaultKind::Read,
                Access::Write => FaultKind::Write,
            });
        };

        let entry = self.slots[index];
        if access == Access::Write && !entry.is_writable() {
            return Err(FaultKind::ReadOnly);
        }
        Ok(entry.frame.start_address() + (vaddr - page.start_address()))
    }
}

impl Default for Tlb<RandomEviction> {
    fn default() -> Self {
        Self::new(RandomEviction::default())
    }
}

/// Invalidating translations on other cores is not supported.
pub fn tlb_shootdown(target_vaddr: VirtAddr) -> ! {
    panic!(
        "vm tried to do tlb shootdown of {:#x}?!",
        target_vaddr.as_u64()
    );
}

pub fn tlb_shootdown_all() -> ! {
    panic!("vm tried to do tlb shootdown?!");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always evicts the same slot.
    struct FixedVictim(usize);

    impl EvictionPolicy for FixedVictim {
        fn victim(&mut self, _slots: usize) -> usize {
            self.0
        }
    }

    fn page(addr: u64) -> Page {
        Page::containing_address(VirtAddr::new(addr))
    }

    fn frame(addr: u64) -> PhysFrame {
        PhysFrame::containing_address(PhysAddr::new(addr))
    }

    #[test]
    fn test_translate_hit_and_misses() {
        let mut tlb: Tlb = Tlb::default();
        tlb.write(TlbEntry::new(page(0x40_0000), frame(0x9000), false), 3);

        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_0123), Access::Read),
            Ok(PhysAddr::new(0x9123))
        );
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_0123), Access::Write),
            Err(FaultKind::ReadOnly)
        );
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_1000), Access::Write),
            Err(FaultKind::Write)
        );
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_1000), Access::Read),
            Err(FaultKind::Read)
        );
    }

    #[test]
    fn test_invalidate_all() {
        let mut tlb: Tlb = Tlb::default();
        for i in 0..NUM_TLB {
            tlb.write(
                TlbEntry::new(page(0x40_0000 + i as u64 * 0x1000), frame(0x9000), true),
                i,
            );
        }
        assert_eq!(tlb.valid_entries().count(), NUM_TLB);

        tlb.invalidate_all();
        assert_eq!(tlb.valid_entries().count(), 0);
        assert_eq!(tlb.probe(page(0x40_0000)), None);
    }

    #[test]
    fn test_random_uses_policy() {
        let mut tlb = Tlb::new(FixedVictim(7));
        let entry = TlbEntry::new(page(0x40_0000), frame(0x9000), true);
        assert_eq!(tlb.random(entry), 7);
        assert_eq!(tlb.read(7), entry);
    }

    #[test]
    #[should_panic(expected = "eviction policy chose slot")]
    fn test_random_rejects_victim_out_of_range() {
        let mut tlb = Tlb::new(FixedVictim(NUM_TLB));
        tlb.random(TlbEntry::new(page(0x40_0000), frame(0x9000), true));
    }

    #[test]
    fn test_seeded_eviction_is_reproducible() {
        let mut a = RandomEviction::seeded(42);
        let mut b = RandomEviction::seeded(42);
        for _ in 0..100 {
            let victim = a.victim(NUM_TLB);
            assert!(victim < NUM_TLB);
            assert_eq!(victim, b.victim(NUM_TLB));
        }
    }

    #[test]
    #[should_panic(expected = "tlb shootdown")]
    fn test_shootdown_is_fatal() {
        tlb_shootdown_all();
    }
}
