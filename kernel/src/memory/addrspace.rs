//! Per-process address spaces.
//!
//! An address space has up to two variable regions (code first, then data)
//! and a fixed stack window just below `USERSTACK`. Each gets a page table of
//! backing frames at `prepare_load`; frames are only released by `destroy`.

use alloc::vec::Vec;
use arrayvec::ArrayVec;
use x86_64::{
    structures::paging::{Page, PhysFrame},
    PhysAddr, VirtAddr,
};

use crate::{
    constants::memory::{FRAME_SIZE, MAX_REGIONS, PAGE_SIZE, STACK_PAGES, USERSTACK},
    cpu::Cpu,
    error::VmError,
    interrupts::InterruptControl,
    memory::{phys::PhysMemory, tlb::EvictionPolicy, Vm},
};

// See https://www.man7.org/linux/man-pages/man2/mmap.2.html
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtFlags(u64);

impl Default for ProtFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtFlags {
    pub const PROT_EXEC: u64 = 1 << 0;
    pub const PROT_READ: u64 = 1 << 1;
    pub const PROT_WRITE: u64 = 1 << 2;

    pub const fn new() -> Self {
        ProtFlags(0)
    }

    // creates ProtFlags with inputted flags
    pub const fn with_flags(self, flag: u64) -> Self {
        ProtFlags(self.0 | flag)
    }

    // Checks if ProtFlags contains input flags
    pub const fn contains(self, flag: u64) -> bool {
        (self.0 & flag) != 0
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// Backing frames for consecutive pages of one segment.
#[derive(Debug)]
pub struct PageTable {
    frames: Vec<PhysFrame>,
}

impl PageTable {
    /// Allocates and zeroes one frame per page. On failure every frame
    /// allocated here is released again.
    fn populate<M: PhysMemory>(vm: &Vm<M>, npages: usize) -> Result<Self, VmError> {
        let mut frames = Vec::new();
        frames
            .try_reserve_exact(npages)
            .map_err(|_| VmError::OutOfMemory)?;
        let mut table = PageTable { frames };

        for _ in 0..npages {
            let Some(frame) = vm.frames().alloc_frame() else {
                log::debug!(
                    "vm: out of frames after {} of {} pages",
                    table.len(),
                    npages
                );
                table.release(vm);
                return Err(VmError::OutOfMemory);
            };
            vm.memory().zero_frame(frame);
            table.frames.push(frame);
        }
        Ok(table)
    }

    fn release<M: PhysMemory>(self, vm: &Vm<M>) {
        for frame in self.frames {
            vm.frames().dealloc_frame(frame);
        }
    }

    pub fn get(&self, index: usize) -> Option<PhysFrame> {
        self.frames.get(index).copied()
    }

    pub fn frames(&self) -> &[PhysFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug)]
pub struct Region {
    base: Page,
    npages: usize,
    prot: ProtFlags,
    table: Option<PageTable>,
}

impl Region {
    pub fn base(&self) -> VirtAddr {
        self.base.start_address()
    }

    pub fn npages(&self) -> usize {
        self.npages
    }

    pub fn prot(&self) -> ProtFlags {
        self.prot
    }

    pub fn table(&self) -> Option<&PageTable> {
        self.table.as_ref()
    }

    /// Page index of `vaddr` within the region.
    fn page_index(&self, vaddr: VirtAddr) -> Option<usize> {
        let base = self.base();
        if vaddr < base {
            return None;
        }
        let index = ((vaddr - base) / PAGE_SIZE) as usize;
        (index < self.npages).then_some(index)
    }
}

/// Which part of the address space an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// The first defined region; read-only once loading completes.
    Code,
    Data,
    Stack,
}

pub fn stack_base() -> VirtAddr {
    VirtAddr::new(USERSTACK - STACK_PAGES as u64 * PAGE_SIZE)
}

#[derive(Debug, Default)]
pub struct AddressSpace {
    regions: ArrayVec<Region, MAX_REGIONS>,
    stack: Option<PageTable>,
    load_complete: bool,
}

impl AddressSpace {
    pub fn create() -> Self {
        AddressSpace::default()
    }

    /// Records a region covering [vaddr, vaddr + size), widened to whole pages.
    /// A range that wraps or runs past the canonical half is `InvalidArgument`.
    ///
    /// Permissions are kept but only the first region is ever enforced, and
    /// only as read-only once loading completes.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        prot: ProtFlags,
    ) -> Result<(), VmError> {
        assert!(
            !self.is_prepared(),
            "region defined after its address space was prepared"
        );

        let start = vaddr.align_down(PAGE_SIZE);
        let end = vaddr
            .as_u64()
            .checked_add(size as u64)
            .and_then(|end| end.checked_next_multiple_of(PAGE_SIZE))
            .ok_or(VmError::InvalidArgument)?;
        // the last page must still be a canonical address
        if end > start.as_u64() && VirtAddr::try_new(end - 1).is_err() {
            return Err(VmError::InvalidArgument);
        }
        let npages = ((end - start.as_u64()) / PAGE_SIZE) as usize;

        if self.regions.is_full() {
            log::warn!("vm: too many regions");
            return Err(VmError::TooManyRegions);
        }
        self.regions.push(Region {
            base: Page::containing_address(start),
            npages,
            prot,
            table: None,
        });
        Ok(())
    }

    /// Backs every page of every region and the stack with a zeroed frame.
    ///
    /// Either the whole address space is backed or, on `OutOfMemory`,
    /// nothing is and no frame is kept.
    pub fn prepare_load<M: PhysMemory>(&mut self, vm: &Vm<M>) -> Result<(), VmError> {
        assert!(!self.is_prepared(), "address space prepared twice");

        let mut tables: ArrayVec<PageTable, MAX_REGIONS> = ArrayVec::new();
        for region in &self.regions {
            match PageTable::populate(vm, region.npages) {
                Ok(table) => tables.push(table),
                Err(err) => {
                    tables.into_iter().for_each(|table| table.release(vm));
                    return Err(err);
                }
            }
        }
        let stack = match PageTable::populate(vm, STACK_PAGES) {
            Ok(table) => table,
            Err(err) => {
                tables.into_iter().for_each(|table| table.release(vm));
                return Err(err);
            }
        };

        for (region, table) in self.regions.iter_mut().zip(tables) {
            region.table = Some(table);
        }
        self.stack = Some(stack);
        Ok(())
    }

    /// Marks loading finished. Translations cached while the code region was
    /// still writable are flushed from the calling core.
    pub fn complete_load<I: InterruptControl, P: EvictionPolicy>(&mut self, cpu: &mut Cpu<I, P>) {
        self.load_complete = true;
        self.activate(cpu);
    }

    /// Initial user stack pointer.
    pub fn define_stack(&self) -> VirtAddr {
        assert!(self.stack.is_some(), "stack defined before prepare_load");
        VirtAddr::new(USERSTACK)
    }

    /// Duplicates this address space into freshly allocated frames.
    pub fn copy<M: PhysMemory>(&self, vm: &Vm<M>) -> Result<AddressSpace, VmError> {
        assert!(self.is_prepared(), "copy of an unprepared address space");

        let mut new = AddressSpace::create();
        for region in &self.regions {
            new.regions.push(Region {
                base: region.base,
                npages: region.npages,
                prot: region.prot,
                table: None,
            });
        }
        new.prepare_load(vm)?;

        for (new_table, old_table) in new.tables().zip(self.tables()) {
            for (&dst, &src) in new_table.frames().iter().zip(old_table.frames()) {
                vm.memory().copy_frame(dst, src);
            }
        }
        Ok(new)
    }

    /// Returns every backing frame to the allocator.
    pub fn destroy<M: PhysMemory>(self, vm: &Vm<M>) {
        let AddressSpace { regions, stack, .. } = self;
        for table in regions.into_iter().filter_map(|region| region.table).chain(stack) {
            table.release(vm);
        }
    }

    /// Flushes the calling core's TLB; translations are refilled on fault.
    pub fn activate<I: InterruptControl, P: EvictionPolicy>(&self, cpu: &mut Cpu<I, P>) {
        cpu.with_tlb(|tlb| tlb.invalidate_all());
    }

    pub fn deactivate<I: InterruptControl, P: EvictionPolicy>(&self, _cpu: &mut Cpu<I, P>) {}

    /// Locates `vaddr`: its segment and page index within that segment.
    pub fn classify(&self, vaddr: VirtAddr) -> Option<(Segment, usize)> {
        let segments = [Segment::Code, Segment::Data];
        for (region, segment) in self.regions.iter().zip(segments) {
            if let Some(index) = region.page_index(vaddr) {
                return Some((segment, index));
            }
        }

        let stack_base = stack_base();
        if vaddr >= stack_base && vaddr.as_u64() < USERSTACK {
            return Some((Segment::Stack, ((vaddr - stack_base) / PAGE_SIZE) as usize));
        }
        None
    }

    /// Page table of a segment, if the segment exists and has been prepared.
    pub fn table(&self, segment: Segment) -> Option<&PageTable> {
        match segment {
            Segment::Code => self.regions.first()?.table.as_ref(),
            Segment::Data => self.regions.get(1)?.table.as_ref(),
            Segment::Stack => self.stack.as_ref(),
        }
    }

    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let (segment, index) = self.classify(vaddr)?;
        let frame = self.table(segment)?.get(index)?;
        Some(frame.start_address() + vaddr.as_u64() % PAGE_SIZE)
    }

    /// Copies `data` into this address space at `vaddr`.
    pub fn write_bytes<M: PhysMemory>(
        &self,
        vm: &Vm<M>,
        vaddr: VirtAddr,
        data: &[u8],
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < data.len() {
            let addr = vaddr
                .as_u64()
                .checked_add(done as u64)
                .and_then(|addr| VirtAddr::try_new(addr).ok())
                .ok_or(VmError::Fault)?;
            let paddr = self.translate(addr).ok_or(VmError::Fault)?;
            let chunk = (FRAME_SIZE - (addr.as_u64() % PAGE_SIZE) as usize).min(data.len() - done);
            vm.memory().write(paddr, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Fills `buf` from this address space at `vaddr`.
    pub fn read_bytes<M: PhysMemory>(
        &self,
        vm: &Vm<M>,
        vaddr: VirtAddr,
        buf: &mut [u8],
    ) -> Result<(), VmError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = vaddr
                .as_u64()
                .checked_add(done as u64)
                .and_then(|addr| VirtAddr::try_new(addr).ok())
                .ok_or(VmError::Fault)?;
            let paddr = self.translate(addr).ok_or(VmError::Fault)?;
            let chunk = (FRAME_SIZE - (addr.as_u64() % PAGE_SIZE) as usize).min(buf.len() - done);
            vm.memory().read(paddr, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Region 1, region 2, then the stack; unprepared tables are skipped.
    pub fn tables(&self) -> impl Iterator<Item = &PageTable> + '_ {
        self.regions
            .iter()
            .filter_map(|region| region.table.as_ref())
            .chain(self.stack.as_ref())
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn is_prepared(&self) -> bool {
        self.stack.is_some()
    }

    pub fn is_load_complete(&self) -> bool {
        self.load_complete
    }
}
