pub mod addrspace;
pub mod boot_frame_allocator;
pub mod coremap;
pub mod fault;
pub mod frame_allocator;
pub mod phys;
pub mod tlb;

use boot_frame_allocator::BootFrameAllocator;
use frame_allocator::KernelFrameAllocator;
use phys::{HhdmMemory, PhysMemory};
use x86_64::{PhysAddr, VirtAddr};

/// The VM system: the kernel's frame allocator plus the window through which
/// frame contents are reached. Built once at boot and passed by reference.
pub struct Vm<M: PhysMemory> {
    frames: KernelFrameAllocator,
    memory: M,
}

impl<M: PhysMemory> Vm<M> {
    pub fn new(boot_alloc: BootFrameAllocator, memory: M) -> Self {
        Vm {
            frames: KernelFrameAllocator::new(boot_alloc),
            memory,
        }
    }

    /// Switches from boot-time stealing to the coremap.
    pub fn bootstrap(&self) {
        self.frames.bootstrap();
    }

    pub fn frames(&self) -> &KernelFrameAllocator {
        &self.frames
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Allocate `npages` contiguous kernel pages.
    ///
    /// # Returns
    /// The kernel virtual address of the first page, or None when no run of
    /// that length is free
    pub fn alloc_kpages(&self, npages: usize) -> Option<VirtAddr> {
        let paddr = self.frames.getppages(npages)?;
        Some(self.memory.kvaddr(paddr))
    }

    /// Free pages obtained from [`Vm::alloc_kpages`]. Null, foreign and
    /// already-freed addresses are ignored.
    pub fn free_kpages(&self, addr: VirtAddr) {
        if addr.is_null() {
            return;
        }
        if let Some(paddr) = self.memory.kvaddr_to_paddr(addr) {
            self.frames.freeppages(paddr);
        }
    }
}

/// Sets up the VM system over the RAM in [first_free, last), reached through
/// the direct map at `hhdm_offset`, and bootstraps the coremap.
///
/// # Safety
///
/// All of [first_free, last) must be unused RAM mapped read-write at
/// `hhdm_offset`.
pub unsafe fn init(hhdm_offset: VirtAddr, first_free: PhysAddr, last: PhysAddr) -> Vm<HhdmMemory> {
    let vm = Vm::new(
        BootFrameAllocator::init(first_free, last),
        HhdmMemory::new(hhdm_offset),
    );
    vm.bootstrap();
    vm
}
