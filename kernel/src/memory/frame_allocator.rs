//! Kernel frame allocator
//!
//! - Hands out frames from the boot allocator until the coremap is bootstrapped
//! - Serializes every allocation behind one spin lock

use crate::memory::boot_frame_allocator::BootFrameAllocator;
use crate::memory::coremap::Coremap;
use spin::Mutex;

use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr,
};

/// Enum of supported allocators
pub enum GlobalFrameAllocator {
    Boot(BootFrameAllocator),
    Coremap(Coremap),
}

impl GlobalFrameAllocator {
    /// Allocates `npages` physically contiguous frames
    pub fn getppages(&mut self, npages: usize) -> Option<PhysAddr> {
        match self {
            GlobalFrameAllocator::Boot(ref mut boot_alloc) => boot_alloc.stealmem(npages),
            GlobalFrameAllocator::Coremap(ref mut coremap) => coremap.allocate(npages),
        }
    }

    /// Releases the run starting at `addr`; stolen boot memory is never released
    pub fn freeppages(&mut self, addr: PhysAddr) {
        match self {
            GlobalFrameAllocator::Boot(_) => {}
            GlobalFrameAllocator::Coremap(ref mut coremap) => coremap.free(addr),
        }
    }
}

unsafe impl FrameAllocator<Size4KiB> for GlobalFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.getppages(1).map(PhysFrame::containing_address)
    }
}

impl FrameDeallocator<Size4KiB> for GlobalFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        match self {
            GlobalFrameAllocator::Boot(ref mut boot_alloc) => boot_alloc.deallocate_frame(frame),
            GlobalFrameAllocator::Coremap(ref mut coremap) => coremap.free(frame.start_address()),
        }
    }
}

/// The kernel's one frame allocator. Starts out stealing boot memory and
/// switches to the coremap at bootstrap.
///
/// Every operation runs under a single spin lock; nothing done while holding
/// it sleeps or touches frame contents.
pub struct KernelFrameAllocator {
    inner: Mutex<GlobalFrameAllocator>,
}

impl KernelFrameAllocator {
    pub fn new(boot_alloc: BootFrameAllocator) -> Self {
        KernelFrameAllocator {
            inner: Mutex::new(GlobalFrameAllocator::Boot(boot_alloc)),
        }
    }

    /// Builds the coremap over whatever RAM the boot allocator has left and
    /// switches to it.
    pub fn bootstrap(&self) {
        let mut alloc = self.inner.lock();
        let (lo, hi) = match &*alloc {
            GlobalFrameAllocator::Boot(boot_alloc) => boot_alloc.ram_getsize(),
            GlobalFrameAllocator::Coremap(_) => panic!("coremap bootstrapped twice"),
        };
        *alloc = GlobalFrameAllocator::Coremap(Coremap::bootstrap(lo, hi));
        log::info!("frame allocator switched to coremap");
    }

    pub fn is_bootstrapped(&self) -> bool {
        matches!(*self.inner.lock(), GlobalFrameAllocator::Coremap(_))
    }

    pub fn getppages(&self, npages: usize) -> Option<PhysAddr> {
        self.with_generic_allocator(|allocator| allocator.getppages(npages))
    }

    pub fn freeppages(&self, addr: PhysAddr) {
        if addr.is_null() {
            return;
        }
        self.with_generic_allocator(|allocator| allocator.freeppages(addr))
    }

    /// Exposed function to allocate a single frame
    pub fn alloc_frame(&self) -> Option<PhysFrame> {
        self.with_generic_allocator(|allocator| allocator.allocate_frame())
    }

    /// Exposed function to release a single-frame run
    pub fn dealloc_frame(&self, frame: PhysFrame<Size4KiB>) {
        self.with_generic_allocator(|allocator| unsafe { allocator.deallocate_frame(frame) })
    }

    /// Runs `f` on the coremap, or returns None while still in boot mode
    pub fn with_coremap<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Coremap) -> R,
    {
        let mut guard = self.inner.lock();
        match &mut *guard {
            GlobalFrameAllocator::Coremap(coremap) => Some(f(coremap)),
            GlobalFrameAllocator::Boot(_) => None,
        }
    }

    pub fn with_generic_allocator<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut GlobalFrameAllocator) -> R,
    {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}
