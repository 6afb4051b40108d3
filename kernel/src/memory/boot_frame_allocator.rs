//! Boot Frame Allocator
//!
//! - Provides a method to allocate memory before the coremap is set up
//! - Steals contiguous frames from the bottom of RAM and never gives them back

use crate::constants::memory::{FRAME_SIZE, PAGE_SIZE};
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr,
};

/// Boot frame allocator, necessary to hand out frames before the coremap exists
///
/// * `first_free`: lowest physical address not yet stolen
/// * `last`: end of usable RAM (exclusive)
pub struct BootFrameAllocator {
    first_free: PhysAddr,
    last: PhysAddr,
}

impl BootFrameAllocator {
    /// Init function
    ///
    /// # Returns
    /// A boot allocator owning the usable RAM in [first_free, last)
    pub fn init(first_free: PhysAddr, last: PhysAddr) -> Self {
        BootFrameAllocator {
            first_free: first_free.align_up(PAGE_SIZE),
            last,
        }
    }

    /// Steal `npages` contiguous frames
    ///
    /// # Returns
    /// Base of the stolen frames, or None if RAM is exhausted
    pub fn stealmem(&mut self, npages: usize) -> Option<PhysAddr> {
        if npages == 0 {
            return None;
        }
        let size = npages.checked_mul(FRAME_SIZE)? as u64;
        if self.first_free.as_u64().checked_add(size)? > self.last.as_u64() {
            return None;
        }

        let addr = self.first_free;
        self.first_free += size;
        Some(addr)
    }

    /// Range of RAM that has not been stolen yet
    pub fn ram_getsize(&self) -> (PhysAddr, PhysAddr) {
        (self.first_free, self.last)
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootFrameAllocator {
    /// Allocate the single next available frame
    ///
    /// # Returns
    /// Either a PhysFrame or None (if out of frames)
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        self.stealmem(1).map(PhysFrame::containing_address)
    }
}

impl FrameDeallocator<Size4KiB> for BootFrameAllocator {
    /// Stolen memory is never returned; freeing it is silently ignored
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        log::trace!(
            "boot allocator: ignoring free of {:#x}",
            frame.start_address().as_u64()
        );
    }
}
