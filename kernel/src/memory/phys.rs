//! Access to the contents of physical frames.
//!
//! The kernel sees all of physical memory through a linear window starting at
//! a fixed virtual offset. [`HhdmMemory`] dereferences that window directly;
//! [`RamArena`] backs the same interface with owned memory so the VM system
//! can run without real hardware.

use crate::constants::memory::{FRAME_SIZE, PAGE_SIZE};
use alloc::{boxed::Box, vec};
use spin::Mutex;
use x86_64::{structures::paging::PhysFrame, PhysAddr, VirtAddr};

pub trait PhysMemory {
    /// Virtual address at which physical address 0 is mapped.
    fn window_offset(&self) -> VirtAddr;

    /// Fills the frame with zeroes.
    fn zero_frame(&self, frame: PhysFrame);

    /// Copies one whole frame onto another.
    fn copy_frame(&self, dst: PhysFrame, src: PhysFrame);

    /// Copies `data` into physical memory starting at `addr`. Must not cross a frame.
    fn write(&self, addr: PhysAddr, data: &[u8]);

    /// Fills `buf` from physical memory starting at `addr`. Must not cross a frame.
    fn read(&self, addr: PhysAddr, buf: &mut [u8]);

    fn kvaddr(&self, paddr: PhysAddr) -> VirtAddr {
        self.window_offset() + paddr.as_u64()
    }

    /// Inverse of [`PhysMemory::kvaddr`]; None for addresses outside the window.
    fn kvaddr_to_paddr(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let offset = self.window_offset();
        if vaddr < offset {
            return None;
        }
        PhysAddr::try_new(vaddr - offset).ok()
    }
}

fn assert_within_frame(addr: PhysAddr, len: usize) {
    let offset = (addr.as_u64() % PAGE_SIZE) as usize;
    assert!(
        offset + len <= FRAME_SIZE,
        "access at {:#x} of {} bytes crosses a frame",
        addr.as_u64(),
        len
    );
}

/// Physical memory reached through the bootloader's higher half direct map.
pub struct HhdmMemory {
    offset: VirtAddr,
}

impl HhdmMemory {
    /// # Safety
    ///
    /// All physical memory handed out by the frame allocator must be mapped
    /// read-write at `offset` for as long as this value is used.
    pub unsafe fn new(offset: VirtAddr) -> Self {
        HhdmMemory { offset }
    }

    fn ptr(&self, addr: PhysAddr) -> *mut u8 {
        self.kvaddr(addr).as_mut_ptr()
    }
}

impl PhysMemory for HhdmMemory {
    fn window_offset(&self) -> VirtAddr {
        self.offset
    }

    fn zero_frame(&self, frame: PhysFrame) {
        unsafe { core::ptr::write_bytes(self.ptr(frame.start_address()), 0, FRAME_SIZE) }
    }

    fn copy_frame(&self, dst: PhysFrame, src: PhysFrame) {
        unsafe {
            core::ptr::copy(
                self.ptr(src.start_address()),
                self.ptr(dst.start_address()),
                FRAME_SIZE,
            )
        }
    }

    fn write(&self, addr: PhysAddr, data: &[u8]) {
        assert_within_frame(addr, data.len());
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(addr), data.len()) }
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
        assert_within_frame(addr, buf.len());
        unsafe { core::ptr::copy_nonoverlapping(self.ptr(addr), buf.as_mut_ptr(), buf.len()) }
    }
}

/// Owned stand-in for physical memory covering [base, base + len).
pub struct RamArena {
    base: PhysAddr,
    offset: VirtAddr,
    bytes: Mutex<Box<[u8]>>,
}

impl RamArena {
    pub fn new(base: PhysAddr, frames: usize, offset: VirtAddr) -> Self {
        RamArena {
            base,
            offset,
            bytes: Mutex::new(vec![0u8; frames * FRAME_SIZE].into_boxed_slice()),
        }
    }

    /// First byte past the arena.
    pub fn end(&self) -> PhysAddr {
        self.base + self.bytes.lock().len() as u64
    }

    fn index(&self, addr: PhysAddr, len: usize) -> usize {
        assert!(addr >= self.base, "{:#x} is below the arena", addr.as_u64());
        let index = (addr - self.base) as usize;
        assert!(
            index + len <= self.bytes.lock().len(),
            "{:#x} is past the arena",
            addr.as_u64()
        );
        index
    }
}

impl PhysMemory for RamArena {
    fn window_offset(&self) -> VirtAddr {
        self.offset
    }

    fn zero_frame(&self, frame: PhysFrame) {
        let start = self.index(frame.start_address(), FRAME_SIZE);
        self.bytes.lock()[start..start + FRAME_SIZE].fill(0);
    }

    fn copy_frame(&self, dst: PhysFrame, src: PhysFrame) {
        let src = self.index(src.start_address(), FRAME_SIZE);
        let dst = self.index(dst.start_address(), FRAME_SIZE);
        self.bytes.lock().copy_within(src..src + FRAME_SIZE, dst);
    }

    fn write(&self, addr: PhysAddr, data: &[u8]) {
        assert_within_frame(addr, data.len());
        let start = self.index(addr, data.len());
        self.bytes.lock()[start..start + data.len()].copy_from_slice(data);
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
        assert_within_frame(addr, buf.len());
        let start = self.index(addr, buf.len());
        buf.copy_from_slice(&self.bytes.lock()[start..start + buf.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::memory::KERNEL_WINDOW_OFFSET;

    fn arena() -> RamArena {
        RamArena::new(
            PhysAddr::new(0x4000),
            4,
            VirtAddr::new(KERNEL_WINDOW_OFFSET),
        )
    }

    fn frame(addr: u64) -> PhysFrame {
        PhysFrame::containing_address(PhysAddr::new(addr))
    }

    #[test]
    fn test_window_translation() {
        let ram = arena();
        let kva = ram.kvaddr(PhysAddr::new(0x5000));
        assert_eq!(kva.as_u64(), KERNEL_WINDOW_OFFSET + 0x5000);
        assert_eq!(ram.kvaddr_to_paddr(kva), Some(PhysAddr::new(0x5000)));
        assert_eq!(ram.kvaddr_to_paddr(VirtAddr::new(0x5000)), None);
        assert_eq!(ram.end(), PhysAddr::new(0x8000));
    }

    #[test]
    fn test_copy_and_zero_frames() {
        let ram = arena();
        ram.write(PhysAddr::new(0x4010), b"frame zero");
        ram.copy_frame(frame(0x6000), frame(0x4000));

        let mut buf = [0u8; 10];
        ram.read(PhysAddr::new(0x6010), &mut buf);
        assert_eq!(&buf, b"frame zero");

        ram.zero_frame(frame(0x4000));
        ram.read(PhysAddr::new(0x4010), &mut buf);
        assert_eq!(buf, [0u8; 10]);
    }

    #[test]
    #[should_panic(expected = "crosses a frame")]
    fn test_write_across_frames_panics() {
        let ram = arena();
        ram.write(PhysAddr::new(0x4ffe), &[1, 2, 3]);
    }
}
