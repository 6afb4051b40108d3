//! Coremap
//!
//! - One entry per allocatable physical frame
//! - Allocates contiguous runs first-fit and frees them as a unit

use crate::constants::memory::{FRAME_SIZE, PAGE_SIZE};
use alloc::{boxed::Box, vec::Vec};
use x86_64::{structures::paging::PhysFrame, PhysAddr};

/// Bookkeeping for a single frame.
///
/// * `addr`: base physical address of the frame
/// * `run_tag`: 0 if free, otherwise the frame's 1-based position inside its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoremapEntry {
    pub addr: PhysAddr,
    pub run_tag: usize,
}

impl CoremapEntry {
    pub fn is_free(&self) -> bool {
        self.run_tag == 0
    }
}

pub struct Coremap {
    entries: Box<[CoremapEntry]>,
    map_frames: usize,
    used_frames: usize,
}

impl Coremap {
    /// Builds the coremap over [lo, hi).
    ///
    /// The first frames of the range are reserved for the coremap's own
    /// entries; everything after them is allocatable.
    pub fn bootstrap(lo: PhysAddr, hi: PhysAddr) -> Self {
        let lo = lo.align_up(PAGE_SIZE);
        let total_frames = if hi > lo {
            ((hi - lo) / PAGE_SIZE) as usize
        } else {
            0
        };

        let map_frames = (total_frames * core::mem::size_of::<CoremapEntry>()).div_ceil(FRAME_SIZE);
        let max_pages = total_frames.saturating_sub(map_frames);
        let base = lo + (map_frames as u64 * PAGE_SIZE);

        log::info!(
            "coremap: {} frames in [{:#x}, {:#x}), {} reserved for the map, first frame {:#x}",
            total_frames,
            lo.as_u64(),
            hi.as_u64(),
            map_frames,
            base.as_u64()
        );

        let entries: Vec<CoremapEntry> = (0..max_pages)
            .map(|i| CoremapEntry {
                addr: base + (i as u64 * PAGE_SIZE),
                run_tag: 0,
            })
            .collect();

        Coremap {
            entries: entries.into_boxed_slice(),
            map_frames,
            used_frames: 0,
        }
    }

    /// Finds the lowest run of `npages` free frames and claims it.
    ///
    /// # Returns
    /// The base address of the run, or None if no run is long enough
    pub fn allocate(&mut self, npages: usize) -> Option<PhysAddr> {
        if npages == 0 {
            return None;
        }

        let mut start = 0;
        let mut seqlen = 0;
        for i in 0..self.entries.len() {
            if !self.entries[i].is_free() {
                seqlen = 0;
                continue;
            }
            if seqlen == 0 {
                start = i;
            }
            seqlen += 1;

            if seqlen == npages {
                for (tag, entry) in self.entries[start..start + npages].iter_mut().enumerate() {
                    entry.run_tag = tag + 1;
                }
                self.used_frames += npages;
                log::trace!(
                    "coremap: allocated {} frames at {:#x}",
                    npages,
                    self.entries[start].addr.as_u64()
                );
                return Some(self.entries[start].addr);
            }
        }

        log::debug!("coremap: no run of {} free frames", npages);
        None
    }

    /// Releases the run that starts at `addr`.
    ///
    /// Anything that is not the first frame of a live run is ignored.
    pub fn free(&mut self, addr: PhysAddr) {
        let Some(mut index) = self.frame_index(addr) else {
            return;
        };
        if self.entries[index].run_tag != 1 {
            return;
        }

        let mut tag = 1;
        loop {
            self.entries[index].run_tag = 0;
            self.used_frames -= 1;
            index += 1;
            tag += 1;
            if index >= self.entries.len() || self.entries[index].run_tag != tag {
                break;
            }
        }
        log::trace!("coremap: freed {} frames at {:#x}", tag - 1, addr.as_u64());
    }

    /// Index of the frame based at `addr`, if the coremap manages one.
    pub fn frame_index(&self, addr: PhysAddr) -> Option<usize> {
        let first = self.entries.first()?.addr;
        if addr < first || !addr.is_aligned(PAGE_SIZE) {
            return None;
        }
        let index = ((addr - first) / PAGE_SIZE) as usize;
        (index < self.entries.len()).then_some(index)
    }

    /// Check if frame is used. input: PhysFrame, output: bool
    pub fn is_frame_used(&self, frame: PhysFrame) -> bool {
        self.frame_index(frame.start_address())
            .is_some_and(|i| !self.entries[i].is_free())
    }

    pub fn entries(&self) -> &[CoremapEntry] {
        &self.entries
    }

    pub fn total_frames(&self) -> usize {
        self.entries.len()
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn free_frames(&self) -> usize {
        self.entries.len() - self.used_frames
    }

    /// Frames at the bottom of the range that hold the coremap itself.
    pub fn map_frames(&self) -> usize {
        self.map_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP_BASE: u64 = 0x10_0000;

    /// A coremap with exactly `frames` allocatable frames.
    fn coremap_with(frames: usize) -> Coremap {
        let map_frames = (frames * core::mem::size_of::<CoremapEntry>()).div_ceil(FRAME_SIZE);
        let hi = MAP_BASE + ((frames + map_frames) as u64 * PAGE_SIZE);
        let coremap = Coremap::bootstrap(PhysAddr::new(MAP_BASE), PhysAddr::new(hi));
        assert_eq!(coremap.total_frames(), frames);
        coremap
    }

    fn frame_addr(coremap: &Coremap, index: usize) -> PhysAddr {
        coremap.entries()[index].addr
    }

    /// Every used frame must sit inside a well formed run 1..N.
    fn assert_runs_well_formed(coremap: &Coremap) {
        let mut expected = 0;
        let mut used = 0;
        for entry in coremap.entries() {
            match entry.run_tag {
                0 => expected = 0,
                1 => expected = 1,
                tag => {
                    expected += 1;
                    assert_eq!(tag, expected, "run tags must be contiguous");
                }
            }
            if entry.run_tag != 0 {
                used += 1;
            }
        }
        assert_eq!(used, coremap.used_frames());
        assert!(coremap.used_frames() <= coremap.total_frames());
    }

    #[test]
    fn test_bootstrap_reserves_map_frames() {
        let lo = PhysAddr::new(MAP_BASE + 123);
        let hi = PhysAddr::new(MAP_BASE + 1024 * PAGE_SIZE);
        let coremap = Coremap::bootstrap(lo, hi);

        // lo is rounded up, so one frame is lost to alignment
        let fitting = 1023;
        let map_frames = (fitting * core::mem::size_of::<CoremapEntry>()).div_ceil(FRAME_SIZE);
        assert_eq!(coremap.map_frames(), map_frames);
        assert_eq!(coremap.total_frames(), fitting - map_frames);
        assert_eq!(
            frame_addr(&coremap, 0),
            PhysAddr::new(MAP_BASE + PAGE_SIZE + map_frames as u64 * PAGE_SIZE)
        );
        assert!(coremap.entries().iter().all(CoremapEntry::is_free));
        assert_eq!(coremap.free_frames(), coremap.total_frames());
    }

    #[test]
    fn test_bootstrap_tiny_range() {
        let coremap = Coremap::bootstrap(PhysAddr::new(MAP_BASE), PhysAddr::new(MAP_BASE));
        assert_eq!(coremap.total_frames(), 0);

        let mut coremap = coremap;
        assert_eq!(coremap.allocate(1), None);
        coremap.free(PhysAddr::new(MAP_BASE));
    }

    #[test]
    fn test_first_fit() {
        let mut coremap = coremap_with(10);
        let a = coremap.allocate(3).expect("allocation failed");
        let b = coremap.allocate(3).expect("allocation failed");
        let c = coremap.allocate(4).expect("allocation failed");
        assert_eq!(a, frame_addr(&coremap, 0));
        assert_eq!(c, frame_addr(&coremap, 6));

        coremap.free(b);
        assert_eq!(coremap.allocate(3), Some(frame_addr(&coremap, 3)));
        assert_runs_well_formed(&coremap);
    }

    #[test]
    fn test_first_fit_skips_short_holes() {
        let mut coremap = coremap_with(10);
        let runs: Vec<PhysAddr> = (0..10).map(|_| coremap.allocate(1).expect("alloc")).collect();
        coremap.free(runs[1]);
        coremap.free(runs[4]);
        coremap.free(runs[5]);

        assert_eq!(coremap.allocate(2), Some(frame_addr(&coremap, 4)));
        assert_eq!(coremap.allocate(1), Some(frame_addr(&coremap, 1)));
        assert_eq!(coremap.allocate(1), None);
    }

    #[test]
    fn test_free_then_allocate_reuses_run() {
        let mut coremap = coremap_with(100);
        let a = coremap.allocate(10).expect("allocation failed");
        coremap.free(a);
        assert_eq!(coremap.used_frames(), 0);
        assert_eq!(coremap.allocate(10), Some(a));
    }

    #[test]
    fn test_no_partial_allocation() {
        let mut coremap = coremap_with(8);
        coremap.allocate(5).expect("allocation failed");
        assert_eq!(coremap.allocate(4), None);
        assert_eq!(coremap.used_frames(), 5);
        assert_eq!(coremap.allocate(0), None);
        assert_eq!(coremap.allocate(3), Some(frame_addr(&coremap, 5)));
        assert_eq!(coremap.free_frames(), 0);
    }

    #[test]
    fn test_free_ignores_non_start_and_garbage() {
        let mut coremap = coremap_with(16);
        let run = coremap.allocate(4).expect("allocation failed");
        let before: Vec<CoremapEntry> = coremap.entries().to_vec();

        // middle of a run
        coremap.free(run + PAGE_SIZE);
        // free frame
        coremap.free(frame_addr(&coremap, 10));
        // misaligned, below and above the coremap, null
        coremap.free(run + 12u64);
        coremap.free(PhysAddr::new(MAP_BASE));
        coremap.free(frame_addr(&coremap, 15) + PAGE_SIZE);
        coremap.free(PhysAddr::zero());

        assert_eq!(coremap.entries(), &before[..]);
        assert_eq!(coremap.used_frames(), 4);
    }

    #[test]
    fn test_free_stops_at_adjacent_run() {
        let mut coremap = coremap_with(8);
        let a = coremap.allocate(2).expect("allocation failed");
        let b = coremap.allocate(3).expect("allocation failed");
        let c = coremap.allocate(1).expect("allocation failed");

        coremap.free(a);
        assert!(coremap.entries()[..2].iter().all(CoremapEntry::is_free));
        assert_eq!(
            coremap.entries()[2..5].iter().map(|e| e.run_tag).collect::<Vec<_>>(),
            [1, 2, 3]
        );

        // a double free is a no-op
        coremap.free(a);
        assert_eq!(coremap.used_frames(), 4);

        coremap.free(b);
        coremap.free(c);
        assert_eq!(coremap.used_frames(), 0);
    }

    #[test]
    fn test_free_run_at_end_of_map() {
        let mut coremap = coremap_with(4);
        coremap.allocate(1).expect("allocation failed");
        let tail = coremap.allocate(3).expect("allocation failed");
        assert_eq!(coremap.free_frames(), 0);

        coremap.free(tail);
        assert_eq!(coremap.free_frames(), 3);
        assert!(coremap.is_frame_used(PhysFrame::containing_address(frame_addr(&coremap, 0))));
        assert!(!coremap.is_frame_used(PhysFrame::containing_address(tail)));
    }

    #[test]
    fn test_no_overlap_under_churn() {
        let mut coremap = coremap_with(64);
        let mut live: Vec<(PhysAddr, usize)> = Vec::new();

        for round in 0..200usize {
            let npages = round % 7 + 1;
            if round % 3 == 2 && !live.is_empty() {
                let (addr, _) = live.remove(round % live.len());
                coremap.free(addr);
            } else if let Some(addr) = coremap.allocate(npages) {
                live.push((addr, npages));
            }

            assert_runs_well_formed(&coremap);
            let held: usize = live.iter().map(|&(_, n)| n).sum();
            assert_eq!(held, coremap.used_frames());

            for (i, &(a, an)) in live.iter().enumerate() {
                for &(b, bn) in &live[i + 1..] {
                    let a_end = a + an as u64 * PAGE_SIZE;
                    let b_end = b + bn as u64 * PAGE_SIZE;
                    assert!(a_end <= b || b_end <= a, "runs overlap");
                }
            }
        }
    }
}
