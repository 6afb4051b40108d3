pub const PAGE_SIZE: u64 = 4096;
pub const FRAME_SIZE: usize = 4096;

/// Kernel virtual address at which all of physical memory is mapped.
pub const KERNEL_WINDOW_OFFSET: u64 = 0xFFFF_8000_0000_0000;

/// Number of slots in each core's translation cache.
pub const NUM_TLB: usize = 64;
pub const DEFAULT_TLB_SEED: u64 = 0x1332;

/// Variable-size regions an address space may define, not counting the stack.
pub const MAX_REGIONS: usize = 2;

// 12 pages (48 KiB) of user stack, always the window just below USERSTACK
pub const STACK_PAGES: usize = 12;
pub const USERSTACK: u64 = 0x7000_0000_0000;
