// Fault codes delivered by the trap path
pub const VM_FAULT_READ: u32 = 0;
pub const VM_FAULT_WRITE: u32 = 1;
pub const VM_FAULT_READONLY: u32 = 2;

// Error numbers reported to the syscall layer
pub const ENOMEM: i32 = 3;
pub const EINVAL: i32 = 8;
pub const EFAULT: i32 = 6;
pub const EUNIMP: i32 = 2;
