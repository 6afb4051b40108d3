use crate::constants::processes::{EFAULT, EINVAL, ENOMEM, EUNIMP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No frame run of the requested length, or page-table storage could not be reserved.
    OutOfMemory,
    /// A third variable region was requested.
    TooManyRegions,
    /// Access outside every region, or a write to an enforced read-only page.
    Fault,
    /// Unrecognised fault code.
    InvalidArgument,
}

impl VmError {
    /// Error number handed back to the syscall layer.
    pub fn errno(self) -> i32 {
        match self {
            VmError::OutOfMemory => ENOMEM,
            VmError::TooManyRegions => EUNIMP,
            VmError::Fault => EFAULT,
            VmError::InvalidArgument => EINVAL,
        }
    }
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::OutOfMemory => write!(f, "Out of memory"),
            VmError::TooManyRegions => write!(f, "Too many regions"),
            VmError::Fault => write!(f, "Bad memory reference"),
            VmError::InvalidArgument => write!(f, "Invalid argument"),
        }
    }
}
