pub mod fork;
pub mod syscall_handlers;
