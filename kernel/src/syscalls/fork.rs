use crate::{
    error::VmError,
    memory::{fault::CurrentProcess, phys::PhysMemory, Vm},
    processes::process::PCB,
};

/// Duplicates `parent` into a new process with its own copy of the parent's
/// memory. The parent is left untouched if the copy fails.
pub fn sys_fork<M: PhysMemory>(vm: &Vm<M>, parent: &PCB) -> Result<PCB, VmError> {
    let addrspace = parent
        .addrspace()
        .map(|addrspace| addrspace.copy(vm))
        .transpose()?;

    let child = PCB::forked_from(parent, addrspace);
    log::debug!("fork: pid {} -> pid {}", parent.pid, child.pid);
    Ok(child)
}
