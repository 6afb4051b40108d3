use crate::{
    memory::{phys::PhysMemory, Vm},
    processes::process::{ProcessState, PCB},
};

/// Tears down `pcb`'s memory and marks it terminated.
pub fn sys_exit<M: PhysMemory>(vm: &Vm<M>, pcb: &mut PCB) {
    if let Some(addrspace) = pcb.take_addrspace() {
        addrspace.destroy(vm);
    }
    pcb.set_state(ProcessState::Terminated);
    log::debug!("exit: pid {}", pcb.pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::FRAME_SIZE,
        memory::{
            addrspace::{AddressSpace, ProtFlags},
            fault::CurrentProcess,
            tests::{emulated_vm, free_frames},
        },
        syscalls::fork::sys_fork,
    };
    use x86_64::VirtAddr;

    #[test]
    fn test_exit_returns_every_frame() {
        let vm = emulated_vm(64);
        let mut parent = PCB::new();
        let mut space = AddressSpace::create();
        space
            .define_region(VirtAddr::new(0x40_0000), 3 * FRAME_SIZE, ProtFlags::new())
            .expect("code region");
        space.prepare_load(&vm).expect("prepare_load");
        parent.set_addrspace(space);

        let mut child = sys_fork(&vm, &parent).expect("fork");
        sys_exit(&vm, &mut child);
        sys_exit(&vm, &mut parent);

        assert_eq!(free_frames(&vm), 64);
        assert_eq!(parent.state(), ProcessState::Terminated);
        assert!(parent.addrspace().is_none());

        // exiting twice is harmless
        sys_exit(&vm, &mut parent);
        assert_eq!(free_frames(&vm), 64);
    }
}
