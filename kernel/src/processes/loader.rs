use x86_64::VirtAddr;

use crate::{
    cpu::Cpu,
    error::VmError,
    interrupts::InterruptControl,
    memory::{
        addrspace::{AddressSpace, ProtFlags},
        phys::PhysMemory,
        tlb::EvictionPolicy,
        Vm,
    },
    processes::process::{ProcessState, PCB},
};

/// One loadable piece of a program image. `bytes` fill the start of the
/// segment and the remaining `memsz - bytes.len()` bytes stay zero.
#[derive(Debug, Clone, Copy)]
pub struct LoadSegment<'a> {
    pub vaddr: VirtAddr,
    pub memsz: usize,
    pub bytes: &'a [u8],
    pub prot: ProtFlags,
}

/// Builds a fresh address space for `pcb` from `segments`, the first of
/// which is the code segment, and makes it current on `cpu`.
///
/// # Returns
/// The initial stack pointer and entry point. On error `pcb` keeps the
/// address space it had.
pub fn load_program<M, I, P>(
    vm: &Vm<M>,
    cpu: &mut Cpu<I, P>,
    pcb: &mut PCB,
    segments: &[LoadSegment],
    entry: VirtAddr,
) -> Result<(VirtAddr, VirtAddr), VmError>
where
    M: PhysMemory,
    I: InterruptControl,
    P: EvictionPolicy,
{
    let mut addrspace = AddressSpace::create();
    for segment in segments {
        if segment.bytes.len() > segment.memsz {
            return Err(VmError::InvalidArgument);
        }
        addrspace.define_region(segment.vaddr, segment.memsz, segment.prot)?;
    }
    addrspace.prepare_load(vm)?;

    for segment in segments {
        if let Err(err) = addrspace.write_bytes(vm, segment.vaddr, segment.bytes) {
            addrspace.destroy(vm);
            return Err(err);
        }
    }

    addrspace.complete_load(cpu);
    let stack_top = addrspace.define_stack();

    if let Some(old) = pcb.set_addrspace(addrspace) {
        old.destroy(vm);
    }
    pcb.set_entry(stack_top, entry);
    pcb.set_state(ProcessState::Ready);

    log::debug!(
        "vm: loaded pid {} entry {:#x} stack {:#x}",
        pcb.pid,
        entry.as_u64(),
        stack_top.as_u64()
    );
    Ok((stack_top, entry))
}
