//! TLB miss handling.

use x86_64::{
    structures::paging::{Page, Size4KiB},
    VirtAddr,
};

use crate::{
    constants::{
        memory::NUM_TLB,
        processes::{VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE},
    },
    cpu::Cpu,
    error::VmError,
    interrupts::InterruptControl,
    memory::{
        addrspace::{AddressSpace, Segment},
        tlb::{EvictionPolicy, TlbEntry},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read with no valid translation.
    Read,
    /// Write with no valid translation.
    Write,
    /// Write through a translation that is not writable.
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = VmError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(FaultKind::Read),
            VM_FAULT_WRITE => Ok(FaultKind::Write),
            VM_FAULT_READONLY => Ok(FaultKind::ReadOnly),
            _ => Err(VmError::InvalidArgument),
        }
    }
}

impl From<FaultKind> for u32 {
    fn from(kind: FaultKind) -> u32 {
        match kind {
            FaultKind::Read => VM_FAULT_READ,
            FaultKind::Write => VM_FAULT_WRITE,
            FaultKind::ReadOnly => VM_FAULT_READONLY,
        }
    }
}

/// The process running on the faulting core, as far as the fault handler
/// cares.
pub trait CurrentProcess {
    fn addrspace(&self) -> Option<&AddressSpace>;
}

/// Handles a TLB miss at `fault_address` by installing a translation on
/// `cpu`.
///
/// Faults with no process or no address space behind them are refused with
/// `Fault` rather than retried, since they come from the kernel itself.
pub fn vm_fault<I, P, C>(
    cpu: &mut Cpu<I, P>,
    curproc: Option<&C>,
    fault_type: u32,
    fault_address: VirtAddr,
) -> Result<(), VmError>
where
    I: InterruptControl,
    P: EvictionPolicy,
    C: CurrentProcess + ?Sized,
{
    let page: Page<Size4KiB> = Page::containing_address(fault_address);
    let faultaddress = page.start_address();

    log::debug!("vm: fault: {:#x}", faultaddress.as_u64());

    match FaultKind::try_from(fault_type)? {
        // pages are never upgraded to writable after the fact
        FaultKind::ReadOnly => return Err(VmError::Fault),
        FaultKind::Read | FaultKind::Write => {}
    }

    let addrspace = curproc
        .ok_or(VmError::Fault)?
        .addrspace()
        .ok_or(VmError::Fault)?;

    let (segment, index) = addrspace.classify(faultaddress).ok_or(VmError::Fault)?;
    let frame = addrspace
        .table(segment)
        .unwrap_or_else(|| panic!("vm: fault in {:?} before prepare_load", segment))
        .get(index)
        .unwrap_or_else(|| panic!("vm: no frame for page {} of {:?}", index, segment));

    let read_only = segment == Segment::Code && addrspace.is_load_complete();
    let entry = TlbEntry::new(page, frame, !read_only);

    cpu.with_tlb(|tlb| {
        match (0..NUM_TLB).find(|&i| !tlb.read(i).is_valid()) {
            Some(i) => tlb.write(entry, i),
            None => {
                tlb.random(entry);
            }
        }
    });

    log::debug!(
        "vm: {:#x} -> {:#x}",
        faultaddress.as_u64(),
        frame.start_address().as_u64()
    );
    Ok(())
}
