use core::sync::atomic::{AtomicU32, Ordering};

use x86_64::VirtAddr;

use crate::{
    cpu::Cpu,
    interrupts::InterruptControl,
    memory::{addrspace::AddressSpace, fault::CurrentProcess, tlb::EvictionPolicy},
};

// process counter must be thread-safe
pub static NEXT_PID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Terminated,
}

#[derive(Debug)]
pub struct PCB {
    pub pid: u32,
    state: ProcessState,
    stack_pointer: u64,
    program_counter: u64,
    addrspace: Option<AddressSpace>,
}

impl Default for PCB {
    fn default() -> Self {
        Self::new()
    }
}

impl PCB {
    /// A fresh process with a new pid and no address space.
    pub fn new() -> Self {
        PCB {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            state: ProcessState::New,
            stack_pointer: 0,
            program_counter: 0,
            addrspace: None,
        }
    }

    /// A new process that resumes where `parent` is, in `addrspace`.
    pub(crate) fn forked_from(parent: &PCB, addrspace: Option<AddressSpace>) -> Self {
        PCB {
            state: ProcessState::Ready,
            stack_pointer: parent.stack_pointer,
            program_counter: parent.program_counter,
            addrspace,
            ..PCB::new()
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.stack_pointer)
    }

    pub fn program_counter(&self) -> VirtAddr {
        VirtAddr::new(self.program_counter)
    }

    pub(crate) fn set_entry(&mut self, stack_pointer: VirtAddr, program_counter: VirtAddr) {
        self.stack_pointer = stack_pointer.as_u64();
        self.program_counter = program_counter.as_u64();
    }

    pub fn addrspace_mut(&mut self) -> Option<&mut AddressSpace> {
        self.addrspace.as_mut()
    }

    /// Installs `addrspace`, handing back the one it replaces.
    pub fn set_addrspace(&mut self, addrspace: AddressSpace) -> Option<AddressSpace> {
        self.addrspace.replace(addrspace)
    }

    pub fn take_addrspace(&mut self) -> Option<AddressSpace> {
        self.addrspace.take()
    }

    /// Switches `cpu` to this process.
    pub fn run_on<I: InterruptControl, P: EvictionPolicy>(&mut self, cpu: &mut Cpu<I, P>) {
        if let Some(addrspace) = &self.addrspace {
            addrspace.activate(cpu);
        }
        self.state = ProcessState::Running;
    }

    /// Takes this process off `cpu`.
    pub fn stop_on<I: InterruptControl, P: EvictionPolicy>(&mut self, cpu: &mut Cpu<I, P>) {
        if let Some(addrspace) = &self.addrspace {
            addrspace.deactivate(cpu);
        }
        if self.state == ProcessState::Running {
            self.state = ProcessState::Ready;
        }
    }
}

impl CurrentProcess for PCB {
    fn addrspace(&self) -> Option<&AddressSpace> {
        self.addrspace.as_ref()
    }
}
