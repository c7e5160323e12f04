// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel construction and the exception entry point.

use std::convert::TryFrom;
use std::sync::Arc;

use abi::{regs, ExceptionCause};

use crate::config::KernelConfig;
use crate::err::{ConfigError, LoadError};
use crate::machine::{Flow, Machine};
use crate::mem::frames::FrameAllocator;
use crate::proc::process::{
    current_process, ops_for_kind, Process, ProcessOps,
};
use crate::proc::syscalls::{self, SyscallOutcome};
use crate::proc::table::ProcessTable;
use crate::sched::ThreadSet;
use crate::sync::alarm::Alarm;
use crate::sync::condvar::Condition;
use crate::sync::lock::Lock;
use crate::sync::rendezvous::Rendezvous;

/// The assembled kernel: machine handles, thread system, and the shared
/// services every process uses.
///
/// Constructing a `Kernel` enrolls the calling thread as the boot thread,
/// claims the machine's timer interrupt for the alarm, and installs the
/// exception handler. One kernel per machine.
pub struct Kernel {
    machine: Machine,
    config: KernelConfig,
    sched: Arc<ThreadSet>,
    frames: FrameAllocator,
    processes: ProcessTable,
    alarm: Arc<Alarm>,
    ops: Arc<dyn ProcessOps>,
}

impl Kernel {
    pub fn new(
        machine: Machine,
        config: KernelConfig,
    ) -> Result<Arc<Kernel>, ConfigError> {
        let ops = ops_for_kind(&config.process_kind)?;
        let sched = ThreadSet::new(Arc::clone(&machine.interrupts));
        let alarm = Alarm::new(
            Arc::clone(&sched),
            Arc::clone(&machine.interrupts),
            Arc::clone(&machine.timer),
        );
        let frames = FrameAllocator::new(machine.processor.num_phys_pages());

        let kernel = Arc::new(Kernel {
            machine,
            config,
            sched,
            frames,
            processes: ProcessTable::new(),
            alarm,
            ops,
        });

        let hook = Arc::downgrade(&kernel);
        kernel
            .machine
            .processor
            .set_exception_handler(Box::new(move || match hook.upgrade() {
                Some(kernel) => trap_entry(&kernel),
                None => Flow::Terminate,
            }));
        Ok(kernel)
    }

    /// Creates a process and starts it on `name`. The usual way to get the
    /// first (root) program running.
    pub fn launch(
        self: &Arc<Self>,
        name: &str,
        args: &[String],
    ) -> Result<Arc<Process>, LoadError> {
        let process = Process::create(self);
        process.execute(self, name, args)?;
        Ok(process)
    }

    /// Stops the machine. Blocked threads never resume; running ones
    /// unwind when they next cross the kernel boundary.
    pub fn terminate(&self) {
        log::debug!("machine halting");
        self.machine.power.halt();
    }

    /// Builds a lock backed by this kernel's scheduler.
    pub fn new_lock(&self) -> Arc<Lock> {
        Arc::new(Lock::new(
            Arc::clone(&self.sched),
            Arc::clone(&self.machine.interrupts),
        ))
    }

    /// Builds a condition variable bound to `lock`.
    pub fn new_condition(&self, lock: &Arc<Lock>) -> Condition {
        Condition::new(Arc::clone(lock))
    }

    /// Builds a rendezvous channel backed by this kernel's scheduler.
    pub fn new_rendezvous(&self) -> Rendezvous {
        Rendezvous::new(
            Arc::clone(&self.sched),
            Arc::clone(&self.machine.interrupts),
        )
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<ThreadSet> {
        &self.sched
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn alarm(&self) -> &Arc<Alarm> {
        &self.alarm
    }

    pub(crate) fn process_ops(&self) -> Arc<dyn ProcessOps> {
        Arc::clone(&self.ops)
    }
}

/// The exception entry point, invoked by the processor on the trapping
/// thread.
///
/// A syscall trap reads the number and argument registers, dispatches, and
/// -- unless the process terminated -- writes the result back and steps the
/// program counter past the trap instruction. Every other cause is fatal
/// to the process (but only the process): it exits with status 1.
fn trap_entry(kernel: &Arc<Kernel>) -> Flow {
    let process = match current_process() {
        Some(p) => p,
        None => panic!("processor exception on a thread with no process"),
    };
    let cpu = &kernel.machine.processor;
    let cause = cpu.read_register(regs::CAUSE);

    match ExceptionCause::try_from(cause) {
        Ok(ExceptionCause::Syscall) => {
            let num = cpu.read_register(regs::V0) as u32;
            let args = [
                cpu.read_register(regs::A0),
                cpu.read_register(regs::A1),
                cpu.read_register(regs::A2),
                cpu.read_register(regs::A3),
            ];
            match syscalls::dispatch(kernel, &process, num, args) {
                SyscallOutcome::Return(value) => {
                    cpu.write_register(regs::V0, value);
                    cpu.advance_pc();
                    Flow::Continue
                }
                SyscallOutcome::Terminate => Flow::Terminate,
            }
        }
        _ => {
            log::debug!(
                "unexpected exception (cause {cause}) in process {}",
                process.pid().0
            );
            syscalls::handle_exit(kernel, &process, 1);
            Flow::Terminate
        }
    }
}
