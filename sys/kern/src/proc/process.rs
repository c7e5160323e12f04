// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The user process object and its capability bundle.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use abi::Pid;

use crate::err::{ConfigError, LoadError};
use crate::kassert;
use crate::kernel::Kernel;
use crate::machine::{ObjectImage, UserExit};
use crate::mem::frames::FrameAllocator;
use crate::mem::space::AddressSpace;
use crate::proc::fd::FdTable;
use crate::sched::Tid;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Process>>> = const { RefCell::new(None) };
}

/// The process whose thread is executing, if the calling thread runs one.
/// This is how the exception path finds the faulting process.
pub fn current_process() -> Option<Arc<Process>> {
    CURRENT.with(|c| c.borrow().clone())
}

pub(crate) fn set_current(process: Option<Arc<Process>>) {
    CURRENT.with(|c| *c.borrow_mut() = process);
}

/// The operations a process kind can customize.
///
/// The base kind implements the plain semantics below; an extended kind
/// (say, one that pages sections on demand) replaces how sections enter and
/// leave memory and may add syscalls of its own. The bundle is chosen once,
/// at kernel construction, from `KernelConfig::process_kind`.
pub trait ProcessOps: Send + Sync {
    /// Copies the image's sections into the frames already assigned in
    /// `space`'s page table, applying each section's write protection.
    fn load_sections(
        &self,
        image: &dyn ObjectImage,
        space: &AddressSpace,
    ) -> Result<(), LoadError>;

    /// Releases everything `load_sections` (and the rest of load) claimed.
    fn unload_sections(&self, space: &AddressSpace, frames: &FrameAllocator);

    /// Offered any syscall number the dispatcher does not recognize.
    /// Returning `None` makes the number fatal.
    fn handle_extension_syscall(
        &self,
        process: &Arc<Process>,
        num: u32,
        args: [i32; 4],
    ) -> Option<i32>;
}

/// The stock process kind.
pub struct BaseOps;

impl ProcessOps for BaseOps {
    fn load_sections(
        &self,
        image: &dyn ObjectImage,
        space: &AddressSpace,
    ) -> Result<(), LoadError> {
        for (index, section) in image.sections().iter().enumerate() {
            log::debug!(
                "initializing {} section ({} pages)",
                section.name,
                section.num_pages
            );
            for page in 0..section.num_pages {
                let vpn = section.first_vpn + page;
                let ppn = space.page_table().with_entries(|entries| {
                    let entry = &mut entries[vpn];
                    entry.read_only = section.read_only;
                    entry.ppn
                });
                image.load_page(index, page, ppn)?;
            }
        }
        Ok(())
    }

    fn unload_sections(&self, space: &AddressSpace, frames: &FrameAllocator) {
        space.release_frames(frames);
    }

    fn handle_extension_syscall(
        &self,
        _process: &Arc<Process>,
        _num: u32,
        _args: [i32; 4],
    ) -> Option<i32> {
        None
    }
}

/// Resolves a configured process kind to its capability bundle. The known
/// set is deliberately small; an unknown name is a configuration error
/// rather than a fallback.
pub fn ops_for_kind(kind: &str) -> Result<Arc<dyn ProcessOps>, ConfigError> {
    match kind {
        "base" => Ok(Arc::new(BaseOps)),
        other => Err(ConfigError::UnknownProcessKind(other.to_string())),
    }
}

/// Mutable process state, under one small lock.
pub(crate) struct ProcessState {
    /// Parent pid; `Pid::NONE` once disowned (or never adopted).
    pub ppid: Pid,
    /// Pids of children created through `exec`, in creation order. A child
    /// stays here even after being reaped, which is what makes a second
    /// `join` fail on the registry lookup rather than the child check.
    pub children: Vec<Pid>,
    pub exit_status: Option<i32>,
    pub files: FdTable,
}

/// One user process.
pub struct Process {
    pid: Pid,
    ops: Arc<dyn ProcessOps>,
    state: Mutex<ProcessState>,
    space: Mutex<Option<AddressSpace>>,
    thread: OnceLock<Tid>,
}

impl Process {
    /// Allocates a process: fresh pid, console descriptors installed, no
    /// address space yet. The process is registered before this returns.
    pub fn create(kernel: &Arc<Kernel>) -> Arc<Process> {
        let pid = kernel.processes().allocate_pid();
        let files = FdTable::new(&*kernel.machine().console);
        let process = Arc::new(Process {
            pid,
            ops: kernel.process_ops(),
            state: Mutex::new(ProcessState {
                ppid: Pid::NONE,
                children: Vec::new(),
                exit_status: None,
                files,
            }),
            space: Mutex::new(None),
            thread: OnceLock::new(),
        });
        kernel.processes().insert(Arc::clone(&process));
        process
    }

    /// Loads `name` into this process and forks its thread. On a load
    /// failure nothing runs, no frames stay allocated, and the process
    /// remains registered in whatever state it reached.
    pub fn execute(
        self: &Arc<Self>,
        kernel: &Arc<Kernel>,
        name: &str,
        args: &[String],
    ) -> Result<(), LoadError> {
        let space = AddressSpace::load(
            kernel.machine(),
            kernel.frames(),
            &*self.ops,
            name,
            args,
            kernel.config().stack_pages,
        )?;
        *self.space.lock() = Some(space);

        let sched = Arc::clone(kernel.scheduler());
        let process = Arc::clone(self);
        let kernel = Arc::clone(kernel);
        let tid = sched.fork(name, move || {
            set_current(Some(Arc::clone(&process)));
            {
                let space = process.space.lock();
                if let Some(space) = space.as_ref() {
                    space.activate();
                    space.init_registers();
                }
            }
            let exit = kernel.machine().processor.run();
            if exit == UserExit::Completed {
                // The program body ran off its end without calling exit.
                crate::proc::syscalls::handle_exit(&kernel, &process, 0);
            }
            set_current(None);
        });
        kassert!(self.thread.set(tid).is_ok(), "process executed twice");
        Ok(())
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn ppid(&self) -> Pid {
        self.state.lock().ppid
    }

    pub(crate) fn set_ppid(&self, ppid: Pid) {
        self.state.lock().ppid = ppid;
    }

    /// Pids of this process's children, in creation order.
    pub fn children(&self) -> Vec<Pid> {
        self.state.lock().children.clone()
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.state.lock().exit_status
    }

    /// The kernel thread running this process, once `execute` has
    /// succeeded.
    pub fn thread(&self) -> Option<Tid> {
        self.thread.get().copied()
    }

    pub(crate) fn ops(&self) -> &Arc<dyn ProcessOps> {
        &self.ops
    }

    pub(crate) fn with_state<R>(
        &self,
        body: impl FnOnce(&mut ProcessState) -> R,
    ) -> R {
        body(&mut self.state.lock())
    }

    pub(crate) fn take_space(&self) -> Option<AddressSpace> {
        self.space.lock().take()
    }

    /// Copy-in from this process's memory; see
    /// [`AddressSpace::read_virtual`]. Transfers nothing if the process has
    /// no address space.
    pub fn read_virtual(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        match self.space.lock().as_ref() {
            Some(space) => space.read_virtual(vaddr, buf),
            None => 0,
        }
    }

    /// Copy-out into this process's memory; see
    /// [`AddressSpace::write_virtual`].
    pub fn write_virtual(&self, vaddr: i32, data: &[u8]) -> usize {
        match self.space.lock().as_ref() {
            Some(space) => space.write_virtual(vaddr, data),
            None => 0,
        }
    }

    /// See [`AddressSpace::read_string`].
    pub fn read_string(&self, vaddr: i32, max_len: usize) -> Option<String> {
        self.space.lock().as_ref()?.read_string(vaddr, max_len)
    }

    /// See [`AddressSpace::read_i32`].
    pub fn read_i32(&self, vaddr: i32) -> Option<i32> {
        self.space.lock().as_ref()?.read_i32(vaddr)
    }

    /// See [`AddressSpace::write_i32`].
    pub fn write_i32(&self, vaddr: i32, value: i32) -> bool {
        match self.space.lock().as_ref() {
            Some(space) => space.write_i32(vaddr, value),
            None => false,
        }
    }

    /// Runs `body` with the address space, if one is loaded. Tests use this
    /// to inspect the page table.
    pub fn with_space<R>(
        &self,
        body: impl FnOnce(&AddressSpace) -> R,
    ) -> Option<R> {
        self.space.lock().as_ref().map(body)
    }
}
