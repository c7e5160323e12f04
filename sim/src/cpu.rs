// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The simulated processor.
//!
//! Physical memory is one flat byte array shared by everything. Register
//! state and the installed page table are kept per host thread, because
//! each user process runs on exactly one kernel thread; that stands in for
//! the context save/restore a real machine would do on a switch.
//!
//! "Executing" a program works like this: an executable image's text
//! section begins with a NUL-terminated *program key*. [`SimProcessor::run`]
//! translates the program counter through the current page table, reads
//! the key out of the loaded memory, and runs the Rust closure registered
//! under that key. The closure plays the machine code: it computes, pokes
//! and peeks its own address space through the MMU, and traps into the
//! kernel via [`UserCtx::syscall`]. A handler verdict of
//! [`Flow::Terminate`] ends the run, exactly as a real trap that never
//! returns to user mode would.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use abi::{regs, ExceptionCause, Sysnum};
use kern::machine::{ExceptionHandler, Flow, Power, Processor, UserExit};
use kern::mem::space::PageTable;

use crate::clock::Clock;

type TrapHook = Arc<dyn Fn() -> Flow + Send + Sync>;

/// A program body: the behavior run when an executable whose key names it
/// is executed.
pub type ProgramFn = Arc<dyn Fn(&UserCtx<'_>) + Send + Sync>;

/// Longest supported program key, including the terminator.
const MAX_KEY: usize = 64;

struct CpuContext {
    regs: [i32; regs::NUM_USER_REGISTERS],
    table: Option<Arc<PageTable>>,
    terminated: bool,
}

impl Default for CpuContext {
    fn default() -> Self {
        Self {
            regs: [0; regs::NUM_USER_REGISTERS],
            table: None,
            terminated: false,
        }
    }
}

/// See the module docs.
pub struct SimProcessor {
    page_size: usize,
    num_phys_pages: usize,
    memory: Mutex<Vec<u8>>,
    contexts: Mutex<HashMap<ThreadId, CpuContext>>,
    handler: Mutex<Option<TrapHook>>,
    programs: Mutex<HashMap<String, ProgramFn>>,
    clock: Arc<Clock>,
}

impl SimProcessor {
    pub fn new(
        page_size: usize,
        num_phys_pages: usize,
        clock: Arc<Clock>,
    ) -> Arc<Self> {
        assert!(page_size > 0 && num_phys_pages > 0);
        Arc::new(Self {
            page_size,
            num_phys_pages,
            memory: Mutex::new(vec![0; page_size * num_phys_pages]),
            contexts: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
            programs: Mutex::new(HashMap::new()),
            clock,
        })
    }

    /// Registers the behavior closure for programs whose key is `key`.
    pub fn register_program(
        &self,
        key: &str,
        body: impl Fn(&UserCtx<'_>) + Send + Sync + 'static,
    ) {
        self.programs.lock().insert(key.to_string(), Arc::new(body));
    }

    fn with_context<R>(&self, body: impl FnOnce(&mut CpuContext) -> R) -> R {
        let id = std::thread::current().id();
        let mut map = self.contexts.lock();
        body(map.entry(id).or_default())
    }

    fn current_table(&self) -> Option<Arc<PageTable>> {
        self.with_context(|c| c.table.clone())
    }

    /// Reads the program key addressed by the current program counter.
    fn program_key(&self) -> Option<String> {
        let pc = self.with_context(|c| c.regs[regs::PC]);
        let mut buf = [0u8; MAX_KEY];
        let ctx = UserCtx { cpu: self };
        if !ctx.peek(pc, &mut buf) {
            return None;
        }
        let nul = buf.iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&buf[..nul]).into_owned())
    }
}

impl Processor for SimProcessor {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn num_phys_pages(&self) -> usize {
        self.num_phys_pages
    }

    fn read_register(&self, index: usize) -> i32 {
        self.with_context(|c| c.regs[index])
    }

    fn write_register(&self, index: usize, value: i32) {
        self.with_context(|c| c.regs[index] = value);
    }

    fn advance_pc(&self) {
        self.with_context(|c| {
            let pc = c.regs[regs::PC];
            c.regs[regs::PC] = pc.wrapping_add(4);
            c.regs[regs::NEXT_PC] = pc.wrapping_add(8);
        });
    }

    fn set_page_table(&self, table: Arc<PageTable>) {
        self.with_context(|c| c.table = Some(table));
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        *self.handler.lock() = Some(Arc::from(handler));
    }

    fn read_phys(&self, paddr: usize, buf: &mut [u8]) {
        let mem = self.memory.lock();
        buf.copy_from_slice(&mem[paddr..paddr + buf.len()]);
    }

    fn write_phys(&self, paddr: usize, data: &[u8]) {
        let mut mem = self.memory.lock();
        mem[paddr..paddr + data.len()].copy_from_slice(data);
    }

    fn run(&self) -> UserExit {
        if self.clock.is_halted() {
            return UserExit::Terminated;
        }
        self.with_context(|c| c.terminated = false);

        let key = match self.program_key() {
            Some(k) => k,
            None => panic!("program counter does not address a program key"),
        };
        let body = match self.programs.lock().get(&key).cloned() {
            Some(b) => b,
            None => panic!("no program registered under key {key:?}"),
        };
        log::trace!("running program {key:?}");

        body(&UserCtx { cpu: self });

        if self.with_context(|c| c.terminated) {
            UserExit::Terminated
        } else {
            UserExit::Completed
        }
    }
}

/// The handle a program body uses to act as user-mode code.
pub struct UserCtx<'a> {
    cpu: &'a SimProcessor,
}

impl UserCtx<'_> {
    /// Performs a syscall: loads the number and arguments into the
    /// convention registers, traps, and returns the value the kernel left
    /// in the result register.
    ///
    /// `None` means the process no longer exists (it exited, was killed,
    /// or the machine halted); the program body must return promptly.
    pub fn syscall(&self, num: Sysnum, args: [i32; 4]) -> Option<i32> {
        if self.cpu.clock.is_halted()
            || self.cpu.with_context(|c| c.terminated)
        {
            return None;
        }
        self.cpu.with_context(|c| {
            c.regs[regs::V0] = num as i32;
            c.regs[regs::A0] = args[0];
            c.regs[regs::A1] = args[1];
            c.regs[regs::A2] = args[2];
            c.regs[regs::A3] = args[3];
            c.regs[regs::CAUSE] = ExceptionCause::Syscall as i32;
        });
        match self.trap() {
            Flow::Continue => Some(self.cpu.read_register(regs::V0)),
            Flow::Terminate => {
                self.cpu.with_context(|c| c.terminated = true);
                None
            }
        }
    }

    /// Raises a non-syscall processor exception, e.g. a simulated stray
    /// store. Returns `None` if the trap ended the process, which for
    /// these causes is always.
    pub fn raise(&self, cause: ExceptionCause) -> Option<()> {
        self.cpu
            .with_context(|c| c.regs[regs::CAUSE] = cause as i32);
        match self.trap() {
            Flow::Continue => Some(()),
            Flow::Terminate => {
                self.cpu.with_context(|c| c.terminated = true);
                None
            }
        }
    }

    fn trap(&self) -> Flow {
        let handler = self.cpu.handler.lock().clone();
        match handler {
            Some(handler) => handler(),
            None => panic!("trap with no exception handler installed"),
        }
    }

    /// Reads a user register.
    pub fn register(&self, index: usize) -> i32 {
        self.cpu.read_register(index)
    }

    /// Writes a user register.
    pub fn set_register(&self, index: usize, value: i32) {
        self.cpu.write_register(index, value)
    }

    /// Loads from this program's virtual memory through the MMU. Returns
    /// `false` (without a partial transfer guarantee) if any page of the
    /// range is unmapped.
    pub fn peek(&self, vaddr: i32, buf: &mut [u8]) -> bool {
        let mut offset = 0;
        let len = buf.len();
        self.walk(vaddr, len, false, |cpu, paddr, take| {
            cpu.read_phys(paddr, &mut buf[offset..offset + take]);
            offset += take;
        })
    }

    /// Stores into this program's virtual memory through the MMU; `false`
    /// if any page is unmapped or read-only, as the corresponding user
    /// store would fault.
    pub fn poke(&self, vaddr: i32, data: &[u8]) -> bool {
        let mut offset = 0;
        self.walk(vaddr, data.len(), true, |cpu, paddr, len| {
            cpu.write_phys(paddr, &data[offset..offset + len]);
            offset += len;
        })
    }

    /// Stores a NUL-terminated string.
    pub fn poke_cstr(&self, vaddr: i32, s: &str) -> bool {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.poke(vaddr, &bytes)
    }

    /// The current stack pointer, handy as scratch space below it.
    pub fn sp(&self) -> i32 {
        self.register(regs::SP)
    }

    fn walk(
        &self,
        vaddr: i32,
        len: usize,
        for_write: bool,
        mut visit: impl FnMut(&SimProcessor, usize, usize),
    ) -> bool {
        if vaddr < 0 {
            return false;
        }
        let Some(table) = self.cpu.current_table() else {
            return false;
        };
        let page_size = self.cpu.page_size;
        let mut addr = vaddr as usize;
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(page_size - addr % page_size);
            let Some(paddr) = table.translate(addr, page_size, for_write)
            else {
                return false;
            };
            visit(self.cpu, paddr, take);
            addr += take;
            remaining -= take;
        }
        true
    }
}
