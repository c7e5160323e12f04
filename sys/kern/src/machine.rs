// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Contracts the kernel requires of the machine it runs on.
//!
//! The kernel never names a concrete device. Everything it needs -- the
//! processor, the interrupt line, the countdown timer, the file system, the
//! console, and the executable loader -- is reached through the traits in
//! this module, bundled into a [`Machine`]. The `sim` crate provides the
//! hosted implementation used by the test suite.

use std::sync::Arc;

use crate::err::{IoError, LoadError};
use crate::mem::space::PageTable;
use crate::time::Timestamp;

/// Directive returned by the kernel's exception handler, telling the
/// processor whether the interrupted program continues.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Resume the user program at the (possibly advanced) program counter.
    Continue,
    /// The current process has been ended; [`Processor::run`] must return
    /// `UserExit::Terminated` without executing further user code.
    Terminate,
}

/// How a call to [`Processor::run`] came to an end.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserExit {
    /// The program body ran off its end without exiting. The kernel treats
    /// this like an `exit(0)`.
    Completed,
    /// A trap handler returned [`Flow::Terminate`].
    Terminated,
}

/// Handler the kernel installs for processor exceptions. Invoked on the
/// trapping thread with the cause and arguments available in the register
/// file.
pub type ExceptionHandler = Box<dyn Fn() -> Flow + Send + Sync>;

/// Handler the kernel installs for timer interrupts.
pub type TimerHandler = Box<dyn Fn() + Send + Sync>;

/// The simulated CPU and its physical memory.
///
/// Register state and the installed page table are per kernel thread: each
/// user process runs on exactly one thread, and the machine keeps that
/// thread's context. Physical memory is shared by all of them.
pub trait Processor: Send + Sync {
    /// Bytes per page. Constant for the life of the machine.
    fn page_size(&self) -> usize;

    /// Number of physical page frames.
    fn num_phys_pages(&self) -> usize;

    /// Reads user register `index`; see [`abi::regs`].
    fn read_register(&self, index: usize) -> i32;

    /// Writes user register `index`.
    fn write_register(&self, index: usize, value: i32);

    /// Moves the program counter past the trapping instruction.
    fn advance_pc(&self);

    /// Installs `table` as the current thread's address translation state.
    fn set_page_table(&self, table: Arc<PageTable>);

    /// Installs the kernel entry point for processor exceptions. Called once
    /// at kernel construction.
    fn set_exception_handler(&self, handler: ExceptionHandler);

    /// Copies bytes out of physical memory starting at `paddr`.
    ///
    /// # Panics
    ///
    /// If the range runs off the end of physical memory. The kernel only
    /// issues addresses derived from a valid translation entry, so this is
    /// a machine-check condition, not an error.
    fn read_phys(&self, paddr: usize, buf: &mut [u8]);

    /// Copies bytes into physical memory starting at `paddr`. Same bounds
    /// contract as [`Processor::read_phys`].
    fn write_phys(&self, paddr: usize, data: &[u8]);

    /// Executes the program loaded in the current thread's context until it
    /// terminates or completes.
    fn run(&self) -> UserExit;
}

/// The machine's interrupt line.
pub trait InterruptLine: Send + Sync {
    /// Masks interrupts, returning the previous state (`true` = they were
    /// enabled).
    fn disable(&self) -> bool;

    /// Restores the state captured by a previous [`InterruptLine::disable`].
    /// Pending timer interrupts may be delivered, on the calling thread,
    /// before this returns.
    fn restore(&self, prior: bool);

    /// Reports whether interrupts are currently deliverable.
    fn is_enabled(&self) -> bool;

    /// Advances the machine to its next timer interrupt and delivers it on
    /// the calling thread. The scheduler calls this when every thread is
    /// blocked and only the passage of time can make one runnable.
    fn idle(&self);
}

/// The machine's periodic timer device.
pub trait TimerDevice: Send + Sync {
    /// Current machine time.
    fn now(&self) -> Timestamp;

    /// Installs the handler invoked on every timer interrupt, approximately
    /// every 500 ticks while interrupts are enabled. At most one handler
    /// exists; installing replaces it.
    fn set_handler(&self, handler: TimerHandler);
}

/// Whole-machine power control.
pub trait Power: Send + Sync {
    /// Stops the machine. User programs cease making progress; in-flight
    /// kernel threads are allowed to unwind through their run loops.
    fn halt(&self);

    /// Reports whether [`Power::halt`] has been called.
    fn is_halted(&self) -> bool;
}

/// An open file handle, as produced by the [`FileSystem`] or [`Console`].
///
/// Regular files support positioned access; console endpoints only support
/// the sequential forms and report [`IoError::Unsupported`] for the others.
pub trait OpenFile: Send + Sync {
    /// Sequential read at the device's own notion of position.
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Sequential write.
    fn write(&self, data: &[u8]) -> Result<usize, IoError>;

    /// Read starting at byte `pos`, without disturbing any sequential
    /// position.
    fn read_at(&self, pos: usize, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Write starting at byte `pos`.
    fn write_at(&self, pos: usize, data: &[u8]) -> Result<usize, IoError>;

    /// Releases the handle. Further operations are undefined; the kernel
    /// drops the handle right after.
    fn close(&self);
}

/// The machine's file system device. Operations are forwarded verbatim by
/// the file syscalls; the kernel imposes no semantics of its own beyond the
/// per-process descriptor table.
pub trait FileSystem: Send + Sync {
    /// Opens `name`, optionally creating it. `None` indicates the file does
    /// not exist (or could not be created).
    fn open(&self, name: &str, create_if_missing: bool)
        -> Option<Box<dyn OpenFile>>;

    /// Deletes `name`, returning whether it existed.
    fn remove(&self, name: &str) -> bool;
}

/// The console device, surfaced to every process as descriptors 0 and 1.
pub trait Console: Send + Sync {
    fn open_for_reading(&self) -> Box<dyn OpenFile>;
    fn open_for_writing(&self) -> Box<dyn OpenFile>;
}

/// Describes one section of a parsed executable image.
#[derive(Clone, Debug)]
pub struct SectionInfo {
    /// Section name, for diagnostics only.
    pub name: String,
    /// First virtual page occupied by the section.
    pub first_vpn: usize,
    /// Section length in pages.
    pub num_pages: usize,
    /// Whether the section's pages must be mapped read-only.
    pub read_only: bool,
}

/// A parsed executable image, ready to be copied into physical memory page
/// by page.
pub trait ObjectImage: Send + Sync {
    /// Section table, in file order.
    fn sections(&self) -> &[SectionInfo];

    /// Virtual address of the first instruction.
    fn entry_point(&self) -> u32;

    /// Copies page `page` of section `section` into physical frame `ppn`.
    fn load_page(
        &self,
        section: usize,
        page: usize,
        ppn: u32,
    ) -> Result<(), LoadError>;
}

/// The machine's executable-format parser.
pub trait ImageLoader: Send + Sync {
    /// Parses `file` as an executable image, taking ownership of the
    /// handle.
    fn parse(
        &self,
        file: Box<dyn OpenFile>,
    ) -> Result<Box<dyn ObjectImage>, LoadError>;
}

/// The full complement of machine devices handed to the kernel at
/// construction.
#[derive(Clone)]
pub struct Machine {
    pub processor: Arc<dyn Processor>,
    pub interrupts: Arc<dyn InterruptLine>,
    pub timer: Arc<dyn TimerDevice>,
    pub power: Arc<dyn Power>,
    pub file_system: Arc<dyn FileSystem>,
    pub console: Arc<dyn Console>,
    pub loader: Arc<dyn ImageLoader>,
}
