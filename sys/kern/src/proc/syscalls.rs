// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Machine-independent syscall implementation.
//!
//! Syscalls are implemented by functions with the signature:
//!
//! ```ignore
//! fn syscall(kernel: &Arc<Kernel>, process: &Arc<Process>, ...) -> i32;
//! ```
//!
//! returning the value for the caller's result register. The only
//! exceptions are `exit` and a root `halt`, which end the calling process
//! instead of returning to it; the dispatcher reports those through
//! [`SyscallOutcome::Terminate`] so the trap path can stop executing user
//! code.
//!
//! Failures a user program can cause -- bad descriptors, missing files,
//! oversized arguments -- are reported as `-1` and never terminate the
//! caller. A syscall number nobody recognizes is a kernel bug by
//! definition and panics.

use std::convert::TryFrom;
use std::sync::Arc;

use abi::{Pid, Sysnum, FD_STDIN, FD_STDOUT, MAX_OPEN_FILES, MAX_STR_LEN};

use crate::kernel::Kernel;
use crate::proc::fd::FileDescriptor;
use crate::proc::process::Process;

/// What the trap path should do after a syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyscallOutcome {
    /// Write the value to the result register and resume the caller.
    Return(i32),
    /// The calling process is gone; do not resume it.
    Terminate,
}

/// Routes a decoded syscall to its handler.
pub fn dispatch(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    num: u32,
    args: [i32; 4],
) -> SyscallOutcome {
    use SyscallOutcome::Return;

    match Sysnum::try_from(num) {
        Ok(Sysnum::Halt) => sys_halt(kernel, process),
        Ok(Sysnum::Exit) => {
            handle_exit(kernel, process, args[0]);
            SyscallOutcome::Terminate
        }
        Ok(Sysnum::Exec) => {
            Return(sys_exec(kernel, process, args[0], args[1], args[2]))
        }
        Ok(Sysnum::Join) => Return(sys_join(kernel, process, args[0], args[1])),
        Ok(Sysnum::Creat) => Return(sys_open(kernel, process, args[0], true)),
        Ok(Sysnum::Open) => Return(sys_open(kernel, process, args[0], false)),
        Ok(Sysnum::Read) => {
            Return(sys_read(process, args[0], args[1], args[2]))
        }
        Ok(Sysnum::Write) => {
            Return(sys_write(process, args[0], args[1], args[2]))
        }
        Ok(Sysnum::Close) => Return(close_fd(kernel, process, args[0])),
        Ok(Sysnum::Unlink) => Return(sys_unlink(kernel, process, args[0])),
        Err(()) => {
            // Not part of the base surface; the process kind gets one
            // chance to claim it before we declare the kernel entry bogus.
            match process.ops().handle_extension_syscall(process, num, args) {
                Some(v) => Return(v),
                None => panic!("unknown syscall {num}"),
            }
        }
    }
}

/// Only the root process may halt the machine; everyone else gets a polite
/// zero.
fn sys_halt(kernel: &Arc<Kernel>, process: &Arc<Process>) -> SyscallOutcome {
    if process.pid() == Pid::ROOT {
        kernel.terminate();
        SyscallOutcome::Terminate
    } else {
        SyscallOutcome::Return(0)
    }
}

/// Ends `process` with `status`. Also the landing point for processor
/// faults (status 1) and programs that return off the end of their body
/// (status 0).
///
/// Teardown order: close every descriptor, disown surviving children,
/// record the status, free the address space. If this was the root or the
/// only live process the whole machine stops; a process nobody will join
/// unregisters itself.
pub(crate) fn handle_exit(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    status: i32,
) {
    for fd in 0..MAX_OPEN_FILES as i32 {
        let _ = close_fd(kernel, process, fd);
    }

    let children: Vec<Pid> =
        process.with_state(|st| std::mem::take(&mut st.children));
    for pid in children {
        if let Some(child) = kernel.processes().get(pid) {
            child.set_ppid(Pid::NONE);
        }
    }

    process.with_state(|st| st.exit_status = Some(status));

    if let Some(space) = process.take_space() {
        process.ops().unload_sections(&space, kernel.frames());
    }

    log::debug!("process {} exited with status {status}", process.pid().0);

    if kernel.processes().live_count() == 1 || process.pid() == Pid::ROOT {
        kernel.terminate();
    } else if process.ppid() == Pid::NONE {
        // Disowned: nobody will join us, so clean up eagerly. Otherwise we
        // stay registered until the parent reaps the status.
        kernel.processes().remove(process.pid());
    }
}

fn sys_exec(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    name_addr: i32,
    argc: i32,
    argv_addr: i32,
) -> i32 {
    if argc < 0 {
        return -1;
    }
    let Some(name) = process.read_string(name_addr, MAX_STR_LEN) else {
        return -1;
    };
    if !name.ends_with(kernel.config().exe_extension.as_str()) {
        log::debug!("exec {name}: not an executable name");
        return -1;
    }

    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc {
        let slot = match i.checked_mul(4).and_then(|o| argv_addr.checked_add(o))
        {
            Some(a) => a,
            None => return -1,
        };
        let Some(ptr) = process.read_i32(slot) else {
            return -1;
        };
        let Some(arg) = process.read_string(ptr, MAX_STR_LEN) else {
            return -1;
        };
        args.push(arg);
    }

    let child = Process::create(kernel);
    child.set_ppid(process.pid());
    process.with_state(|st| st.children.push(child.pid()));
    match child.execute(kernel, &name, &args) {
        Ok(()) => child.pid().0,
        Err(e) => {
            // The child stays registered and on our children list; it never
            // ran and holds no memory.
            log::debug!("exec {name} failed: {e:?}");
            -1
        }
    }
}

fn sys_join(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    pid: i32,
    status_addr: i32,
) -> i32 {
    let target = Pid(pid);
    if !process.with_state(|st| st.children.contains(&target)) {
        return -1;
    }
    let Some(child) = kernel.processes().get(target) else {
        // Already reaped (or never existed): joinable at most once.
        return -1;
    };
    let Some(thread) = child.thread() else {
        // The child never started; there is nothing to wait for.
        return -1;
    };

    kernel.scheduler().join(thread);

    let status = child.exit_status().unwrap_or(0);
    kernel.processes().remove(target);
    if process.write_i32(status_addr, status) {
        1
    } else {
        0
    }
}

/// `creat` and `open` differ only in whether a missing file is created.
fn sys_open(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    name_addr: i32,
    create_if_missing: bool,
) -> i32 {
    let Some(name) = process.read_string(name_addr, MAX_STR_LEN) else {
        return -1;
    };
    let Some(file) = kernel.machine().file_system.open(&name, create_if_missing)
    else {
        return -1;
    };
    let installed = process
        .with_state(|st| st.files.install(FileDescriptor::new(file, name)));
    match installed {
        Ok(fd) => fd,
        Err(descriptor) => {
            descriptor.file.close();
            -1
        }
    }
}

fn sys_read(process: &Arc<Process>, fd: i32, buf_addr: i32, count: i32) -> i32 {
    if count < 0 || fd == FD_STDOUT {
        return -1;
    }
    let mut data = vec![0u8; count as usize];
    let got = process.with_state(|st| {
        let d = st.files.get_mut(fd)?;
        let res = if fd == FD_STDIN {
            // The console has no notion of position.
            d.file.read(&mut data)
        } else {
            d.file.read_at(d.pos, &mut data)
        };
        match res {
            Ok(n) => {
                if fd > FD_STDOUT {
                    d.pos += n;
                }
                Some(n)
            }
            Err(_) => None,
        }
    });
    let Some(got) = got else {
        return -1;
    };
    process.write_virtual(buf_addr, &data[..got]);
    got as i32
}

fn sys_write(
    process: &Arc<Process>,
    fd: i32,
    buf_addr: i32,
    count: i32,
) -> i32 {
    if count < 0 || fd == FD_STDIN {
        return -1;
    }
    // Gather from user memory first; a short copy-in bounds the write.
    let mut data = vec![0u8; count as usize];
    let got = process.read_virtual(buf_addr, &mut data);
    let wrote = process.with_state(|st| {
        let d = st.files.get_mut(fd)?;
        let res = if fd == FD_STDOUT {
            d.file.write(&data[..got])
        } else {
            d.file.write_at(d.pos, &data[..got])
        };
        match res {
            Ok(n) => {
                if fd > FD_STDOUT {
                    d.pos += n;
                }
                Some(n)
            }
            Err(_) => None,
        }
    });
    match wrote {
        Some(n) => n as i32,
        None => -1,
    }
}

/// Closes `fd`, performing any unlink deferred while the file was open.
/// Shared between the `close` syscall and exit teardown.
fn close_fd(kernel: &Arc<Kernel>, process: &Arc<Process>, fd: i32) -> i32 {
    let Some(descriptor) = process.with_state(|st| st.files.take(fd)) else {
        return -1;
    };
    descriptor.file.close();
    if descriptor.unlink_on_close
        && !kernel.machine().file_system.remove(&descriptor.name)
    {
        return -1;
    }
    0
}

fn sys_unlink(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    name_addr: i32,
) -> i32 {
    let Some(name) = process.read_string(name_addr, MAX_STR_LEN) else {
        return -1;
    };
    let deferred = process.with_state(|st| {
        match st.files.find_named_mut(&name) {
            Some(d) => {
                // Open here: the file lives until the descriptor closes.
                d.unlink_on_close = true;
                true
            }
            None => false,
        }
    });
    if deferred || kernel.machine().file_system.remove(&name) {
        0
    } else {
        -1
    }
}
