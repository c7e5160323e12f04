// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel-wide process registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use abi::Pid;

use crate::proc::process::Process;

struct TableState {
    /// Next pid to issue. Monotonic, starting at 1, never recycled;
    /// wrapping a 32-bit pid space is out of scope.
    next_pid: i32,
    live: HashMap<Pid, Arc<Process>>,
}

/// Maps live pids to processes.
///
/// A process is inserted at creation and leaves either when its parent
/// reaps it via `join` or, for disowned processes, when it exits. The
/// registry is guarded by its own small lock; nothing blocking happens
/// while it is held.
pub struct ProcessTable {
    state: Mutex<TableState>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                next_pid: 1,
                live: HashMap::new(),
            }),
        }
    }

    /// Issues a fresh pid.
    pub fn allocate_pid(&self) -> Pid {
        let mut st = self.state.lock();
        let pid = Pid(st.next_pid);
        st.next_pid += 1;
        pid
    }

    pub(crate) fn insert(&self, process: Arc<Process>) {
        self.state.lock().live.insert(process.pid(), process);
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.state.lock().live.remove(&pid)
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.state.lock().live.get(&pid).cloned()
    }

    /// Number of processes currently registered.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
