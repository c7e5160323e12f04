// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A blocking mutual-exclusion lock with owner identity.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kassert;
use crate::machine::InterruptLine;
use crate::sched::{ThreadSet, Tid};
use crate::sync::gate;

struct LockState {
    holder: Option<Tid>,
    waiters: VecDeque<Tid>,
}

/// A lock kernel threads can block on.
///
/// Contenders are served in FIFO order: `release` hands ownership directly
/// to the longest-waiting thread rather than reopening the race, so a
/// waiter that is woken already owns the lock when it resumes.
///
/// Acquiring a lock the caller already holds, or releasing one it does not,
/// is a kernel bug and panics.
pub struct Lock {
    pub(crate) sched: Arc<ThreadSet>,
    pub(crate) interrupts: Arc<dyn InterruptLine>,
    state: Mutex<LockState>,
}

impl Lock {
    pub fn new(
        sched: Arc<ThreadSet>,
        interrupts: Arc<dyn InterruptLine>,
    ) -> Self {
        Self {
            sched,
            interrupts,
            state: Mutex::new(LockState {
                holder: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires the lock, blocking while another thread holds it.
    pub fn acquire(&self) {
        let me = self.sched.current();
        let _irq = gate::off(&*self.interrupts);

        let must_wait = {
            let mut st = self.state.lock();
            match st.holder {
                None => {
                    st.holder = Some(me);
                    false
                }
                Some(h) => {
                    kassert!(h != me, "recursive lock acquire");
                    st.waiters.push_back(me);
                    true
                }
            }
        };

        if must_wait {
            self.sched.block_current();
            // Ownership was handed to us by the releaser.
            kassert!(self.state.lock().holder == Some(me));
        }
    }

    /// Releases the lock, waking the longest-waiting contender if any.
    pub fn release(&self) {
        let me = self.sched.current();
        let _irq = gate::off(&*self.interrupts);

        let next = {
            let mut st = self.state.lock();
            kassert!(st.holder == Some(me), "lock released by non-owner");
            st.holder = st.waiters.pop_front();
            st.holder
        };
        if let Some(t) = next {
            self.sched.make_ready(t);
        }
    }

    /// Reports whether the calling thread owns the lock.
    pub fn is_held_by_current(&self) -> bool {
        self.state.lock().holder == Some(self.sched.current())
    }
}
