// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Condition variables, built directly on interrupt masking.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::kassert;
use crate::sched::Tid;
use crate::sync::gate;
use crate::sync::lock::Lock;

struct CondState {
    waiters: VecDeque<Tid>,
    /// Number of threads asleep on this condition. Incremented by the
    /// sleeper; decremented by the *waker*, so an empty check never races a
    /// thread that has been woken but not yet resumed.
    count: usize,
}

/// A condition variable bound to a specific [`Lock`].
///
/// Every operation requires the bound lock to be held by the caller; this
/// is checked, and a violation panics. Wakeups are not spurious, but a
/// woken sleeper reacquires the lock after the waker releases it, so
/// callers must still re-test their predicate in a loop.
pub struct Condition {
    lock: Arc<Lock>,
    state: Mutex<CondState>,
}

impl Condition {
    /// Creates a condition bound to `lock`.
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            state: Mutex::new(CondState {
                waiters: VecDeque::new(),
                count: 0,
            }),
        }
    }

    /// Atomically releases the bound lock and suspends the calling thread
    /// until another thread wakes it. Reacquires the lock before returning.
    ///
    /// The whole release + enqueue + suspend sequence runs with interrupts
    /// masked. The release must be inside the mask: the moment the lock is
    /// free, a preemption could let another thread in to update state and
    /// `wake` -- and a wake delivered before we are enqueued would be
    /// silently lost.
    pub fn sleep(&self) {
        kassert!(self.lock.is_held_by_current(), "condition used sans lock");
        let me = self.lock.sched.current();

        {
            let _irq = gate::off(&*self.lock.interrupts);
            self.lock.release();
            {
                let mut st = self.state.lock();
                st.waiters.push_back(me);
                st.count += 1;
            }
            self.lock.sched.block_current();
        }
        self.lock.acquire();
    }

    /// Wakes the longest-sleeping thread, if any.
    pub fn wake(&self) {
        kassert!(self.lock.is_held_by_current(), "condition used sans lock");
        let _irq = gate::off(&*self.lock.interrupts);

        let woken = {
            let mut st = self.state.lock();
            if st.count > 0 {
                st.count -= 1;
                st.waiters.pop_front()
            } else {
                None
            }
        };
        if let Some(t) = woken {
            self.lock.sched.make_ready(t);
        }
    }

    /// Wakes every thread sleeping on this condition.
    pub fn wake_all(&self) {
        kassert!(self.lock.is_held_by_current(), "condition used sans lock");
        let _irq = gate::off(&*self.lock.interrupts);

        while self.state.lock().count > 0 {
            self.wake();
        }
    }
}
