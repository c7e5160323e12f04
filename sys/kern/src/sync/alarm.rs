// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timed sleeps, driven by the machine's periodic timer.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::machine::{InterruptLine, TimerDevice};
use crate::sched::{ThreadSet, Tid};
use crate::sync::gate;
use crate::time::Timestamp;

/// A sleeping thread and the time before which it must not wake. Ordered by
/// deadline; ties wake in heap order, which is unspecified.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
struct Sleeper {
    deadline: Timestamp,
    tid: Tid,
}

/// Lets threads sleep until a given machine time.
///
/// The alarm owns the machine's timer interrupt: constructing it installs
/// the interrupt handler, and at most one alarm may exist per kernel. On
/// every timer fire, the handler readies each sleeper whose deadline has
/// passed, then yields, which is also what gives the kernel round-robin
/// preemption.
pub struct Alarm {
    sched: Arc<ThreadSet>,
    interrupts: Arc<dyn InterruptLine>,
    timer: Arc<dyn TimerDevice>,
    sleepers: Mutex<BinaryHeap<Reverse<Sleeper>>>,
}

impl Alarm {
    /// Creates the alarm and installs its timer interrupt handler.
    pub fn new(
        sched: Arc<ThreadSet>,
        interrupts: Arc<dyn InterruptLine>,
        timer: Arc<dyn TimerDevice>,
    ) -> Arc<Self> {
        let alarm = Arc::new(Self {
            sched,
            interrupts,
            timer: Arc::clone(&timer),
            sleepers: Mutex::new(BinaryHeap::new()),
        });
        let hook = Arc::downgrade(&alarm);
        timer.set_handler(Box::new(move || {
            if let Some(alarm) = hook.upgrade() {
                alarm.timer_interrupt();
            }
        }));
        alarm
    }

    /// Suspends the calling thread for at least `ticks` ticks. The thread
    /// is made ready at the first timer interrupt where the current time
    /// has reached its deadline; it is not woken early, and `ticks <= 0`
    /// returns at once without suspending.
    pub fn wait_until(&self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let _irq = gate::off(&*self.interrupts);
        let deadline = self.timer.now().offset(ticks);
        self.sleepers.lock().push(Reverse(Sleeper {
            deadline,
            tid: self.sched.current(),
        }));
        self.sched.block_current();
    }

    /// The timer interrupt handler: drain every sleeper whose deadline is
    /// strictly in the past, then let the next ready thread run.
    fn timer_interrupt(&self) {
        let _irq = gate::off(&*self.interrupts);
        let now = self.timer.now();
        loop {
            let due = {
                let mut heap = self.sleepers.lock();
                match heap.peek() {
                    Some(Reverse(s)) if s.deadline < now => {
                        heap.pop().map(|Reverse(s)| s.tid)
                    }
                    _ => None,
                }
            };
            match due {
                Some(tid) => self.sched.make_ready(tid),
                None => break,
            }
        }
        self.sched.yield_now();
    }
}
