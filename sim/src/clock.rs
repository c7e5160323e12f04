// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The simulated clock: interrupt line, periodic timer, and power switch.
//!
//! Simulated time does not flow on its own. It advances a small fixed
//! amount whenever the interrupt line transitions from masked to enabled
//! (the machine's stand-in for "instructions were executed"), and jumps
//! straight to the next timer deadline when the kernel idles. The timer
//! interrupt fires on the thread that caused the advance, never
//! re-entrantly on the same thread.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use kern::machine::{InterruptLine, Power, TimerDevice, TimerHandler};
use kern::time::Timestamp;

/// Ticks charged for each masked-to-enabled transition.
const RESTORE_TICKS: u64 = 10;

type Handler = Arc<dyn Fn() + Send + Sync>;

struct ClockState {
    time: u64,
    enabled: bool,
    next_fire: u64,
    period: u64,
    handler: Option<Handler>,
}

/// See the module docs.
pub struct Clock {
    state: Mutex<ClockState>,
    halted: AtomicBool,
}

thread_local! {
    /// True while this thread is inside the timer handler; suppresses
    /// nested fires from the handler's own interrupt gating.
    static IN_TICK: Cell<bool> = const { Cell::new(false) };
}

impl Clock {
    pub fn new(period: u64) -> Arc<Self> {
        assert!(period > 0);
        Arc::new(Self {
            state: Mutex::new(ClockState {
                time: 0,
                enabled: true,
                next_fire: period,
                period,
                handler: None,
            }),
            halted: AtomicBool::new(false),
        })
    }

    fn run_handler(handler: Handler) {
        IN_TICK.set(true);
        handler();
        IN_TICK.set(false);
    }
}

impl InterruptLine for Clock {
    fn disable(&self) -> bool {
        let mut st = self.state.lock();
        std::mem::replace(&mut st.enabled, false)
    }

    fn restore(&self, prior: bool) {
        let fire = {
            let mut st = self.state.lock();
            let was = st.enabled;
            st.enabled = prior;
            if !prior || was {
                // Not a masked-to-enabled transition; time stands still.
                None
            } else {
                st.time += RESTORE_TICKS;
                if !IN_TICK.get() && st.time >= st.next_fire {
                    while st.next_fire <= st.time {
                        st.next_fire += st.period;
                    }
                    st.handler.clone()
                } else {
                    None
                }
            }
        };
        // Outside the state lock: the handler reads the time and reaches
        // into the scheduler.
        if let Some(handler) = fire {
            Self::run_handler(handler);
        }
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn idle(&self) {
        let handler = {
            let mut st = self.state.lock();
            st.time = st.time.max(st.next_fire);
            while st.next_fire <= st.time {
                st.next_fire += st.period;
            }
            st.handler.clone()
        };
        match handler {
            // Idling waits *for* an interrupt, so the timer is delivered
            // here regardless of the mask the sleeping thread left behind.
            Some(handler) => Self::run_handler(handler),
            None => panic!("machine is idle with no interrupt source"),
        }
    }
}

impl TimerDevice for Clock {
    fn now(&self) -> Timestamp {
        Timestamp::from(self.state.lock().time)
    }

    fn set_handler(&self, handler: TimerHandler) {
        self.state.lock().handler = Some(Arc::from(handler));
    }
}

impl Power for Clock {
    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}
