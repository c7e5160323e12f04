// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel threads and the ready queue.
//!
//! The simulated machine has a single logical CPU, so kernel threads are
//! *serialized*: exactly one may execute at a time. Each kernel thread is
//! backed by a host OS thread, and the single-CPU rule is enforced with a
//! baton -- a thread may only run while `Core::current` names it, and every
//! context switch is an explicit handoff of that field. This gives the rest
//! of the kernel a strong and convenient invariant: between two suspension
//! points, a thread observes and mutates kernel state without interference,
//! except for the timer interrupt, which is masked by the interrupt line.
//!
//! Suspension points are exactly: [`ThreadSet::yield_now`],
//! [`ThreadSet::block_current`], and [`ThreadSet::join`]. The higher-level
//! primitives in [`crate::sync`] queue the current thread on their own wait
//! lists (with interrupts masked) and then call `block_current`; a later
//! [`ThreadSet::make_ready`] puts the thread back on the FIFO ready queue.
//!
//! When every thread is blocked, the thread performing the switch drives
//! [`InterruptLine::idle`], which advances machine time to the next timer
//! interrupt; the timer handler is expected to ready somebody eventually,
//! or the kernel declares deadlock.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::kassert;
use crate::machine::InterruptLine;

/// Identifies a kernel thread. Ids are never reused within a `ThreadSet`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Tid(u64);

/// The thread that constructs the `ThreadSet` (the boot thread, or a test
/// body) is enrolled with this id.
pub const BOOT_TID: Tid = Tid(0);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ThreadState {
    /// Holds the baton.
    Running,
    /// On the ready queue.
    Ready,
    /// Parked on some wait list; will not run until `make_ready`.
    Blocked,
    /// Body returned. Terminal.
    Finished,
}

struct Record {
    state: ThreadState,
    /// Threads blocked in `join` on this one.
    joiners: Vec<Tid>,
}

struct Core {
    current: Tid,
    ready: VecDeque<Tid>,
    records: HashMap<Tid, Record>,
    next_tid: u64,
    /// True while the machine is idling on behalf of a switch; makes the
    /// timer handler's yield a no-op, since there is nothing to yield *to*.
    idling: bool,
}

/// The set of kernel threads and the machinery to switch among them.
pub struct ThreadSet {
    core: Mutex<Core>,
    baton: Condvar,
    interrupts: Arc<dyn InterruptLine>,
}

thread_local! {
    static SELF_TID: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// Bound on consecutive idle attempts that fail to produce a runnable
/// thread. Generous enough for very long sleeps; small enough to turn a
/// genuine deadlock into a prompt panic instead of a hang.
const MAX_IDLE_SPINS: usize = 100_000;

impl ThreadSet {
    /// Creates a thread set, enrolling the calling thread as [`BOOT_TID`],
    /// running.
    pub fn new(interrupts: Arc<dyn InterruptLine>) -> Arc<Self> {
        let mut records = HashMap::new();
        records.insert(
            BOOT_TID,
            Record {
                state: ThreadState::Running,
                joiners: Vec::new(),
            },
        );
        SELF_TID.set(Some(BOOT_TID));
        Arc::new(Self {
            core: Mutex::new(Core {
                current: BOOT_TID,
                ready: VecDeque::new(),
                records,
                next_tid: 1,
                idling: false,
            }),
            baton: Condvar::new(),
            interrupts,
        })
    }

    /// The calling thread's id.
    ///
    /// # Panics
    ///
    /// If the calling OS thread is not enrolled in any thread set.
    pub fn current(&self) -> Tid {
        match SELF_TID.get() {
            Some(t) => t,
            None => panic!("not a kernel thread"),
        }
    }

    /// Creates a new kernel thread running `body`, initially ready. Returns
    /// without switching to it.
    pub fn fork(
        self: &Arc<Self>,
        name: &str,
        body: impl FnOnce() + Send + 'static,
    ) -> Tid {
        let tid = {
            let mut core = self.core.lock();
            let tid = Tid(core.next_tid);
            core.next_tid += 1;
            core.records.insert(
                tid,
                Record {
                    state: ThreadState::Ready,
                    joiners: Vec::new(),
                },
            );
            core.ready.push_back(tid);
            tid
        };

        let set = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                SELF_TID.set(Some(tid));
                {
                    let mut core = set.core.lock();
                    set.wait_until_scheduled(tid, &mut core);
                }
                body();
                set.retire(tid);
            });
        kassert!(spawned.is_ok(), "could not spawn kernel thread");
        tid
    }

    /// Puts the calling thread at the back of the ready queue and runs the
    /// next ready thread. A no-op if invoked from the timer handler while
    /// the machine is idling, or if no other thread is ready.
    pub fn yield_now(&self) {
        let me = self.current();
        let mut core = self.core.lock();
        if core.idling {
            return;
        }
        kassert!(core.current == me);
        self.record_mut(&mut core, me).state = ThreadState::Ready;
        core.ready.push_back(me);
        // The queue is nonempty (we're on it), so this cannot idle.
        let next = self.next_runnable(&mut core);
        if next == me {
            self.record_mut(&mut core, me).state = ThreadState::Running;
            return;
        }
        self.switch_to(&mut core, next);
        self.wait_until_scheduled(me, &mut core);
    }

    /// Suspends the calling thread until someone calls
    /// [`ThreadSet::make_ready`] on it. The caller must already have queued
    /// itself on a wait list, with interrupts masked, so the wake cannot be
    /// lost.
    pub fn block_current(&self) {
        let me = self.current();
        let mut core = self.core.lock();
        kassert!(core.current == me);
        self.record_mut(&mut core, me).state = ThreadState::Blocked;
        let next = self.next_runnable(&mut core);
        self.switch_to(&mut core, next);
        self.wait_until_scheduled(me, &mut core);
    }

    /// Moves a blocked thread to the ready queue. Does not switch to it.
    pub fn make_ready(&self, tid: Tid) {
        let mut core = self.core.lock();
        let record = self.record_mut(&mut core, tid);
        kassert!(
            record.state == ThreadState::Blocked,
            "readying a thread that is not blocked: {tid:?}"
        );
        record.state = ThreadState::Ready;
        core.ready.push_back(tid);
    }

    /// Blocks the calling thread until `tid` finishes. Returns immediately
    /// if it already has.
    pub fn join(&self, tid: Tid) {
        let me = self.current();
        kassert!(me != tid, "thread joining itself");
        let mut core = self.core.lock();
        {
            let record = self.record_mut(&mut core, tid);
            if record.state == ThreadState::Finished {
                return;
            }
            record.joiners.push(me);
        }
        self.record_mut(&mut core, me).state = ThreadState::Blocked;
        let next = self.next_runnable(&mut core);
        self.switch_to(&mut core, next);
        self.wait_until_scheduled(me, &mut core);
    }

    /// Reports whether `tid` has finished.
    pub fn is_finished(&self, tid: Tid) -> bool {
        let mut core = self.core.lock();
        self.record_mut(&mut core, tid).state == ThreadState::Finished
    }

    /// Final bookkeeping on a thread whose body has returned: wake joiners
    /// and hand the baton onward. The OS thread exits after this.
    fn retire(&self, tid: Tid) {
        let mut core = self.core.lock();
        kassert!(core.current == tid);
        let joiners = {
            let record = self.record_mut(&mut core, tid);
            record.state = ThreadState::Finished;
            std::mem::take(&mut record.joiners)
        };
        for j in joiners {
            let record = self.record_mut(&mut core, j);
            kassert!(record.state == ThreadState::Blocked);
            record.state = ThreadState::Ready;
            core.ready.push_back(j);
        }
        let next = self.next_runnable(&mut core);
        self.switch_to(&mut core, next);
    }

    fn record_mut<'a>(
        &self,
        core: &'a mut MutexGuard<'_, Core>,
        tid: Tid,
    ) -> &'a mut Record {
        match core.records.get_mut(&tid) {
            Some(r) => r,
            None => panic!("unknown kernel thread {tid:?}"),
        }
    }

    /// Pops the next ready thread, idling the machine as long as there is
    /// none.
    fn next_runnable(&self, core: &mut MutexGuard<'_, Core>) -> Tid {
        let mut spins = 0;
        loop {
            if let Some(t) = core.ready.pop_front() {
                return t;
            }
            kassert!(
                spins < MAX_IDLE_SPINS,
                "scheduler deadlock: every thread is blocked and idling \
                 makes no progress"
            );
            spins += 1;
            core.idling = true;
            // The timer handler runs on this thread, inside this call, and
            // needs the core lock to ready sleepers; release it meanwhile.
            MutexGuard::unlocked(core, || self.interrupts.idle());
            core.idling = false;
        }
    }

    fn switch_to(&self, core: &mut MutexGuard<'_, Core>, next: Tid) {
        self.record_mut(core, next).state = ThreadState::Running;
        core.current = next;
        self.baton.notify_all();
    }

    fn wait_until_scheduled(&self, me: Tid, core: &mut MutexGuard<'_, Core>) {
        while core.current != me {
            self.baton.wait(core);
        }
    }
}
