// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronous exchange of 32-bit words between threads.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::machine::InterruptLine;
use crate::sched::ThreadSet;
use crate::sync::condvar::Condition;
use crate::sync::lock::Lock;

struct Exchange {
    /// True exactly while a word has been deposited and no listener has
    /// taken it. While set, no other speaker may deposit.
    word_ready: bool,
    word: i32,
    speakers: usize,
    listeners: usize,
}

/// A many-to-many rendezvous channel for 32-bit words.
///
/// `speak` and `listen` pair callers off one to one: a speaker does not
/// return until some listener has taken its word, and each deposited word
/// is observed by exactly one listener. There is no buffering and no
/// ordering among concurrent speakers or listeners.
pub struct Rendezvous {
    lock: Arc<Lock>,
    speakers: Condition,
    listeners: Condition,
    state: Mutex<Exchange>,
}

impl Rendezvous {
    pub fn new(
        sched: Arc<ThreadSet>,
        interrupts: Arc<dyn InterruptLine>,
    ) -> Self {
        let lock = Arc::new(Lock::new(sched, interrupts));
        Self {
            speakers: Condition::new(Arc::clone(&lock)),
            listeners: Condition::new(Arc::clone(&lock)),
            lock,
            state: Mutex::new(Exchange {
                word_ready: false,
                word: 0,
                speakers: 0,
                listeners: 0,
            }),
        }
    }

    /// Waits for a listener, transfers `word` to it, and returns once the
    /// pairing is complete.
    pub fn speak(&self, word: i32) {
        self.lock.acquire();

        self.state.lock().speakers += 1;
        // Wait for a listener to be present and the slot to be free. Every
        // woken listener re-tests `word_ready`, so waking all of them is
        // safe; exactly one will consume.
        loop {
            let must_wait = {
                let st = self.state.lock();
                st.listeners == 0 || st.word_ready
            };
            if !must_wait {
                break;
            }
            self.speakers.sleep();
        }
        {
            let mut st = self.state.lock();
            st.word = word;
            st.word_ready = true;
            st.speakers -= 1;
        }
        self.listeners.wake_all();

        self.lock.release();
    }

    /// Waits for a speaker and returns the word it deposited.
    pub fn listen(&self) -> i32 {
        self.lock.acquire();

        self.state.lock().listeners += 1;
        while !self.state.lock().word_ready {
            // Let a speaker know someone is here, then wait for the word.
            self.speakers.wake_all();
            self.listeners.sleep();
        }
        let word = {
            let mut st = self.state.lock();
            st.word_ready = false;
            st.listeners -= 1;
            st.word
        };

        self.lock.release();
        word
    }
}
