// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread synchronization: locks, condition variables, and the rendezvous
//! channel, driven through the real scheduler.
//!
//! Forked threads only record what they observe; all assertions happen on
//! the test thread after joining, so a failed expectation cannot strand
//! the scheduler.

mod common;

use std::sync::{Arc, Mutex};

use kern::machine::TimerDevice;
use kern::time::Timestamp;

use common::boot;

#[test]
fn lock_serves_contenders_in_fifo_order() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let order: Arc<Mutex<Vec<usize>>> = Arc::default();

    let mut tids = Vec::new();
    for i in 1..=3 {
        let lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        let sched = Arc::clone(kernel.scheduler());
        tids.push(kernel.scheduler().fork(&format!("contender{i}"), move || {
            lock.acquire();
            order.lock().unwrap().push(i);
            // Let the other contenders queue up behind us.
            sched.yield_now();
            lock.release();
        }));
    }
    for tid in tids {
        kernel.scheduler().join(tid);
    }

    assert_eq!(*order.lock().unwrap(), [1, 2, 3]);
}

#[test]
fn lock_knows_its_owner() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let seen: Arc<Mutex<Vec<bool>>> = Arc::default();

    lock.acquire();
    assert!(lock.is_held_by_current());

    let observer = {
        let lock = Arc::clone(&lock);
        let seen = Arc::clone(&seen);
        kernel.scheduler().fork("observer", move || {
            // Held, but not by us.
            seen.lock().unwrap().push(lock.is_held_by_current());
        })
    };
    kernel.scheduler().yield_now();
    kernel.scheduler().join(observer);

    assert_eq!(*seen.lock().unwrap(), [false]);
    lock.release();
    assert!(!lock.is_held_by_current());
}

#[test]
fn condition_interlock_alternates() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let cond = Arc::new(kernel.new_condition(&lock));
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    let mut spawn = |name: &'static str| {
        let lock = Arc::clone(&lock);
        let cond = Arc::clone(&cond);
        let log = Arc::clone(&log);
        kernel.scheduler().fork(name, move || {
            lock.acquire();
            for _ in 0..10 {
                log.lock().unwrap().push(name);
                cond.wake();
                cond.sleep();
            }
            lock.release();
        })
    };
    let ping = spawn("ping");
    let _pong = spawn("pong");
    kernel.scheduler().join(ping);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 20);
    for pair in log.chunks(2) {
        assert_eq!(pair, ["ping", "pong"]);
    }
}

#[test]
fn condition_wakes_consumer_after_batch() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let nonempty = Arc::new(kernel.new_condition(&lock));
    let queue: Arc<Mutex<Vec<i32>>> = Arc::default();
    let observed: Arc<Mutex<Vec<usize>>> = Arc::default();

    let consumer = {
        let lock = Arc::clone(&lock);
        let nonempty = Arc::clone(&nonempty);
        let queue = Arc::clone(&queue);
        let observed = Arc::clone(&observed);
        let sched = Arc::clone(kernel.scheduler());
        kernel.scheduler().fork("consumer", move || {
            lock.acquire();
            while queue.lock().unwrap().is_empty() {
                nonempty.sleep();
            }
            observed.lock().unwrap().push(queue.lock().unwrap().len());
            loop {
                // Pop-then-yield, without holding the queue across the
                // switch.
                if queue.lock().unwrap().pop().is_none() {
                    break;
                }
                sched.yield_now();
            }
            lock.release();
        })
    };
    let producer = {
        let lock = Arc::clone(&lock);
        let nonempty = Arc::clone(&nonempty);
        let queue = Arc::clone(&queue);
        let sched = Arc::clone(kernel.scheduler());
        kernel.scheduler().fork("producer", move || {
            lock.acquire();
            for v in 0..5 {
                queue.lock().unwrap().push(v);
                // The consumer sleeps on the condition, not the ready
                // queue; yielding here must not let it in early.
                sched.yield_now();
            }
            nonempty.wake();
            lock.release();
        })
    };
    kernel.scheduler().join(consumer);
    kernel.scheduler().join(producer);

    // The consumer saw the whole batch, not a partial one.
    assert_eq!(*observed.lock().unwrap(), [5]);
    assert!(queue.lock().unwrap().is_empty());
}

#[test]
fn wake_without_sleepers_is_a_no_op() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let cond = kernel.new_condition(&lock);

    lock.acquire();
    cond.wake();
    cond.wake_all();
    lock.release();
}

#[test]
#[should_panic(expected = "sans lock")]
fn wake_requires_the_lock() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    let cond = kernel.new_condition(&lock);
    cond.wake();
}

#[test]
#[should_panic(expected = "non-owner")]
fn release_by_non_owner_is_fatal() {
    let (_machine, kernel) = boot();
    let lock = kernel.new_lock();
    lock.release();
}

#[test]
fn rendezvous_pairs_one_speaker_one_listener() {
    for speaker_joins_first in [true, false] {
        let (machine, kernel) = boot();
        let channel = Arc::new(kernel.new_rendezvous());
        let events: Arc<Mutex<Vec<(String, Timestamp)>>> = Arc::default();

        let speaker = {
            let channel = Arc::clone(&channel);
            let events = Arc::clone(&events);
            let machine2 = machine.machine();
            kernel.scheduler().fork("speaker", move || {
                channel.speak(4);
                events
                    .lock()
                    .unwrap()
                    .push(("spoke".into(), machine2.timer.now()));
            })
        };
        let listener = {
            let channel = Arc::clone(&channel);
            let events = Arc::clone(&events);
            let machine2 = machine.machine();
            kernel.scheduler().fork("listener", move || {
                events
                    .lock()
                    .unwrap()
                    .push(("listening".into(), machine2.timer.now()));
                let word = channel.listen();
                events
                    .lock()
                    .unwrap()
                    .push((format!("heard {word}"), machine2.timer.now()));
            })
        };
        if speaker_joins_first {
            kernel.scheduler().join(speaker);
            kernel.scheduler().join(listener);
        } else {
            kernel.scheduler().join(listener);
            kernel.scheduler().join(speaker);
        }

        let events = events.lock().unwrap();
        let at = |label: &str| {
            events
                .iter()
                .find(|(l, _)| l == label)
                .map(|&(_, t)| t)
                .unwrap()
        };
        assert!(events.iter().any(|(l, _)| l == "heard 4"));
        // The speaker cannot return before its listener showed up.
        assert!(at("spoke") > at("listening"));
    }
}

#[test]
fn rendezvous_pairs_two_speakers_two_listeners() {
    let (machine, kernel) = boot();
    let channel = Arc::new(kernel.new_rendezvous());
    let heard: Arc<Mutex<Vec<i32>>> = Arc::default();
    let times: Arc<Mutex<Vec<(String, Timestamp)>>> = Arc::default();

    let mut speak = |name: &'static str, word: i32| {
        let channel = Arc::clone(&channel);
        let times = Arc::clone(&times);
        let machine2 = machine.machine();
        kernel.scheduler().fork(name, move || {
            channel.speak(word);
            times
                .lock()
                .unwrap()
                .push((name.to_string(), machine2.timer.now()));
        })
    };
    let s1 = speak("s1", 4);
    let s2 = speak("s2", 7);

    let mut listen = |name: &'static str| {
        let channel = Arc::clone(&channel);
        let heard = Arc::clone(&heard);
        let times = Arc::clone(&times);
        let machine2 = machine.machine();
        kernel.scheduler().fork(name, move || {
            times
                .lock()
                .unwrap()
                .push((name.to_string(), machine2.timer.now()));
            let word = channel.listen();
            heard.lock().unwrap().push(word);
        })
    };
    let l1 = listen("l1");
    let l2 = listen("l2");

    for tid in [s1, s2, l1, l2] {
        kernel.scheduler().join(tid);
    }

    let mut words = heard.lock().unwrap().clone();
    words.sort_unstable();
    assert_eq!(words, [4, 7]);

    // Each speaker returned only after some listener had arrived.
    let times = times.lock().unwrap();
    let at = |label: &str| {
        times
            .iter()
            .find(|(l, _)| l == label)
            .map(|&(_, t)| t)
            .unwrap()
    };
    let first_listen = at("l1").min(at("l2"));
    assert!(at("s1") > first_listen);
    assert!(at("s2") > first_listen);
}
