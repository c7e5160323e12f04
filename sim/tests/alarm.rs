// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timed sleeps against the simulated timer.

mod common;

use std::sync::{Arc, Mutex};

use kern::machine::TimerDevice;

use common::boot;

#[test]
fn wait_until_sleeps_at_least_the_requested_ticks() {
    let (machine, kernel) = boot();
    for ticks in [1000i64, 10 * 1000, 100 * 1000] {
        let before = u64::from(machine.clock.now());
        kernel.alarm().wait_until(ticks);
        let after = u64::from(machine.clock.now());
        assert!(
            after - before >= ticks as u64,
            "waited {} of {ticks} requested ticks",
            after - before
        );
    }
}

#[test]
fn nonpositive_waits_return_immediately() {
    let (machine, kernel) = boot();
    let before = u64::from(machine.clock.now());
    kernel.alarm().wait_until(0);
    kernel.alarm().wait_until(-12_000);
    assert_eq!(u64::from(machine.clock.now()), before);
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let (machine, kernel) = boot();
    let wakes: Arc<Mutex<Vec<(i64, u64, u64)>>> = Arc::default();

    let mut tids = Vec::new();
    for ticks in [1000i64, 10 * 1000, 100 * 1000] {
        let alarm = Arc::clone(kernel.alarm());
        let timer = machine.machine().timer;
        let wakes = Arc::clone(&wakes);
        tids.push(kernel.scheduler().fork(&format!("sleep{ticks}"), move || {
            let start = u64::from(timer.now());
            alarm.wait_until(ticks);
            let woke = u64::from(timer.now());
            wakes.lock().unwrap().push((ticks, start, woke));
        }));
    }
    for tid in tids {
        kernel.scheduler().join(tid);
    }

    let wakes = wakes.lock().unwrap();
    assert_eq!(wakes.len(), 3);
    // Wake order matches deadline order, earliest first.
    assert_eq!(
        wakes.iter().map(|w| w.0).collect::<Vec<_>>(),
        [1000, 10 * 1000, 100 * 1000],
    );
    for &(ticks, start, woke) in wakes.iter() {
        assert!(
            woke - start >= ticks as u64,
            "sleep({ticks}) woke after only {} ticks",
            woke - start
        );
    }
    // Strictly staggered wakeups, not one mass wake at the end.
    assert!(wakes[0].2 < wakes[1].2 && wakes[1].2 < wakes[2].2);
}
