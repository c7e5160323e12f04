// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread synchronization primitives.
//!
//! Everything here bottoms out in two facilities: the interrupt gate
//! ([`gate`]), which masks the timer interrupt for short critical sections,
//! and the scheduler's block/ready operations. The layering mirrors the
//! machine: masking interrupts is the only true atomicity primitive on a
//! single-CPU machine, and the blocking primitives are built from it.

pub mod alarm;
pub mod condvar;
pub mod gate;
pub mod lock;
pub mod rendezvous;

pub use alarm::Alarm;
pub use condvar::Condition;
pub use lock::Lock;
pub use rendezvous::Rendezvous;
