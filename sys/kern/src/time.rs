// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

/// In-kernel timestamp representation.
///
/// This is measured in the simulated machine's "tick" unit, which advances
/// monotonically and has no relation to wall-clock time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Returns this timestamp shifted `ticks` into the future (or past, for
    /// negative `ticks`), saturating at the ends of the tick range.
    pub fn offset(self, ticks: i64) -> Self {
        Timestamp(self.0.saturating_add_signed(ticks))
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
