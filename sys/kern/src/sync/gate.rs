// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scoped interrupt masking.

use crate::machine::InterruptLine;

/// Masks interrupts for the lifetime of the returned guard.
///
/// The prior state is captured here and restored exactly once when the
/// guard is dropped, on every exit path -- ordinary return or unwind.
/// Nesting is fine: an inner guard captures "already masked" and its
/// restore is a no-op.
pub fn off(line: &dyn InterruptLine) -> IrqGuard<'_> {
    IrqGuard {
        prior: line.disable(),
        line,
    }
}

/// See [`off`].
pub struct IrqGuard<'a> {
    line: &'a dyn InterruptLine,
    prior: bool,
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.line.restore(self.prior);
    }
}
