// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User processes: lifecycle, descriptors, and the syscall surface.

pub mod fd;
pub mod process;
pub mod syscalls;
pub mod table;

pub use process::{current_process, Process};
pub use table::ProcessTable;
