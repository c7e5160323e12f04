// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Failures fall into three severities. User-visible failures are ordinary
//! `Err` values that syscall handlers translate into a `-1` return; they
//! never terminate the caller. Process-fatal faults (any processor exception
//! other than a syscall) end the offending process with exit status 1.
//! Kernel-fatal conditions go through `kassert!`, which panics.

/// Reasons an executable may fail to load into a new address space.
///
/// Every variant surfaces to user code as a `false` return from program
/// startup, i.e. `-1` from `exec`; the variants exist so the failure can be
/// logged precisely and asserted on in tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadError {
    /// The named executable does not exist in the file system.
    NotFound,
    /// The file exists but is not a valid executable image (bad magic,
    /// truncated header or contents).
    BadImage,
    /// Image sections do not tile the address space contiguously from
    /// page 0.
    Fragmented,
    /// The packed argument block (pointer table plus strings) does not fit
    /// in a single page.
    ArgumentsTooLong,
    /// Not enough free physical frames to back the whole address space. No
    /// frames remain allocated after this is returned.
    OutOfMemory,
}

/// A device-level I/O failure, reported by the machine's file and console
/// endpoints. The kernel maps these to `-1` at the syscall boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IoError {
    /// The endpoint does not support the requested access (e.g. positioned
    /// reads on a console).
    Unsupported,
    /// The underlying device rejected the transfer.
    Device,
}

/// Problems with the kernel's own configuration, detected at construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// `process_kind` does not name a known process capability bundle.
    UnknownProcessKind(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::UnknownProcessKind(k) => {
                write!(f, "unknown process kind {k:?}")
            }
        }
    }
}
