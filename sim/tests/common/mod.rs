// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the machine-level test suite.

#![allow(dead_code)]

use std::sync::Arc;

use kern::config::KernelConfig;
use kern::kernel::Kernel;
use sim::{SimConfig, SimMachine, UserCtx};

/// Brings up a default machine and kernel on the calling thread.
pub fn boot() -> (SimMachine, Arc<Kernel>) {
    boot_with(SimConfig::default(), KernelConfig::default())
}

pub fn boot_with(
    sim_config: SimConfig,
    kernel_config: KernelConfig,
) -> (SimMachine, Arc<Kernel>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let machine = SimMachine::new(sim_config);
    let kernel = Kernel::new(machine.machine(), kernel_config)
        .expect("kernel construction");
    (machine, kernel)
}

/// Reads a little-endian i32 out of the current program's memory.
pub fn peek_i32(ctx: &UserCtx<'_>, vaddr: i32) -> Option<i32> {
    let mut bytes = [0u8; 4];
    if ctx.peek(vaddr, &mut bytes) {
        Some(i32::from_le_bytes(bytes))
    } else {
        None
    }
}

/// Reads a NUL-terminated string out of the current program's memory.
pub fn peek_cstr(ctx: &UserCtx<'_>, vaddr: i32, max: usize) -> Option<String> {
    let mut bytes = vec![0u8; max];
    if !ctx.peek(vaddr, &mut bytes) {
        return None;
    }
    let nul = bytes.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&bytes[..nul]).into_owned())
}
