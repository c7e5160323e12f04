// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A hosted implementation of the machine contracts in `kern::machine`.
//!
//! The simulator provides everything the kernel consumes -- processor,
//! interrupt line, timer, power switch, file system, console, and
//! executable loader -- as ordinary host objects, so the whole operating
//! system runs (and is tested) as a normal process. See the module docs of
//! [`cpu`] for how user programs are expressed.

pub mod clock;
pub mod console;
pub mod cpu;
pub mod fs;
pub mod image;

use std::sync::Arc;

use kern::machine::Machine;

pub use clock::Clock;
pub use console::SimConsole;
pub use cpu::{SimProcessor, UserCtx};
pub use fs::SimFileSystem;
pub use image::{key_program, ImageBuilder, SimLoader};

/// Machine shape parameters.
#[derive(Copy, Clone, Debug)]
pub struct SimConfig {
    pub page_size: usize,
    pub num_phys_pages: usize,
    /// Ticks between timer interrupts.
    pub timer_period: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            page_size: 1024,
            num_phys_pages: 64,
            timer_period: 500,
        }
    }
}

/// The assembled simulated machine.
pub struct SimMachine {
    pub clock: Arc<Clock>,
    pub cpu: Arc<SimProcessor>,
    pub fs: Arc<SimFileSystem>,
    pub console: Arc<SimConsole>,
    pub loader: Arc<SimLoader>,
    page_size: usize,
}

impl SimMachine {
    pub fn new(config: SimConfig) -> Self {
        let clock = Clock::new(config.timer_period);
        let cpu = SimProcessor::new(
            config.page_size,
            config.num_phys_pages,
            Arc::clone(&clock),
        );
        let loader = SimLoader::new(Arc::clone(&cpu));
        Self {
            clock,
            cpu,
            fs: SimFileSystem::new(),
            console: SimConsole::new(),
            loader,
            page_size: config.page_size,
        }
    }

    /// The device bundle in the form the kernel takes.
    pub fn machine(&self) -> Machine {
        Machine {
            processor: self.cpu.clone(),
            interrupts: self.clock.clone(),
            timer: self.clock.clone(),
            power: self.clock.clone(),
            file_system: self.fs.clone(),
            console: self.console.clone(),
            loader: self.loader.clone(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Installs an executable image under `name` in the file system.
    pub fn install_image(&self, name: &str, bytes: Vec<u8>) {
        self.fs.put(name, bytes);
    }

    /// Installs the standard image for `name` and registers `body` as its
    /// behavior, keyed by the name itself.
    pub fn install_program(
        &self,
        name: &str,
        body: impl Fn(&UserCtx<'_>) + Send + Sync + 'static,
    ) {
        self.install_image(name, key_program(self.page_size, name));
        self.cpu.register_program(name, body);
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}
