// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The console device.
//!
//! Input is a scripted byte queue tests fill ahead of time; an exhausted
//! queue reads as end-of-file rather than blocking. Output accumulates
//! where tests can collect it.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use kern::err::IoError;
use kern::machine::{Console, OpenFile};

#[derive(Default)]
struct ConsoleState {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

/// See the module docs.
#[derive(Default)]
pub struct SimConsole {
    state: Arc<ConsoleState>,
}

impl SimConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues bytes for programs to read from descriptor 0.
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.input.lock().extend(bytes.iter().copied());
    }

    /// Drains everything written to descriptor 1 so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.output.lock())
    }
}

impl Console for SimConsole {
    fn open_for_reading(&self) -> Box<dyn OpenFile> {
        Box::new(Endpoint {
            state: Arc::clone(&self.state),
            writable: false,
        })
    }

    fn open_for_writing(&self) -> Box<dyn OpenFile> {
        Box::new(Endpoint {
            state: Arc::clone(&self.state),
            writable: true,
        })
    }
}

struct Endpoint {
    state: Arc<ConsoleState>,
    writable: bool,
}

impl OpenFile for Endpoint {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        if self.writable {
            return Err(IoError::Unsupported);
        }
        let mut input = self.state.input.lock();
        let n = buf.len().min(input.len());
        for slot in buf[..n].iter_mut() {
            *slot = input.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<usize, IoError> {
        if !self.writable {
            return Err(IoError::Unsupported);
        }
        self.state.output.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn read_at(&self, _pos: usize, _buf: &mut [u8]) -> Result<usize, IoError> {
        Err(IoError::Unsupported)
    }

    fn write_at(&self, _pos: usize, _data: &[u8]) -> Result<usize, IoError> {
        Err(IoError::Unsupported)
    }

    fn close(&self) {}
}
