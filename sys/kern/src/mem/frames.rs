// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The physical frame allocator.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::kassert;

struct Frames {
    /// Frames not currently issued, in release order. Any free frame is as
    /// good as any other; FIFO just keeps allocation patterns boring.
    free: VecDeque<u32>,
    /// `issued[ppn]` tracks ownership so that releasing a frame the caller
    /// does not own is caught instead of corrupting the free list.
    issued: Vec<bool>,
}

/// Hands out physical page frames, one per owner.
///
/// There is exactly one allocator per kernel. Every frame not issued is on
/// the free list; issued frames are owned by exactly one address space and
/// come back through [`FrameAllocator::release`] at teardown.
pub struct FrameAllocator {
    state: Mutex<Frames>,
}

impl FrameAllocator {
    /// Creates an allocator over frames `0..num_phys_pages`, all free.
    pub fn new(num_phys_pages: usize) -> Self {
        Self {
            state: Mutex::new(Frames {
                free: (0..num_phys_pages as u32).collect(),
                issued: vec![false; num_phys_pages],
            }),
        }
    }

    /// Allocates `count` frames, all or nothing: either every frame is
    /// issued to the caller, or the allocator is left untouched and `None`
    /// is returned. Address-space construction uses this so a load that
    /// cannot be satisfied leaks nothing.
    pub fn allocate_many(&self, count: usize) -> Option<Vec<u32>> {
        let mut st = self.state.lock();
        if st.free.len() < count {
            return None;
        }
        let taken: Vec<u32> = st.free.drain(..count).collect();
        for &ppn in &taken {
            st.issued[ppn as usize] = true;
        }
        Some(taken)
    }

    /// Returns `ppn` to the free list.
    ///
    /// # Panics
    ///
    /// If `ppn` is out of range or not currently issued.
    pub fn release(&self, ppn: u32) {
        let mut st = self.state.lock();
        let slot = st.issued.get_mut(ppn as usize);
        kassert!(
            slot.as_deref() == Some(&true),
            "releasing frame {ppn} that is not issued"
        );
        if let Some(slot) = slot {
            *slot = false;
        }
        st.free.push_back(ppn);
    }

    /// Number of frames currently on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }
}
