// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-process virtual address spaces.
//!
//! An address space is a contiguous run of virtual pages: the executable's
//! sections from page 0, then a fixed run of stack pages growing down, then
//! a single page holding the packed program arguments. Construction
//! allocates every backing frame up front, so a load either fully succeeds
//! or releases everything it took.
//!
//! The copy routines are the only path between kernel buffers and user
//! memory. They clamp to the address space, honor per-page write
//! protection, and report short transfers instead of failing, so no user
//! pointer can hurt the kernel.

use std::sync::Arc;

use parking_lot::Mutex;

use abi::regs;
use abi::TranslationEntry;

use crate::err::LoadError;
use crate::kassert;
use crate::machine::{Machine, Processor};
use crate::mem::frames::FrameAllocator;
use crate::proc::process::ProcessOps;

/// A process page table, shared between the kernel and the simulated MMU.
pub struct PageTable {
    entries: Mutex<Vec<TranslationEntry>>,
}

impl PageTable {
    pub fn new(entries: Vec<TranslationEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out entry `vpn`.
    ///
    /// # Panics
    ///
    /// If `vpn` is out of range.
    pub fn entry(&self, vpn: usize) -> TranslationEntry {
        self.entries.lock()[vpn]
    }

    /// Runs `body` with mutable access to the entries.
    pub fn with_entries<R>(
        &self,
        body: impl FnOnce(&mut [TranslationEntry]) -> R,
    ) -> R {
        body(&mut self.entries.lock())
    }

    /// Translates a virtual byte address to a physical one, the way the MMU
    /// does: `None` for unmapped or invalid pages, and for stores through a
    /// read-only page when `for_write` is set.
    pub fn translate(
        &self,
        vaddr: usize,
        page_size: usize,
        for_write: bool,
    ) -> Option<usize> {
        let vpn = vaddr / page_size;
        let offset = vaddr % page_size;
        self.with_entries(|entries| {
            let entry = entries.get(vpn)?;
            if !entry.valid || (for_write && entry.read_only) {
                return None;
            }
            Some(entry.ppn as usize * page_size + offset)
        })
    }
}

/// The memory state of one user process.
pub struct AddressSpace {
    processor: Arc<dyn Processor>,
    table: Arc<PageTable>,
    num_pages: usize,
    initial_pc: i32,
    initial_sp: i32,
    argc: i32,
    argv_addr: i32,
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("num_pages", &self.num_pages)
            .field("initial_pc", &self.initial_pc)
            .field("initial_sp", &self.initial_sp)
            .field("argc", &self.argc)
            .field("argv_addr", &self.argv_addr)
            .finish()
    }
}

impl AddressSpace {
    /// Builds an address space for executable `name` with arguments `args`.
    ///
    /// Opens and parses the executable, verifies its layout, allocates
    /// every frame in one batch, loads the sections through `ops`, and
    /// packs the argument page. On any failure the frames are back in the
    /// allocator and an error describes what went wrong.
    pub fn load(
        machine: &Machine,
        frames: &FrameAllocator,
        ops: &dyn ProcessOps,
        name: &str,
        args: &[String],
        stack_pages: usize,
    ) -> Result<AddressSpace, LoadError> {
        let processor = Arc::clone(&machine.processor);
        let page_size = processor.page_size();

        let file = machine
            .file_system
            .open(name, false)
            .ok_or(LoadError::NotFound)?;
        let image = machine.loader.parse(file)?;

        // The sections must tile the bottom of the address space.
        let image_pages = kerncore::contiguous_page_count(
            image
                .sections()
                .iter()
                .map(|s| (s.first_vpn, s.num_pages)),
        )
        .ok_or_else(|| {
            log::debug!("{name}: fragmented executable");
            LoadError::Fragmented
        })?;

        // The packed argument block must fit in its single page.
        let argv_bytes =
            kerncore::argv_footprint(args.iter().map(|a| a.len()));
        if argv_bytes > page_size {
            log::debug!("{name}: arguments too long ({argv_bytes} bytes)");
            return Err(LoadError::ArgumentsTooLong);
        }

        let num_pages = image_pages + stack_pages + 1;

        // All frames up front: a shortfall discovered later would leak the
        // ones already taken.
        let issued = frames.allocate_many(num_pages).ok_or_else(|| {
            log::debug!("{name}: insufficient physical memory");
            LoadError::OutOfMemory
        })?;

        let entries = issued
            .iter()
            .enumerate()
            .map(|(vpn, &ppn)| TranslationEntry {
                vpn: vpn as u32,
                ppn,
                valid: true,
                read_only: false,
                used: false,
                dirty: false,
            })
            .collect();

        let space = AddressSpace {
            processor,
            table: PageTable::new(entries),
            num_pages,
            initial_pc: image.entry_point() as i32,
            initial_sp: ((num_pages - 1) * page_size) as i32,
            argc: args.len() as i32,
            argv_addr: ((num_pages - 1) * page_size) as i32,
        };

        if let Err(e) = ops.load_sections(&*image, &space) {
            log::debug!("{name}: section load failed: {e:?}");
            space.release_frames(frames);
            return Err(e);
        }

        // Pack the argument page: the pointer table, then the strings, each
        // with its terminator. These writes cannot fail -- the page exists
        // and is writable, and the footprint was checked above.
        let mut entry_offset = space.argv_addr;
        let mut string_offset = entry_offset + space.argc * 4;
        for arg in args {
            kassert!(space.write_i32(entry_offset, string_offset));
            entry_offset += 4;
            let bytes = arg.as_bytes();
            kassert!(space.write_virtual(string_offset, bytes) == bytes.len());
            string_offset += bytes.len() as i32;
            kassert!(space.write_virtual(string_offset, &[0]) == 1);
            string_offset += 1;
        }

        log::debug!(
            "loaded {name}: {image_pages} image + {stack_pages} stack + 1 \
             argv pages, entry {:#x}",
            space.initial_pc
        );
        Ok(space)
    }

    /// Installs this address space's page table as the current thread's
    /// translation state.
    pub fn activate(&self) {
        self.processor.set_page_table(Arc::clone(&self.table));
    }

    /// Prepares the processor registers for first entry: everything zero
    /// except the program counter, stack pointer, and the two argument
    /// registers carrying `argc` and the argv address.
    pub fn init_registers(&self) {
        for r in 0..regs::NUM_USER_REGISTERS {
            self.processor.write_register(r, 0);
        }
        self.processor.write_register(regs::PC, self.initial_pc);
        self.processor.write_register(regs::SP, self.initial_sp);
        self.processor.write_register(regs::A0, self.argc);
        self.processor.write_register(regs::A1, self.argv_addr);
    }

    /// Copies up to `buf.len()` bytes from user virtual memory at `vaddr`
    /// into `buf`. Returns the number of bytes transferred, which is short
    /// when the range runs off the end of the address space. Never fails.
    pub fn read_virtual(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        if vaddr < 0 {
            return 0;
        }
        let page_size = self.processor.page_size();
        let mut copied = 0;
        for span in kerncore::page_spans(
            vaddr as usize,
            buf.len(),
            page_size,
            self.num_pages,
        ) {
            let ppn = self.table.with_entries(|entries| {
                let entry = &mut entries[span.vpn];
                entry.used = true;
                entry.ppn
            });
            let paddr = ppn as usize * page_size + span.offset;
            self.processor
                .read_phys(paddr, &mut buf[copied..copied + span.len]);
            copied += span.len;
        }
        copied
    }

    /// Copies `data` into user virtual memory at `vaddr`. Stops at the end
    /// of the address space or at the first read-only page, returning the
    /// number of bytes actually written; a write that begins on a read-only
    /// page transfers nothing.
    pub fn write_virtual(&self, vaddr: i32, data: &[u8]) -> usize {
        if vaddr < 0 {
            return 0;
        }
        let page_size = self.processor.page_size();
        let mut written = 0;
        for span in kerncore::page_spans(
            vaddr as usize,
            data.len(),
            page_size,
            self.num_pages,
        ) {
            let ppn = self.table.with_entries(|entries| {
                let entry = &mut entries[span.vpn];
                if entry.read_only {
                    return None;
                }
                entry.used = true;
                entry.dirty = true;
                Some(entry.ppn)
            });
            let Some(ppn) = ppn else {
                break;
            };
            let paddr = ppn as usize * page_size + span.offset;
            self.processor
                .write_phys(paddr, &data[written..written + span.len]);
            written += span.len;
        }
        written
    }

    /// Reads a null-terminated string of at most `max_len` bytes from user
    /// memory. Returns `None` -- distinct from an empty string -- if no
    /// terminator appears within the window.
    pub fn read_string(&self, vaddr: i32, max_len: usize) -> Option<String> {
        let mut buf = vec![0u8; max_len + 1];
        let got = self.read_virtual(vaddr, &mut buf);
        let nul = buf[..got].iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&buf[..nul]).into_owned())
    }

    /// Reads a little-endian 32-bit value; `None` unless all four bytes
    /// were transferable.
    pub fn read_i32(&self, vaddr: i32) -> Option<i32> {
        let mut bytes = [0u8; 4];
        if self.read_virtual(vaddr, &mut bytes) == 4 {
            Some(i32::from_le_bytes(bytes))
        } else {
            None
        }
    }

    /// Writes a little-endian 32-bit value; `true` iff all four bytes
    /// landed.
    pub fn write_i32(&self, vaddr: i32, value: i32) -> bool {
        self.write_virtual(vaddr, &value.to_le_bytes()) == 4
    }

    /// Returns every frame to `frames` and invalidates the entries.
    pub(crate) fn release_frames(&self, frames: &FrameAllocator) {
        self.table.with_entries(|entries| {
            for entry in entries {
                if entry.valid {
                    frames.release(entry.ppn);
                    entry.valid = false;
                }
            }
        });
    }

    pub fn page_table(&self) -> &Arc<PageTable> {
        &self.table
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn initial_pc(&self) -> i32 {
        self.initial_pc
    }

    pub fn initial_sp(&self) -> i32 {
        self.initial_sp
    }

    pub fn argc(&self) -> i32 {
        self.argc
    }

    pub fn argv_addr(&self) -> i32 {
        self.argv_addr
    }
}
