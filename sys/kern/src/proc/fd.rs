// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-process file descriptor table.

use abi::{FD_STDIN, FD_STDOUT, MAX_OPEN_FILES};

use crate::machine::{Console, OpenFile};

/// One open file as a process sees it.
pub struct FileDescriptor {
    pub(crate) file: Box<dyn OpenFile>,
    /// Byte position for positioned devices. The console endpoints have no
    /// position and ignore this.
    pub(crate) pos: usize,
    /// Name the file was opened under, for deferred unlink.
    pub(crate) name: String,
    /// Set by `unlink` while the file is open; the delete happens at close.
    pub(crate) unlink_on_close: bool,
}

impl FileDescriptor {
    pub(crate) fn new(file: Box<dyn OpenFile>, name: String) -> Self {
        Self {
            file,
            pos: 0,
            name,
            unlink_on_close: false,
        }
    }
}

/// Fixed-size descriptor table. Slots 0 and 1 are wired to the console at
/// construction and are never candidates for reallocation; new descriptors
/// take the lowest free slot from 2 upward.
pub struct FdTable {
    slots: [Option<FileDescriptor>; MAX_OPEN_FILES],
}

impl FdTable {
    pub(crate) fn new(console: &dyn Console) -> Self {
        let mut slots: [Option<FileDescriptor>; MAX_OPEN_FILES] =
            std::array::from_fn(|_| None);
        slots[FD_STDIN as usize] = Some(FileDescriptor::new(
            console.open_for_reading(),
            "(stdin)".to_string(),
        ));
        slots[FD_STDOUT as usize] = Some(FileDescriptor::new(
            console.open_for_writing(),
            "(stdout)".to_string(),
        ));
        Self { slots }
    }

    fn index(fd: i32) -> Option<usize> {
        if (0..MAX_OPEN_FILES as i32).contains(&fd) {
            Some(fd as usize)
        } else {
            None
        }
    }

    /// Mutable access to an occupied slot.
    pub(crate) fn get_mut(&mut self, fd: i32) -> Option<&mut FileDescriptor> {
        self.slots[Self::index(fd)?].as_mut()
    }

    /// Installs `descriptor` in the first free slot at index 2 or above,
    /// returning the descriptor number, or gives the descriptor back if the
    /// table is full.
    pub(crate) fn install(
        &mut self,
        descriptor: FileDescriptor,
    ) -> Result<i32, FileDescriptor> {
        for fd in 2..MAX_OPEN_FILES {
            if self.slots[fd].is_none() {
                self.slots[fd] = Some(descriptor);
                return Ok(fd as i32);
            }
        }
        Err(descriptor)
    }

    /// Removes and returns the descriptor in `fd`, if occupied.
    pub(crate) fn take(&mut self, fd: i32) -> Option<FileDescriptor> {
        self.slots[Self::index(fd)?].take()
    }

    /// Finds an open file by name, comparing name contents. Only the
    /// allocatable slots are searched; the console endpoints don't
    /// correspond to file-system names.
    pub(crate) fn find_named_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut FileDescriptor> {
        self.slots[2..]
            .iter_mut()
            .flatten()
            .find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::IoError;

    struct NullFile;

    impl OpenFile for NullFile {
        fn read(&self, _buf: &mut [u8]) -> Result<usize, IoError> {
            Ok(0)
        }
        fn write(&self, data: &[u8]) -> Result<usize, IoError> {
            Ok(data.len())
        }
        fn read_at(
            &self,
            _pos: usize,
            _buf: &mut [u8],
        ) -> Result<usize, IoError> {
            Ok(0)
        }
        fn write_at(
            &self,
            _pos: usize,
            data: &[u8],
        ) -> Result<usize, IoError> {
            Ok(data.len())
        }
        fn close(&self) {}
    }

    struct NullConsole;

    impl Console for NullConsole {
        fn open_for_reading(&self) -> Box<dyn OpenFile> {
            Box::new(NullFile)
        }
        fn open_for_writing(&self) -> Box<dyn OpenFile> {
            Box::new(NullFile)
        }
    }

    fn named(name: &str) -> FileDescriptor {
        FileDescriptor::new(Box::new(NullFile), name.to_string())
    }

    #[test]
    fn console_slots_are_preassigned() {
        let mut table = FdTable::new(&NullConsole);
        assert!(table.get_mut(0).is_some());
        assert!(table.get_mut(1).is_some());
        assert!(table.get_mut(2).is_none());
    }

    #[test]
    fn install_takes_first_free_slot_from_two() {
        let mut table = FdTable::new(&NullConsole);
        assert_eq!(table.install(named("a")).ok(), Some(2));
        assert_eq!(table.install(named("b")).ok(), Some(3));
        // Free slot 2 and confirm the scan does not skip over it.
        assert!(table.take(2).is_some());
        assert_eq!(table.install(named("c")).ok(), Some(2));
        assert_eq!(table.install(named("d")).ok(), Some(4));
    }

    #[test]
    fn install_fails_when_full() {
        let mut table = FdTable::new(&NullConsole);
        for _ in 2..MAX_OPEN_FILES {
            assert!(table.install(named("x")).is_ok());
        }
        assert!(table.install(named("overflow")).is_err());
    }

    #[test]
    fn find_named_compares_contents() {
        let mut table = FdTable::new(&NullConsole);
        table.install(named("data.txt")).ok().unwrap();
        // A name equal in content but separately allocated must match.
        let probe = String::from("data") + ".txt";
        assert!(table.find_named_mut(&probe).is_some());
        assert!(table.find_named_mut("other.txt").is_none());
    }

    #[test]
    fn out_of_range_descriptors_rejected() {
        let mut table = FdTable::new(&NullConsole);
        assert!(table.get_mut(-1).is_none());
        assert!(table.get_mut(MAX_OPEN_FILES as i32).is_none());
        assert!(table.take(99).is_none());
    }
}
