// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory file system device.
//!
//! Contents live as shared byte vectors. Removing a name drops it from the
//! namespace but leaves existing handles working, which is why the
//! kernel's *deferred* unlink -- keep the name until the last close -- is
//! observable as a distinct behavior in tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use kern::err::IoError;
use kern::machine::{FileSystem, OpenFile};

#[derive(Default)]
struct FileData {
    bytes: Mutex<Vec<u8>>,
}

/// See the module docs.
#[derive(Default)]
pub struct SimFileSystem {
    files: Mutex<HashMap<String, Arc<FileData>>>,
}

impl SimFileSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates (or replaces) `name` with the given contents. Test setup
    /// helper; user programs go through `creat`/`write`.
    pub fn put(&self, name: &str, contents: Vec<u8>) {
        let data = Arc::new(FileData {
            bytes: Mutex::new(contents),
        });
        self.files.lock().insert(name.to_string(), data);
    }

    /// Reads the current contents of `name`, if it exists.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let data = self.files.lock().get(name).cloned()?;
        let bytes = data.bytes.lock().clone();
        Some(bytes)
    }

    /// Whether `name` exists in the namespace.
    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

impl FileSystem for SimFileSystem {
    fn open(
        &self,
        name: &str,
        create_if_missing: bool,
    ) -> Option<Box<dyn OpenFile>> {
        let mut files = self.files.lock();
        let data = match files.get(name) {
            Some(d) => Arc::clone(d),
            None if create_if_missing => {
                let d = Arc::new(FileData::default());
                files.insert(name.to_string(), Arc::clone(&d));
                d
            }
            None => return None,
        };
        Some(Box::new(SimFile {
            data,
            cursor: Mutex::new(0),
        }))
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

struct SimFile {
    data: Arc<FileData>,
    /// Position for the sequential read/write forms.
    cursor: Mutex<usize>,
}

impl SimFile {
    fn read_from(&self, pos: usize, buf: &mut [u8]) -> usize {
        let bytes = self.data.bytes.lock();
        let avail = bytes.len().saturating_sub(pos);
        let n = avail.min(buf.len());
        if n > 0 {
            buf[..n].copy_from_slice(&bytes[pos..pos + n]);
        }
        n
    }

    fn write_to(&self, pos: usize, data: &[u8]) -> usize {
        let mut bytes = self.data.bytes.lock();
        if bytes.len() < pos + data.len() {
            bytes.resize(pos + data.len(), 0);
        }
        bytes[pos..pos + data.len()].copy_from_slice(data);
        data.len()
    }
}

impl OpenFile for SimFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        let mut cursor = self.cursor.lock();
        let n = self.read_from(*cursor, buf);
        *cursor += n;
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<usize, IoError> {
        let mut cursor = self.cursor.lock();
        let n = self.write_to(*cursor, data);
        *cursor += n;
        Ok(n)
    }

    fn read_at(&self, pos: usize, buf: &mut [u8]) -> Result<usize, IoError> {
        Ok(self.read_from(pos, buf))
    }

    fn write_at(&self, pos: usize, data: &[u8]) -> Result<usize, IoError> {
        Ok(self.write_to(pos, data))
    }

    fn close(&self) {}
}
