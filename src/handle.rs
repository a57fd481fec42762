//! The handle-manager seam.
//!
//! Object and handle management lives outside the registry core; the core
//! only needs the small interface below: resolve a key handle with an access
//! check, hand out new handles, and adopt byte streams for file handles
//! during load and save. [`ProcessHandles`] is a hash-map backed
//! implementation of it, enough for a single process.

use std::io::{Read, Write};

use anyhow::Context;
use fnv::FnvHashMap;

use crate::tree::KeyRef;

/// An opaque per-process capability referring to a key. Well-known values in
/// the root range resolve through the root table without consuming a slot.
pub type Hkey = u32;

pub const KEY_QUERY_VALUE: u32 = 0x0001;
pub const KEY_SET_VALUE: u32 = 0x0002;
pub const KEY_CREATE_SUB_KEY: u32 = 0x0004;
pub const KEY_ENUMERATE_SUB_KEYS: u32 = 0x0008;
pub const KEY_NOTIFY: u32 = 0x0010;
pub const KEY_CREATE_LINK: u32 = 0x0020;
pub const KEY_ALL_ACCESS: u32 = 0x000f_003f;
pub const MAXIMUM_ALLOWED: u32 = 0x0200_0000;

pub trait HandleManager {
    /// resolve a key handle, checking the requested access against what the
    /// handle was granted
    fn get_key(&mut self, handle: Hkey, access: u32) -> anyhow::Result<KeyRef>;

    /// hand out a new handle for a key with the given access mask
    fn alloc_handle(&mut self, key: KeyRef, access: u32) -> anyhow::Result<Hkey>;

    fn close_handle(&mut self, handle: Hkey) -> anyhow::Result<()>;

    /// adopt the readable byte stream behind a file handle
    fn open_read(&mut self, handle: u32) -> anyhow::Result<Box<dyn Read>>;

    /// adopt the writable byte stream behind a file handle
    fn open_write(&mut self, handle: u32) -> anyhow::Result<Box<dyn Write>>;
}

enum FileObject {
    Read(Box<dyn Read>),
    Write(Box<dyn Write>),
}

/// A per-process handle table.
#[derive(Default)]
pub struct ProcessHandles {
    keys: FnvHashMap<Hkey, (KeyRef, u32)>,
    files: FnvHashMap<u32, FileObject>,
    next: u32,
}

impl ProcessHandles {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    /// register a readable stream and return a file handle for it
    pub fn register_read(&mut self, stream: Box<dyn Read>) -> u32 {
        let handle = self.next_handle();
        self.files.insert(handle, FileObject::Read(stream));
        handle
    }

    /// register a writable stream and return a file handle for it
    pub fn register_write(&mut self, stream: Box<dyn Write>) -> u32 {
        let handle = self.next_handle();
        self.files.insert(handle, FileObject::Write(stream));
        handle
    }

    pub fn open_key_count(&self) -> usize {
        self.keys.len()
    }
}

impl HandleManager for ProcessHandles {
    fn get_key(&mut self, handle: Hkey, access: u32) -> anyhow::Result<KeyRef> {
        let (key, granted) = self.keys.get(&handle).context("invalid key handle")?;
        anyhow::ensure!(
            granted & access == access,
            "access {:#x} not granted on handle {:#x}",
            access,
            handle
        );
        Ok(key.clone())
    }

    fn alloc_handle(&mut self, key: KeyRef, access: u32) -> anyhow::Result<Hkey> {
        let handle = self.next_handle();
        self.keys.insert(handle, (key, access));
        Ok(handle)
    }

    fn close_handle(&mut self, handle: Hkey) -> anyhow::Result<()> {
        self.keys
            .remove(&handle)
            .map(|_| ())
            .context("invalid key handle")
    }

    fn open_read(&mut self, handle: u32) -> anyhow::Result<Box<dyn Read>> {
        match self.files.remove(&handle) {
            Some(FileObject::Read(stream)) => Ok(stream),
            Some(other) => {
                self.files.insert(handle, other);
                anyhow::bail!("file handle {:#x} is not readable", handle)
            }
            None => anyhow::bail!("invalid file handle {:#x}", handle),
        }
    }

    fn open_write(&mut self, handle: u32) -> anyhow::Result<Box<dyn Write>> {
        match self.files.remove(&handle) {
            Some(FileObject::Write(stream)) => Ok(stream),
            Some(other) => {
                self.files.insert(handle, other);
                anyhow::bail!("file handle {:#x} is not writable", handle)
            }
            None => anyhow::bail!("invalid file handle {:#x}", handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Key;

    #[test]
    fn handle_lifecycle() {
        let mut handles = ProcessHandles::new();
        let key = Key::new(None, 0, 0);
        let h = handles.alloc_handle(key, KEY_QUERY_VALUE).unwrap();
        assert!(handles.get_key(h, KEY_QUERY_VALUE).is_ok());
        assert!(handles.get_key(h, 0).is_ok());
        handles.close_handle(h).unwrap();
        assert!(handles.get_key(h, 0).is_err());
        assert!(handles.close_handle(h).is_err());
    }

    #[test]
    fn access_is_checked_against_the_grant() {
        let mut handles = ProcessHandles::new();
        let key = Key::new(None, 0, 0);
        let h = handles.alloc_handle(key, KEY_QUERY_VALUE).unwrap();
        assert!(handles.get_key(h, KEY_SET_VALUE).is_err());
        assert!(handles
            .get_key(h, KEY_QUERY_VALUE | KEY_SET_VALUE)
            .is_err());
    }

    #[test]
    fn file_objects_are_adopted_once() {
        let mut handles = ProcessHandles::new();
        let h = handles.register_read(Box::new(std::io::empty()));
        assert!(handles.open_write(h).is_err());
        assert!(handles.open_read(h).is_ok());
        assert!(handles.open_read(h).is_err());
    }
}
