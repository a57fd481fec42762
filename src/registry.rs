//! The fixed set of top-level keys and the process-wide save levels.

use std::rc::Rc;

use crate::error::{RegError, Result};
use crate::handle::{HandleManager, Hkey};
use crate::tree::{Key, KeyFlags, KeyRef};
use crate::{tree, util, wstr};

pub const HKEY_CLASSES_ROOT: Hkey = 0x8000_0000;
pub const HKEY_CURRENT_USER: Hkey = 0x8000_0001;
pub const HKEY_LOCAL_MACHINE: Hkey = 0x8000_0002;
pub const HKEY_USERS: Hkey = 0x8000_0003;
pub const HKEY_PERFORMANCE_DATA: Hkey = 0x8000_0004;
pub const HKEY_CURRENT_CONFIG: Hkey = 0x8000_0005;
pub const HKEY_DYN_DATA: Hkey = 0x8000_0006;

const HKEY_ROOT_FIRST: Hkey = HKEY_CLASSES_ROOT;
const HKEY_ROOT_LAST: Hkey = HKEY_DYN_DATA;
const NB_ROOT_KEYS: usize = (HKEY_ROOT_LAST - HKEY_ROOT_FIRST + 1) as usize;

pub(crate) const ROOT_KEY_NAMES: [&str; NB_ROOT_KEYS] = [
    "HKEY_CLASSES_ROOT",
    "HKEY_CURRENT_USER",
    "HKEY_LOCAL_MACHINE",
    "HKEY_USERS",
    "HKEY_PERFORMANCE_DATA",
    "HKEY_CURRENT_CONFIG",
    "HKEY_DYN_DATA",
];

/// The registry state of one server process: the lazily built root keys and
/// the two save levels.
///
/// `current_level` is stamped onto every created or modified key;
/// `saving_level` is the minimum level a key needs in order to be written
/// out by the savers.
pub struct Registry {
    roots: [Option<KeyRef>; NB_ROOT_KEYS],
    pub(crate) current_level: i32,
    pub(crate) saving_level: i32,
    pub(crate) saving_version: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            roots: Default::default(),
            current_level: 0,
            saving_level: 0,
            saving_version: 2,
        }
    }

    pub fn is_root_hkey(hkey: Hkey) -> bool {
        (HKEY_ROOT_FIRST..=HKEY_ROOT_LAST).contains(&hkey)
    }

    pub fn set_levels(&mut self, current: i32, saving: i32) {
        self.current_level = current;
        self.saving_level = saving;
    }

    /// select the text format written by the savers; 2 is the default
    pub fn set_saving_version(&mut self, version: u32) {
        self.saving_version = version;
    }

    pub fn current_level(&self) -> i32 {
        self.current_level
    }

    fn create_root_key(&mut self, hkey: Hkey) -> Result<KeyRef> {
        let key = match hkey {
            // aliased to a subtree of the machine branch, created on demand
            HKEY_CLASSES_ROOT => {
                let machine = self.root_key(HKEY_LOCAL_MACHINE)?;
                let name = wstr::from_str("SOFTWARE\\Classes");
                let (key, _) =
                    tree::create_key(&machine, &name, None, 0, util::now(), self.current_level)?;
                key
            }
            _ => Key::new(None, util::now(), self.current_level),
        };
        key.borrow_mut().flags |= KeyFlags::ROOT;
        self.roots[(hkey - HKEY_ROOT_FIRST) as usize] = Some(key.clone());
        Ok(key)
    }

    /// return the root key for a well-known hkey value, building it on first use
    pub fn root_key(&mut self, hkey: Hkey) -> Result<KeyRef> {
        debug_assert!(Self::is_root_hkey(hkey));
        if let Some(key) = &self.roots[(hkey - HKEY_ROOT_FIRST) as usize] {
            return Ok(key.clone());
        }
        self.create_root_key(hkey)
    }

    /// resolve an hkey to its key, through the root table or the handle manager
    pub fn resolve_hkey(
        &mut self,
        handles: &mut dyn HandleManager,
        hkey: Hkey,
        access: u32,
    ) -> Result<KeyRef> {
        if Self::is_root_hkey(hkey) {
            self.root_key(hkey)
        } else {
            handles
                .get_key(hkey, access)
                .map_err(|e| RegError::Handle(e.to_string()))
        }
    }

    /// the human label of a root key, if this key is one
    pub(crate) fn root_label(&self, key: &KeyRef) -> Option<&'static str> {
        self.roots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|k| Rc::ptr_eq(k, key))
                .map(|_| ROOT_KEY_NAMES[i])
        })
    }

    /// drop every populated root slot; used on server shutdown
    pub fn close(&mut self) {
        for slot in self.roots.iter_mut() {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wstr::from_str;

    #[test]
    fn roots_are_lazy_and_cached() {
        let mut reg = Registry::new();
        let a = reg.root_key(HKEY_LOCAL_MACHINE).unwrap();
        let b = reg.root_key(HKEY_LOCAL_MACHINE).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(a.borrow().flags.contains(KeyFlags::ROOT));
        assert!(a.borrow().name.is_none());
        assert_eq!(reg.root_label(&a), Some("HKEY_LOCAL_MACHINE"));
    }

    #[test]
    fn classes_root_aliases_the_machine_branch() {
        let mut reg = Registry::new();
        let classes = reg.root_key(HKEY_CLASSES_ROOT).unwrap();
        let machine = reg.root_key(HKEY_LOCAL_MACHINE).unwrap();
        let resolved = tree::open_key(&machine, &from_str("SOFTWARE\\Classes")).unwrap();
        assert!(Rc::ptr_eq(&classes, &resolved));
        assert!(classes.borrow().flags.contains(KeyFlags::ROOT));
        // an aliased root is never deletable either
        assert_eq!(
            tree::delete_key(&machine, &from_str("SOFTWARE\\Classes"), 0).unwrap_err(),
            crate::error::RegError::AccessDenied
        );
    }

    #[test]
    fn close_clears_the_table() {
        let mut reg = Registry::new();
        let machine = reg.root_key(HKEY_LOCAL_MACHINE).unwrap();
        reg.close();
        assert_eq!(reg.root_label(&machine), None);
        // a fresh root is built on the next request
        let fresh = reg.root_key(HKEY_LOCAL_MACHINE).unwrap();
        assert!(!Rc::ptr_eq(&machine, &fresh));
    }

    #[test]
    fn hkey_range_check() {
        assert!(Registry::is_root_hkey(HKEY_CLASSES_ROOT));
        assert!(Registry::is_root_hkey(HKEY_DYN_DATA));
        assert!(!Registry::is_root_hkey(HKEY_DYN_DATA + 1));
        assert!(!Registry::is_root_hkey(1));
    }
}
