//! The key tree: nodes, their sorted subkey and value arrays, and the
//! path-based operations over them.
//!
//! Keys are shared through [`KeyRef`]; the parent edge is a weak
//! back-reference so the subkey arrays are the only owning path. Handles hold
//! extra strong references, which is why deleting a key only severs its tree
//! edge and marks it [`KeyFlags::DELETED`]; the node itself lives until the
//! last handle lets go.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use tracing::debug;

use crate::error::{RegError, Result};
use crate::util::{self, Hex};
use crate::wstr::{self, PathTokens, WString};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: u16 {
        /// not saved to disk
        const VOLATILE = 0x0001;
        /// removed from the tree, kept alive by handles
        const DELETED = 0x0002;
        /// top-level key, cannot be deleted
        const ROOT = 0x0004;
    }
}

/// `options` bit requesting a volatile key on create
pub const REG_OPTION_VOLATILE: u32 = 0x0001;

pub const REG_NONE: u32 = 0;
pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;

/// minimum allocated subkey slots per key
pub const MIN_SUBKEYS: usize = 8;
/// minimum allocated value slots per key
pub const MIN_VALUES: usize = 8;

pub type KeyRef = Rc<RefCell<Key>>;

/// A named typed byte blob attached to a key. The empty name is the key's
/// default value.
pub struct KeyValue {
    pub name: WString,
    pub ty: u32,
    pub data: Vec<u8>,
}

impl Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValue")
            .field("name", &wstr::to_string_lossy(&self.name))
            .field("ty", &self.ty)
            .field("data", &Hex::partial(&self.data, 32))
            .finish()
    }
}

/// A node in the registry tree.
pub struct Key {
    /// `None` only for the anonymous top-level keys
    pub name: Option<WString>,
    pub class: Option<WString>,
    pub parent: Weak<RefCell<Key>>,
    /// strictly ascending under case-insensitive name comparison
    pub subkeys: Vec<KeyRef>,
    /// same ordering discipline as `subkeys`
    pub values: Vec<KeyValue>,
    pub flags: KeyFlags,
    /// saving level; a key is written out only if this meets the saving cutoff
    pub level: i32,
    /// last modification time in POSIX seconds
    pub modif: i64,
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name.as_deref().map(wstr::to_string_lossy))
            .field("flags", &self.flags)
            .field("level", &self.level)
            .field("modif", &self.modif)
            .field("subkeys", &self.subkeys.len())
            .field("values", &self.values.len())
            .finish()
    }
}

impl Key {
    pub fn new(name: Option<&[u16]>, modif: i64, level: i32) -> KeyRef {
        Rc::new(RefCell::new(Key {
            name: name.map(|n| n.to_vec()),
            class: None,
            parent: Weak::new(),
            subkeys: Vec::new(),
            values: Vec::new(),
            flags: KeyFlags::empty(),
            level,
            modif,
        }))
    }

    /// binary search for a named child; `Err` carries the insertion point
    pub fn find_subkey(&self, name: &[u16]) -> std::result::Result<usize, usize> {
        self.subkeys.binary_search_by(|k| {
            let k = k.borrow();
            wstr::cmp_i(k.name.as_deref().unwrap_or(&[]), name)
        })
    }

    /// binary search for a named value; `Err` carries the insertion point
    pub fn find_value(&self, name: &[u16]) -> std::result::Result<usize, usize> {
        self.values.binary_search_by(|v| wstr::cmp_i(&v.name, name))
    }
}

/// Counts and maxima reported for a key. Name and class maxima are code-unit
/// lengths; the data maximum is a byte length.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct KeyInfo {
    pub subkeys: usize,
    pub max_subkey: usize,
    pub max_class: usize,
    pub values: usize,
    pub max_value: usize,
    pub max_data: usize,
    pub modif: i64,
    pub class: Option<WString>,
}

// Capacity policy for the subkey and value arrays: grow by half when full
// (first allocation gets the floor), shrink by a third once less than half
// the slots are in use.

fn grow_for_insert<T>(v: &mut Vec<T>, min: usize) {
    if v.len() == v.capacity() {
        let target = if v.capacity() == 0 {
            min
        } else {
            v.capacity() + v.capacity() / 2
        };
        v.reserve_exact(target - v.len());
    }
}

fn shrink_after_remove<T>(v: &mut Vec<T>, min: usize) {
    let cap = v.capacity();
    if cap > min && v.len() < cap / 2 {
        v.shrink_to((cap - cap / 3).max(min));
    }
}

#[cfg(test)]
pub(crate) mod failpoint {
    //! Allocation failpoint so tests can exercise the unwind paths.
    use std::cell::Cell;

    thread_local! {
        /// number of allocations to allow before failing; `None` disables
        pub static REMAINING_ALLOCS: Cell<Option<u32>> = const { Cell::new(None) };
    }
}

fn alloc_check() -> Result<()> {
    #[cfg(test)]
    {
        let exhausted = failpoint::REMAINING_ALLOCS.with(|r| match r.get() {
            Some(0) => true,
            Some(n) => {
                r.set(Some(n - 1));
                false
            }
            None => false,
        });
        if exhausted {
            return Err(RegError::OutOfMemory);
        }
    }
    Ok(())
}

/// allocate a named child at the given insertion index
pub fn alloc_subkey(parent: &KeyRef, name: &[u16], index: usize, modif: i64, level: i32) -> Result<KeyRef> {
    alloc_check()?;
    let key = Key::new(Some(name), modif, level);
    key.borrow_mut().parent = Rc::downgrade(parent);
    let mut p = parent.borrow_mut();
    grow_for_insert(&mut p.subkeys, MIN_SUBKEYS);
    p.subkeys.insert(index, key.clone());
    drop(p);
    Ok(key)
}

/// remove the child at `index` from the tree, marking it deleted; the node
/// stays alive as long as handles still reference it
pub fn free_subkey(parent: &KeyRef, index: usize) {
    let key = {
        let mut p = parent.borrow_mut();
        let key = p.subkeys.remove(index);
        shrink_after_remove(&mut p.subkeys, MIN_SUBKEYS);
        key
    };
    let mut k = key.borrow_mut();
    k.flags |= KeyFlags::DELETED;
    k.parent = Weak::new();
}

/// update the modification time and bump the saving level
pub fn touch_key(key: &KeyRef, current_level: i32) {
    let mut k = key.borrow_mut();
    k.modif = util::now();
    k.level = k.level.max(current_level);
}

/// render the full path of a key for diagnostics
pub fn key_path(key: &KeyRef) -> String {
    let mut parts = Vec::new();
    let mut cur = key.clone();
    loop {
        let (name, parent) = {
            let k = cur.borrow();
            (k.name.clone(), k.parent.upgrade())
        };
        match (name, parent) {
            (Some(n), Some(p)) => {
                parts.push(wstr::to_string_lossy(&n));
                cur = p;
            }
            (Some(n), None) => {
                parts.push(wstr::to_string_lossy(&n));
                parts.push("?????".into());
                break;
            }
            (None, _) => {
                parts.push("<root>".into());
                break;
            }
        }
    }
    parts.reverse();
    parts.join("\\")
}

/// walk `path` down from `base` and return the terminal key; an empty path
/// returns the base itself
pub fn open_key(base: &KeyRef, path: &[u16]) -> Result<KeyRef> {
    let mut key = base.clone();
    for token in PathTokens::new(path) {
        let next = {
            let k = key.borrow();
            match k.find_subkey(token) {
                Ok(i) => k.subkeys[i].clone(),
                Err(_) => return Err(RegError::NotFound),
            }
        };
        key = next;
    }
    debug!(path = %key_path(&key), "open key");
    Ok(key)
}

/// walk `path` down from `base`, creating every missing component.
///
/// Returns the terminal key and whether anything was created. If a later
/// component fails to allocate, the first component that was created is
/// freed again, leaving the tree as it was before the call.
pub fn create_key(
    base: &KeyRef,
    path: &[u16],
    class: Option<&[u16]>,
    options: u32,
    modif: i64,
    current_level: i32,
) -> Result<(KeyRef, bool)> {
    if base.borrow().flags.contains(KeyFlags::DELETED) {
        return Err(RegError::KeyDeleted);
    }
    let mut flags = KeyFlags::empty();
    if options & REG_OPTION_VOLATILE != 0 {
        flags |= KeyFlags::VOLATILE;
    } else if base.borrow().flags.contains(KeyFlags::VOLATILE) {
        return Err(RegError::ChildMustBeVolatile);
    }

    let mut tokens = PathTokens::new(path);
    let mut key = base.clone();
    let (first_new, insert_at) = loop {
        let Some(token) = tokens.next() else {
            // the whole path already exists
            if let Some(class) = class {
                key.borrow_mut().class = Some(class.to_vec());
            }
            debug!(path = %key_path(&key), "create key (existing)");
            return Ok((key, false));
        };
        let found = {
            let k = key.borrow();
            match k.find_subkey(token) {
                Ok(i) => Ok(k.subkeys[i].clone()),
                Err(i) => Err(i),
            }
        };
        match found {
            Ok(child) => key = child,
            Err(i) => break (token, i),
        }
    };

    // volatility is transitive: no plain key may appear below a volatile one
    if !flags.contains(KeyFlags::VOLATILE) && key.borrow().flags.contains(KeyFlags::VOLATILE) {
        return Err(RegError::ChildMustBeVolatile);
    }

    // create the remaining components, unwinding on failure
    let anchor = key.clone();
    let mut cur = alloc_subkey(&anchor, first_new, insert_at, modif, current_level)?;
    cur.borrow_mut().flags |= flags;
    while let Some(token) = tokens.next() {
        // a freshly created key has no children, so the index is always 0
        match alloc_subkey(&cur, token, 0, modif, current_level) {
            Ok(k) => {
                k.borrow_mut().flags |= flags;
                cur = k;
            }
            Err(e) => {
                free_subkey(&anchor, insert_at);
                return Err(e);
            }
        }
    }
    if let Some(class) = class {
        cur.borrow_mut().class = Some(class.to_vec());
    }
    debug!(path = %key_path(&cur), "create key");
    Ok((cur, true))
}

/// delete the key at `path` below `base`, or `base` itself when the path is
/// empty; only leaf keys can go, and roots never do
pub fn delete_key(base: &KeyRef, path: &[u16], current_level: i32) -> Result<()> {
    let mut tokens = PathTokens::new(path);
    let (parent, index) = match tokens.next() {
        None => {
            let k = base.borrow();
            if k.flags.contains(KeyFlags::ROOT) {
                return Err(RegError::AccessDenied);
            }
            let parent = k.parent.upgrade().ok_or(RegError::KeyDeleted)?;
            if k.flags.contains(KeyFlags::DELETED) {
                return Err(RegError::KeyDeleted);
            }
            drop(k);
            let index = parent
                .borrow()
                .subkeys
                .iter()
                .position(|s| Rc::ptr_eq(s, base))
                .expect("key not in its parent's subkey array");
            (parent, index)
        }
        Some(first) => {
            if base.borrow().flags.contains(KeyFlags::DELETED) {
                return Err(RegError::KeyDeleted);
            }
            let mut parent = base.clone();
            let mut token = first;
            loop {
                let found = {
                    let p = parent.borrow();
                    p.find_subkey(token).ok().map(|i| (i, p.subkeys[i].clone()))
                };
                let (i, child) = found.ok_or(RegError::NotFound)?;
                match tokens.next() {
                    Some(t) => {
                        parent = child;
                        token = t;
                    }
                    None => break (parent, i),
                }
            }
        }
    };

    {
        let target = parent.borrow().subkeys[index].clone();
        let t = target.borrow();
        if t.flags.contains(KeyFlags::ROOT) || !t.subkeys.is_empty() {
            return Err(RegError::AccessDenied);
        }
        debug!(path = %key_path(&target), "delete key");
    }
    free_subkey(&parent, index);
    touch_key(&parent, current_level);
    Ok(())
}

/// report the child at `index`, in sort order
pub fn enum_key(parent: &KeyRef, index: usize) -> Result<(WString, Option<WString>, i64)> {
    let p = parent.borrow();
    let key = p.subkeys.get(index).ok_or(RegError::NoMoreItems)?;
    let k = key.borrow();
    debug!(path = %key_path(key), "enum key");
    Ok((k.name.clone().unwrap_or_default(), k.class.clone(), k.modif))
}

/// gather counts and maxima over every child and value of a key
pub fn query_key(key: &KeyRef) -> KeyInfo {
    let k = key.borrow();
    let mut info = KeyInfo {
        subkeys: k.subkeys.len(),
        values: k.values.len(),
        modif: k.modif,
        class: k.class.clone(),
        ..KeyInfo::default()
    };
    for sub in &k.subkeys {
        let s = sub.borrow();
        if let Some(name) = &s.name {
            info.max_subkey = info.max_subkey.max(name.len());
        }
        if let Some(class) = &s.class {
            info.max_class = info.max_class.max(class.len());
        }
    }
    for value in &k.values {
        info.max_value = info.max_value.max(value.name.len());
        info.max_data = info.max_data.max(value.data.len());
    }
    debug!(path = %key_path(key), "query key");
    info
}

/// insert a zero-initialized value, or return the index of an existing one
pub fn insert_value(key: &mut Key, name: &[u16]) -> usize {
    match key.find_value(name) {
        Ok(i) => i,
        Err(i) => {
            grow_for_insert(&mut key.values, MIN_VALUES);
            key.values.insert(
                i,
                KeyValue {
                    name: name.to_vec(),
                    ty: REG_NONE,
                    data: Vec::new(),
                },
            );
            i
        }
    }
}

/// store a value, replacing any previous data under the same name
pub fn set_value(key: &KeyRef, name: &[u16], ty: u32, data: &[u8], current_level: i32) {
    {
        let mut k = key.borrow_mut();
        let i = insert_value(&mut k, name);
        let value = &mut k.values[i];
        value.ty = ty;
        value.data = data.to_vec();
    }
    touch_key(key, current_level);
    debug!(path = %key_path(key), name = %wstr::to_string_lossy(name), "set value");
}

/// fetch a value's type and data by name
pub fn get_value(key: &KeyRef, name: &[u16]) -> Result<(u32, Vec<u8>)> {
    let k = key.borrow();
    match k.find_value(name) {
        Ok(i) => {
            let value = &k.values[i];
            debug!(path = %key_path(key), name = %wstr::to_string_lossy(name), "get value");
            Ok((value.ty, value.data.clone()))
        }
        Err(_) => Err(RegError::NotFound),
    }
}

/// report the value at `index`, in sort order
pub fn enum_value(key: &KeyRef, index: usize) -> Result<(WString, u32, Vec<u8>)> {
    let k = key.borrow();
    let value = k.values.get(index).ok_or(RegError::NoMoreItems)?;
    Ok((value.name.clone(), value.ty, value.data.clone()))
}

/// remove a value by name
pub fn delete_value(key: &KeyRef, name: &[u16], current_level: i32) -> Result<()> {
    {
        let mut k = key.borrow_mut();
        let i = k.find_value(name).map_err(|_| RegError::NotFound)?;
        k.values.remove(i);
        shrink_after_remove(&mut k.values, MIN_VALUES);
    }
    touch_key(key, current_level);
    debug!(path = %key_path(key), name = %wstr::to_string_lossy(name), "delete value");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wstr::from_str;
    use proptest::prelude::*;

    fn root() -> KeyRef {
        Key::new(None, 0, 0)
    }

    fn create(base: &KeyRef, path: &str) -> Result<(KeyRef, bool)> {
        create_key(base, &from_str(path), None, 0, 1, 0)
    }

    fn create_volatile(base: &KeyRef, path: &str) -> Result<(KeyRef, bool)> {
        create_key(base, &from_str(path), None, REG_OPTION_VOLATILE, 1, 0)
    }

    /// walk the whole tree checking the structural invariants
    fn check_invariants(key: &KeyRef) {
        let k = key.borrow();
        for pair in k.subkeys.windows(2) {
            let a = pair[0].borrow();
            let b = pair[1].borrow();
            assert_eq!(
                wstr::cmp_i(a.name.as_deref().unwrap(), b.name.as_deref().unwrap()),
                std::cmp::Ordering::Less,
                "subkeys out of order"
            );
        }
        for pair in k.values.windows(2) {
            assert_eq!(
                wstr::cmp_i(&pair[0].name, &pair[1].name),
                std::cmp::Ordering::Less,
                "values out of order"
            );
        }
        for (i, sub) in k.subkeys.iter().enumerate() {
            let s = sub.borrow();
            let parent = s.parent.upgrade().expect("child lost its parent edge");
            assert!(Rc::ptr_eq(&parent, key));
            assert_eq!(k.find_subkey(s.name.as_deref().unwrap()), Ok(i));
            if k.flags.contains(KeyFlags::VOLATILE) {
                assert!(s.flags.contains(KeyFlags::VOLATILE), "plain key under a volatile one");
            }
            drop(s);
            check_invariants(sub);
        }
    }

    #[test]
    fn create_then_open() {
        let r = root();
        let (key, created) = create(&r, "a\\b\\c").unwrap();
        assert!(created);
        assert!(Rc::ptr_eq(&key, &open_key(&r, &from_str("a\\b\\c")).unwrap()));
        assert_eq!(open_key(&r, &from_str("a\\b\\x")).unwrap_err(), RegError::NotFound);
        // an empty path opens the base itself
        assert!(Rc::ptr_eq(&r, &open_key(&r, &[]).unwrap()));
        check_invariants(&r);
    }

    #[test]
    fn create_existing_is_idempotent() {
        let r = root();
        let (first, created) = create(&r, "a\\b").unwrap();
        assert!(created);
        let subkeys_before = r.borrow().subkeys.len();
        let (again, created) = create(&r, "a\\b").unwrap();
        assert!(!created);
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(r.borrow().subkeys.len(), subkeys_before);
    }

    #[test]
    fn create_overwrites_class_on_existing_key() {
        let r = root();
        create_key(&r, &from_str("a"), Some(&from_str("old")), 0, 1, 0).unwrap();
        let (key, created) =
            create_key(&r, &from_str("a"), Some(&from_str("new")), 0, 1, 0).unwrap();
        assert!(!created);
        assert_eq!(key.borrow().class, Some(from_str("new")));
    }

    #[test]
    fn volatile_parent_rejects_plain_child() {
        let r = root();
        let (a, _) = create_volatile(&r, "a").unwrap();
        assert_eq!(create(&a, "b").unwrap_err(), RegError::ChildMustBeVolatile);
        assert_eq!(a.borrow().subkeys.len(), 0);
        // the same check applies when the volatile key is found mid-walk
        assert_eq!(create(&r, "a\\b").unwrap_err(), RegError::ChildMustBeVolatile);
        assert!(create_volatile(&a, "b").is_ok());
        check_invariants(&r);
    }

    #[test]
    fn create_under_deleted_key_fails() {
        let r = root();
        let (a, _) = create(&r, "a").unwrap();
        delete_key(&r, &from_str("a"), 0).unwrap();
        assert_eq!(create(&a, "b").unwrap_err(), RegError::KeyDeleted);
    }

    #[test]
    fn failed_create_unwinds_to_the_anchor() {
        let r = root();
        create(&r, "existing").unwrap();
        failpoint::REMAINING_ALLOCS.with(|c| c.set(Some(2)));
        let err = create(&r, "x\\y\\z").unwrap_err();
        failpoint::REMAINING_ALLOCS.with(|c| c.set(None));
        assert_eq!(err, RegError::OutOfMemory);
        assert_eq!(open_key(&r, &from_str("x")).unwrap_err(), RegError::NotFound);
        assert_eq!(r.borrow().subkeys.len(), 1);
        check_invariants(&r);
    }

    #[test]
    fn failed_create_below_existing_base_keeps_it() {
        let r = root();
        create(&r, "a").unwrap();
        failpoint::REMAINING_ALLOCS.with(|c| c.set(Some(1)));
        let err = create(&r, "a\\b\\c").unwrap_err();
        failpoint::REMAINING_ALLOCS.with(|c| c.set(None));
        assert_eq!(err, RegError::OutOfMemory);
        assert!(open_key(&r, &from_str("a")).is_ok());
        assert_eq!(open_key(&r, &from_str("a\\b")).unwrap_err(), RegError::NotFound);
        check_invariants(&r);
    }

    #[test]
    fn delete_requires_a_leaf() {
        let r = root();
        create(&r, "a\\b").unwrap();
        assert_eq!(delete_key(&r, &from_str("a"), 0), Err(RegError::AccessDenied));
        delete_key(&r, &from_str("a\\b"), 0).unwrap();
        delete_key(&r, &from_str("a"), 0).unwrap();
        assert_eq!(delete_key(&r, &from_str("a"), 0), Err(RegError::NotFound));
    }

    #[test]
    fn deleted_key_is_flagged_and_unreachable() {
        let r = root();
        let (b, _) = create(&r, "a\\b").unwrap();
        // a retained reference plays the part of an open handle
        delete_key(&b, &[], 0).unwrap();
        assert!(b.borrow().flags.contains(KeyFlags::DELETED));
        assert!(b.borrow().parent.upgrade().is_none());
        assert_eq!(open_key(&r, &from_str("a\\b")).unwrap_err(), RegError::NotFound);
        assert_eq!(delete_key(&b, &[], 0), Err(RegError::KeyDeleted));
    }

    #[test]
    fn root_keys_cannot_be_deleted() {
        let r = root();
        r.borrow_mut().flags |= KeyFlags::ROOT;
        assert_eq!(delete_key(&r, &[], 0), Err(RegError::AccessDenied));
    }

    #[test]
    fn enum_reports_children_in_sort_order() {
        let r = root();
        create(&r, "delta").unwrap();
        create(&r, "Alpha").unwrap();
        create(&r, "charlie").unwrap();
        let (name, _, _) = enum_key(&r, 0).unwrap();
        assert_eq!(name, from_str("Alpha"));
        let (name, _, _) = enum_key(&r, 2).unwrap();
        assert_eq!(name, from_str("delta"));
        assert_eq!(enum_key(&r, 3), Err(RegError::NoMoreItems));
    }

    #[test]
    fn value_roundtrip_and_delete() {
        let r = root();
        set_value(&r, &from_str("v"), REG_DWORD, &0xdead_beef_u32.to_le_bytes(), 0);
        assert_eq!(
            get_value(&r, &from_str("v")).unwrap(),
            (REG_DWORD, 0xdead_beef_u32.to_le_bytes().to_vec())
        );
        // same name, different case
        set_value(&r, &from_str("V"), REG_BINARY, &[1, 2], 0);
        assert_eq!(r.borrow().values.len(), 1);
        assert_eq!(get_value(&r, &from_str("v")).unwrap(), (REG_BINARY, vec![1, 2]));
        delete_value(&r, &from_str("v"), 0).unwrap();
        assert_eq!(get_value(&r, &from_str("v")), Err(RegError::NotFound));
        assert_eq!(delete_value(&r, &from_str("v"), 0), Err(RegError::NotFound));
    }

    #[test]
    fn enum_value_bounds() {
        let r = root();
        set_value(&r, &from_str("b"), REG_SZ, &[], 0);
        set_value(&r, &from_str("a"), REG_SZ, &[], 0);
        let (name, _, _) = enum_value(&r, 0).unwrap();
        assert_eq!(name, from_str("a"));
        assert_eq!(enum_value(&r, 2), Err(RegError::NoMoreItems));
    }

    #[test]
    fn query_key_counts_every_child() {
        let r = root();
        create(&r, "a").unwrap();
        let (last, _) = create(&r, "bbbb").unwrap();
        last.borrow_mut().class = Some(from_str("class"));
        set_value(&r, &from_str("x"), REG_BINARY, &[0; 7], 0);
        set_value(&r, &from_str("longest"), REG_BINARY, &[0; 3], 0);
        let info = query_key(&r);
        assert_eq!(info.subkeys, 2);
        // the maxima must include the last element of each array
        assert_eq!(info.max_subkey, 4);
        assert_eq!(info.max_class, 5);
        assert_eq!(info.values, 2);
        assert_eq!(info.max_value, 7);
        assert_eq!(info.max_data, 7);
    }

    #[test]
    fn touch_raises_level_and_modif() {
        let r = root();
        let (key, _) = create(&r, "a").unwrap();
        key.borrow_mut().modif = 0;
        touch_key(&key, 5);
        let k = key.borrow();
        assert!(k.modif > 0);
        assert_eq!(k.level, 5);
        drop(k);
        // a lower current level never lowers the key's level
        touch_key(&key, 1);
        assert_eq!(key.borrow().level, 5);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(String),
        CreateVolatile(String),
        Delete(String),
        Set(String),
        Unset(String),
    }

    fn arb_path() -> impl Strategy<Value = String> {
        proptest::collection::vec(proptest::sample::select(vec!["a", "b", "C", "d", "A"]), 1..4)
            .prop_map(|v| v.join("\\"))
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        let name = proptest::sample::select(vec!["v", "W", "x", "y", ""]);
        prop_oneof![
            arb_path().prop_map(Op::Create),
            arb_path().prop_map(Op::CreateVolatile),
            arb_path().prop_map(Op::Delete),
            name.clone().prop_map(|n| Op::Set(n.to_owned())),
            name.prop_map(|n| Op::Unset(n.to_owned())),
        ]
    }

    proptest! {
        #[test]
        fn invariants_survive_random_operations(ops in proptest::collection::vec(arb_op(), 1..60)) {
            let r = root();
            for op in ops {
                match op {
                    Op::Create(p) => { let _ = create(&r, &p); }
                    Op::CreateVolatile(p) => { let _ = create_volatile(&r, &p); }
                    Op::Delete(p) => { let _ = delete_key(&r, &from_str(&p), 0); }
                    Op::Set(n) => set_value(&r, &from_str(&n), REG_BINARY, &[0], 0),
                    Op::Unset(n) => { let _ = delete_value(&r, &from_str(&n), 0); }
                }
            }
            check_invariants(&r);
        }
    }
}
