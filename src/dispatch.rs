//! Request handlers: one entry point per opcode.
//!
//! Every handler resolves its hkey with the access mask the operation needs,
//! performs the tree or value operation, and returns a reply struct; the
//! transport writes that back into the wire request. References acquired
//! during a handler die with its scope on every exit path.

use std::io::{BufReader, BufWriter};

use crate::error::{RegError, Result};
use crate::handle::{
    HandleManager, Hkey, KEY_ALL_ACCESS, KEY_CREATE_SUB_KEY, KEY_ENUMERATE_SUB_KEYS,
    KEY_QUERY_VALUE, KEY_SET_VALUE, MAXIMUM_ALLOWED,
};
use crate::registry::Registry;
use crate::wstr::{self, WString, MAX_PATH};
use crate::{textfile, tree};

/// upper bound on value payloads passing through a single request
pub const REQUEST_DATA_MAX: usize = 0x10000;

#[derive(Debug)]
pub struct CreateKeyRequest {
    pub parent: Hkey,
    pub access: u32,
    pub options: u32,
    pub modif: i64,
    pub name: WString,
    pub class: Option<WString>,
}

#[derive(Debug)]
pub struct CreateKeyReply {
    pub hkey: Hkey,
    pub created: bool,
}

#[derive(Debug)]
pub struct OpenKeyRequest {
    pub parent: Hkey,
    pub access: u32,
    pub name: WString,
}

#[derive(Debug)]
pub struct OpenKeyReply {
    pub hkey: Hkey,
}

#[derive(Debug)]
pub struct DeleteKeyRequest {
    pub hkey: Hkey,
    pub name: WString,
}

#[derive(Debug)]
pub struct CloseKeyRequest {
    pub hkey: Hkey,
}

#[derive(Debug)]
pub struct EnumKeyRequest {
    pub hkey: Hkey,
    pub index: u32,
}

#[derive(Debug)]
pub struct EnumKeyReply {
    pub name: WString,
    pub class: WString,
    pub modif: i64,
}

#[derive(Debug)]
pub struct QueryKeyInfoRequest {
    pub hkey: Hkey,
}

#[derive(Debug)]
pub struct QueryKeyInfoReply {
    pub subkeys: u32,
    pub max_subkey: u32,
    pub max_class: u32,
    pub values: u32,
    pub max_value: u32,
    pub max_data: u32,
    pub modif: i64,
    pub class: WString,
}

#[derive(Debug)]
pub struct SetKeyValueRequest {
    pub hkey: Hkey,
    pub ty: u32,
    pub name: WString,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct GetKeyValueRequest {
    pub hkey: Hkey,
    pub name: WString,
}

#[derive(Debug)]
pub struct GetKeyValueReply {
    pub ty: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct EnumKeyValueRequest {
    pub hkey: Hkey,
    pub index: u32,
}

#[derive(Debug)]
pub struct EnumKeyValueReply {
    pub name: WString,
    pub ty: u32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct DeleteKeyValueRequest {
    pub hkey: Hkey,
    pub name: WString,
}

#[derive(Debug)]
pub struct LoadRegistryRequest {
    pub hkey: Hkey,
    pub file: u32,
}

#[derive(Debug)]
pub struct SaveRegistryRequest {
    pub hkey: Hkey,
    pub file: u32,
}

#[derive(Debug)]
pub struct SetRegistryLevelsRequest {
    pub current: i32,
    pub saving: i32,
}

/// Dispatches requests against a registry, resolving hkeys through the
/// process's handle manager.
pub struct Dispatcher<'a, H: HandleManager> {
    registry: &'a mut Registry,
    handles: &'a mut H,
}

fn handle_err(e: anyhow::Error) -> RegError {
    RegError::Handle(e.to_string())
}

impl<'a, H: HandleManager> Dispatcher<'a, H> {
    pub fn new(registry: &'a mut Registry, handles: &'a mut H) -> Self {
        Self { registry, handles }
    }

    fn effective_access(access: u32) -> u32 {
        if access & MAXIMUM_ALLOWED != 0 {
            KEY_ALL_ACCESS
        } else {
            access
        }
    }

    pub fn create_key(&mut self, req: &CreateKeyRequest) -> Result<CreateKeyReply> {
        let access = Self::effective_access(req.access);
        let parent = self
            .registry
            .resolve_hkey(self.handles, req.parent, KEY_CREATE_SUB_KEY)?;
        let name = wstr::bounded(&req.name, MAX_PATH);
        let class = req.class.as_ref().map(|c| wstr::req_dup(c));
        let (key, created) = tree::create_key(
            &parent,
            &name,
            class.as_deref(),
            req.options,
            req.modif,
            self.registry.current_level(),
        )?;
        let hkey = self.handles.alloc_handle(key, access).map_err(handle_err)?;
        Ok(CreateKeyReply { hkey, created })
    }

    pub fn open_key(&mut self, req: &OpenKeyRequest) -> Result<OpenKeyReply> {
        let access = Self::effective_access(req.access);
        let parent = self.registry.resolve_hkey(self.handles, req.parent, 0)?;
        let name = wstr::bounded(&req.name, MAX_PATH);
        let key = tree::open_key(&parent, &name)?;
        let hkey = self.handles.alloc_handle(key, access).map_err(handle_err)?;
        Ok(OpenKeyReply { hkey })
    }

    pub fn delete_key(&mut self, req: &DeleteKeyRequest) -> Result<()> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_CREATE_SUB_KEY)?;
        let name = wstr::bounded(&req.name, MAX_PATH);
        tree::delete_key(&key, &name, self.registry.current_level())
    }

    pub fn close_key(&mut self, req: &CloseKeyRequest) -> Result<()> {
        // closing a root hkey is silently ignored
        if !Registry::is_root_hkey(req.hkey) {
            self.handles.close_handle(req.hkey).map_err(handle_err)?;
        }
        Ok(())
    }

    pub fn enum_key(&mut self, req: &EnumKeyRequest) -> Result<EnumKeyReply> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_ENUMERATE_SUB_KEYS)?;
        let (name, class, modif) = tree::enum_key(&key, req.index as usize)?;
        Ok(EnumKeyReply {
            name,
            class: class.unwrap_or_default(),
            modif,
        })
    }

    pub fn query_key_info(&mut self, req: &QueryKeyInfoRequest) -> Result<QueryKeyInfoReply> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_QUERY_VALUE)?;
        let info = tree::query_key(&key);
        Ok(QueryKeyInfoReply {
            subkeys: info.subkeys as u32,
            max_subkey: info.max_subkey as u32,
            max_class: info.max_class as u32,
            values: info.values as u32,
            max_value: info.max_value as u32,
            max_data: info.max_data as u32,
            modif: info.modif,
            class: info.class.unwrap_or_default(),
        })
    }

    pub fn set_key_value(&mut self, req: &SetKeyValueRequest) -> Result<()> {
        if req.data.len() > REQUEST_DATA_MAX {
            return Err(RegError::OutOfMemory);
        }
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_SET_VALUE)?;
        let name = wstr::bounded(&req.name, MAX_PATH);
        tree::set_value(&key, &name, req.ty, &req.data, self.registry.current_level());
        Ok(())
    }

    pub fn get_key_value(&mut self, req: &GetKeyValueRequest) -> Result<GetKeyValueReply> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_QUERY_VALUE)?;
        let name = wstr::bounded(&req.name, MAX_PATH);
        let (ty, data) = tree::get_value(&key, &name)?;
        Ok(GetKeyValueReply { ty, data })
    }

    pub fn enum_key_value(&mut self, req: &EnumKeyValueRequest) -> Result<EnumKeyValueReply> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_QUERY_VALUE)?;
        let (name, ty, data) = tree::enum_value(&key, req.index as usize)?;
        Ok(EnumKeyValueReply { name, ty, data })
    }

    pub fn delete_key_value(&mut self, req: &DeleteKeyValueRequest) -> Result<()> {
        let key = self
            .registry
            .resolve_hkey(self.handles, req.hkey, KEY_SET_VALUE)?;
        let name = wstr::req_dup(&req.name);
        tree::delete_value(&key, &name, self.registry.current_level())
    }

    pub fn load_registry(&mut self, req: &LoadRegistryRequest) -> Result<()> {
        let key = self.registry.resolve_hkey(
            self.handles,
            req.hkey,
            KEY_SET_VALUE | KEY_CREATE_SUB_KEY,
        )?;
        let file = self
            .handles
            .open_read(req.file)
            .map_err(|e| RegError::File(e.to_string()))?;
        textfile::load_keys(self.registry, &key, BufReader::new(file))
    }

    pub fn save_registry(&mut self, req: &SaveRegistryRequest) -> Result<()> {
        let key = self.registry.resolve_hkey(
            self.handles,
            req.hkey,
            KEY_QUERY_VALUE | KEY_ENUMERATE_SUB_KEYS,
        )?;
        let file = self
            .handles
            .open_write(req.file)
            .map_err(|e| RegError::File(e.to_string()))?;
        textfile::save_registry(self.registry, &key, BufWriter::new(file))
    }

    pub fn set_registry_levels(&mut self, req: &SetRegistryLevelsRequest) {
        self.registry.set_levels(req.current, req.saving);
    }
}
