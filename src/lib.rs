//! An in-memory hierarchical configuration store: a tree of named keys
//! carrying ordered values, addressed by backslash-separated paths and
//! driven through opaque key handles.
//!
//! The crate covers the tree model and its path operations, the root-key
//! table, text import/export in two formats, and the per-opcode request
//! dispatcher. Object/handle management and the transport that delivers
//! requests stay outside; [`handle::HandleManager`] is the seam they plug
//! into.

pub mod dispatch;
pub mod error;
pub mod handle;
pub mod registry;
pub mod textfile;
pub mod tree;
pub mod util;
pub mod wstr;

pub use dispatch::Dispatcher;
pub use error::{RegError, Result};
pub use handle::{HandleManager, Hkey, ProcessHandles};
pub use registry::Registry;
pub use tree::{Key, KeyFlags, KeyRef, KeyValue};
