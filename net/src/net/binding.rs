//! Port bindings: which socket owns a `(type, port)` pair.
//!
//! Two storage strategies share the [`BindingTable`] interface and are picked
//! when the stack is built:
//!
//! - [`HashBindings`]: FNV-hashed open table, O(1) amortized lookup.
//! - [`ListBindings`]: packed array with a linear scan, the smallest footprint.
//!
//! Both keep at most one socket per key.

use heapless::{FnvIndexMap, Vec};

use super::config::{BINDING_TABLE_SIZE, MAX_SOCKETS};
use super::socket::{SockType, SocketId};
use super::types::{NetError, Port};

/// Binding key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindKey {
    pub ty: SockType,
    pub port: Port,
}

impl BindKey {
    #[inline]
    pub const fn new(ty: SockType, port: Port) -> Self {
        Self { ty, port }
    }
}

pub trait BindingTable {
    /// Socket bound to `(ty, port)`, if any.  `None` means no listener.
    fn lookup(&self, ty: SockType, port: Port) -> Option<SocketId>;

    /// Bind `sock` to `(ty, port)`.
    ///
    /// Fails with [`NetError::PortInUse`] if the key is taken and
    /// [`NetError::TableFull`] if the storage is exhausted.
    fn insert(&mut self, ty: SockType, port: Port, sock: SocketId) -> Result<(), NetError>;

    /// Remove the binding if it belongs to `sock`.  Returns `true` if removed.
    fn remove(&mut self, ty: SockType, port: Port, sock: SocketId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Hash table
// =============================================================================

#[derive(Debug, Default)]
pub struct HashBindings {
    map: FnvIndexMap<BindKey, SocketId, BINDING_TABLE_SIZE>,
}

impl HashBindings {
    pub fn new() -> Self {
        Self { map: FnvIndexMap::new() }
    }
}

impl BindingTable for HashBindings {
    fn lookup(&self, ty: SockType, port: Port) -> Option<SocketId> {
        self.map.get(&BindKey::new(ty, port)).copied()
    }

    fn insert(&mut self, ty: SockType, port: Port, sock: SocketId) -> Result<(), NetError> {
        let key = BindKey::new(ty, port);
        if self.map.contains_key(&key) {
            return Err(NetError::PortInUse);
        }
        self.map
            .insert(key, sock)
            .map(|_| ())
            .map_err(|_| NetError::TableFull)
    }

    fn remove(&mut self, ty: SockType, port: Port, sock: SocketId) -> bool {
        let key = BindKey::new(ty, port);
        if self.map.get(&key) != Some(&sock) {
            return false;
        }
        self.map.remove(&key).is_some()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

// =============================================================================
// Linear list
// =============================================================================

#[derive(Debug, Default)]
pub struct ListBindings {
    entries: Vec<(BindKey, SocketId), MAX_SOCKETS>,
}

impl ListBindings {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn position(&self, key: BindKey) -> Option<usize> {
        self.entries.iter().position(|(k, _)| *k == key)
    }
}

impl BindingTable for ListBindings {
    fn lookup(&self, ty: SockType, port: Port) -> Option<SocketId> {
        self.position(BindKey::new(ty, port)).map(|idx| self.entries[idx].1)
    }

    fn insert(&mut self, ty: SockType, port: Port, sock: SocketId) -> Result<(), NetError> {
        let key = BindKey::new(ty, port);
        if self.position(key).is_some() {
            return Err(NetError::PortInUse);
        }
        self.entries.push((key, sock)).map_err(|_| NetError::TableFull)
    }

    fn remove(&mut self, ty: SockType, port: Port, sock: SocketId) -> bool {
        match self.position(BindKey::new(ty, port)) {
            Some(idx) if self.entries[idx].1 == sock => {
                self.entries.swap_remove(idx);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
