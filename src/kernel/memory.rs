//! In-memory reference backend.
//!
//! The scope tree is a nested `BTreeMap` structure guarded by one `RwLock`.
//! Write transactions stage their changes on a private copy of the tree and
//! swap it in on commit, so a dropped transaction rolls back for free and
//! readers always observe a committed snapshot. Copying the tree per write
//! transaction keeps the implementation obviously correct; this backend is
//! meant for tests and small deployments, durable setups use
//! [`super::sled_store::SledBackend`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{missing_scope, KernelError, ReadTxn, TxnBackend, WriteTxn};

#[derive(Debug, Clone, Default)]
struct ScopeNode {
    values: BTreeMap<Vec<u8>, Vec<u8>>,
    children: BTreeMap<Vec<u8>, ScopeNode>,
    sequence: u64,
}

impl ScopeNode {
    fn descend(&self, path: &[&[u8]]) -> Option<&ScopeNode> {
        let mut node = self;
        for seg in path {
            node = node.children.get(*seg)?;
        }
        Some(node)
    }

    fn descend_mut(&mut self, path: &[&[u8]]) -> Option<&mut ScopeNode> {
        let mut node = self;
        for seg in path {
            node = node.children.get_mut(*seg)?;
        }
        Some(node)
    }

    fn descend_or_create(&mut self, path: &[&[u8]]) -> &mut ScopeNode {
        let mut node = self;
        for seg in path {
            node = node.children.entry(seg.to_vec()).or_default();
        }
        node
    }
}

fn poisoned(_: impl std::fmt::Debug) -> KernelError {
    KernelError::Io("backend lock poisoned".into())
}

fn node_get(root: &ScopeNode, scope: &[&[u8]], key: &[u8]) -> Option<Vec<u8>> {
    root.descend(scope).and_then(|n| n.values.get(key).cloned())
}

fn node_for_each(
    root: &ScopeNode,
    scope: &[&[u8]],
    f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
) -> Result<(), KernelError> {
    let Some(node) = root.descend(scope) else {
        return Ok(());
    };
    for (key, value) in &node.values {
        f(key, Some(value))?;
    }
    for name in node.children.keys() {
        f(name, None)?;
    }
    Ok(())
}

fn node_range(
    root: &ScopeNode,
    scope: &[&[u8]],
    start_after: Option<&[u8]>,
    reverse: bool,
    f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
) -> Result<(), KernelError> {
    let Some(node) = root.descend(scope) else {
        return Ok(());
    };

    let cursor = start_after.map(|k| k.to_vec());
    let bounds: (Bound<Vec<u8>>, Bound<Vec<u8>>) = if reverse {
        (
            Bound::Unbounded,
            cursor.map_or(Bound::Unbounded, Bound::Excluded),
        )
    } else {
        (
            cursor.map_or(Bound::Unbounded, Bound::Excluded),
            Bound::Unbounded,
        )
    };

    let selected = node.values.range::<Vec<u8>, _>(bounds);
    if reverse {
        for (key, value) in selected.rev() {
            if !f(key, value)? {
                break;
            }
        }
    } else {
        for (key, value) in selected {
            if !f(key, value)? {
                break;
            }
        }
    }
    Ok(())
}

/// Copy-on-write in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    root: RwLock<ScopeNode>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TxnBackend for MemoryBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, KernelError> {
        let root = self.root.read().map_err(poisoned)?;
        Ok(Box::new(MemoryReadTxn { root }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, KernelError> {
        let root = self.root.write().map_err(poisoned)?;
        let staged = root.clone();
        Ok(Box::new(MemoryWriteTxn { root, staged }))
    }
}

struct MemoryReadTxn<'a> {
    root: RwLockReadGuard<'a, ScopeNode>,
}

impl ReadTxn for MemoryReadTxn<'_> {
    fn get(&self, scope: &[&[u8]], key: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        Ok(node_get(&self.root, scope, key))
    }

    fn scope_exists(&self, scope: &[&[u8]]) -> Result<bool, KernelError> {
        Ok(self.root.descend(scope).is_some())
    }

    fn for_each(
        &self,
        scope: &[&[u8]],
        f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        node_for_each(&self.root, scope, f)
    }

    fn range(
        &self,
        scope: &[&[u8]],
        start_after: Option<&[u8]>,
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
    ) -> Result<(), KernelError> {
        node_range(&self.root, scope, start_after, reverse, f)
    }

    fn sequence(&self, scope: &[&[u8]]) -> Result<u64, KernelError> {
        Ok(self.root.descend(scope).map_or(0, |n| n.sequence))
    }
}

struct MemoryWriteTxn<'a> {
    root: RwLockWriteGuard<'a, ScopeNode>,
    staged: ScopeNode,
}

impl ReadTxn for MemoryWriteTxn<'_> {
    fn get(&self, scope: &[&[u8]], key: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        Ok(node_get(&self.staged, scope, key))
    }

    fn scope_exists(&self, scope: &[&[u8]]) -> Result<bool, KernelError> {
        Ok(self.staged.descend(scope).is_some())
    }

    fn for_each(
        &self,
        scope: &[&[u8]],
        f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        node_for_each(&self.staged, scope, f)
    }

    fn range(
        &self,
        scope: &[&[u8]],
        start_after: Option<&[u8]>,
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
    ) -> Result<(), KernelError> {
        node_range(&self.staged, scope, start_after, reverse, f)
    }

    fn sequence(&self, scope: &[&[u8]]) -> Result<u64, KernelError> {
        Ok(self.staged.descend(scope).map_or(0, |n| n.sequence))
    }
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn create_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError> {
        self.staged.descend_or_create(scope);
        Ok(())
    }

    fn put(&mut self, scope: &[&[u8]], key: &[u8], value: &[u8]) -> Result<(), KernelError> {
        let node = self
            .staged
            .descend_mut(scope)
            .ok_or_else(|| missing_scope(scope))?;
        node.values.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, scope: &[&[u8]], key: &[u8]) -> Result<(), KernelError> {
        if let Some(node) = self.staged.descend_mut(scope) {
            node.values.remove(key);
        }
        Ok(())
    }

    fn delete_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError> {
        let Some((last, parent_path)) = scope.split_last() else {
            return Ok(());
        };
        if let Some(parent) = self.staged.descend_mut(parent_path) {
            parent.children.remove(*last);
        }
        Ok(())
    }

    fn set_sequence(&mut self, scope: &[&[u8]], sequence: u64) -> Result<(), KernelError> {
        let node = self
            .staged
            .descend_mut(scope)
            .ok_or_else(|| missing_scope(scope))?;
        node.sequence = sequence;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), KernelError> {
        *self.root = std::mem::take(&mut self.staged);
        Ok(())
    }
}
