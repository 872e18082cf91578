//! Transactional kernel: a thin abstraction over an embedded storage
//! engine with hierarchical named scopes.
//!
//! Every public payment-store operation runs inside exactly one transaction
//! obtained from a [`TxnBackend`]. Scopes form a tree (a scope path is a
//! sequence of byte-string names); each scope holds byte-keyed values, child
//! scopes and a 64-bit sequence counter. The traits are object-safe so that
//! backends can be swapped behind an `Arc<dyn TxnBackend>`.
//!
//! Two backends ship with the crate: [`memory::MemoryBackend`], the
//! copy-on-write reference implementation, and
//! [`sled_store::SledBackend`], the durable embedded implementation.

use std::sync::Arc;

use thiserror::Error;

pub mod batch;
pub mod memory;
pub mod sled_store;

pub use batch::{BatchOp, BatchableError, Batcher};

/// Errors surfaced by the storage kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The backend failed to read or write.
    #[error("store i/o error: {0}")]
    Io(String),

    /// The transaction lost a race against a concurrent writer and is safe
    /// to retry.
    #[error("store transaction conflict")]
    Conflict,
}

pub(crate) fn missing_scope(path: &[&[u8]]) -> KernelError {
    let joined: Vec<String> = path.iter().map(hex::encode).collect();
    KernelError::Io(format!("scope not found: [{}]", joined.join("/")))
}

/// A read-only transaction over the scope tree.
///
/// All reads within one transaction observe a single consistent snapshot.
pub trait ReadTxn {
    /// Returns the value stored under `key` in `scope`, or `None` when the
    /// key or any scope along the path is absent.
    fn get(&self, scope: &[&[u8]], key: &[u8]) -> Result<Option<Vec<u8>>, KernelError>;

    /// True when the scope exists.
    fn scope_exists(&self, scope: &[&[u8]]) -> Result<bool, KernelError>;

    /// Visits every entry of `scope`: values first with `Some(value)`, then
    /// direct child scope names with `None`, each group in key order. A
    /// missing scope yields no entries.
    fn for_each(
        &self,
        scope: &[&[u8]],
        f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
    ) -> Result<(), KernelError>;

    /// Ordered cursor over the values of `scope`, starting after
    /// `start_after` (exclusive; `None` means the first or, when `reverse`,
    /// the last entry). The callback returns `Ok(false)` to stop early.
    fn range(
        &self,
        scope: &[&[u8]],
        start_after: Option<&[u8]>,
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
    ) -> Result<(), KernelError>;

    /// Returns the sequence counter of `scope` (0 when unset or the scope is
    /// absent).
    fn sequence(&self, scope: &[&[u8]]) -> Result<u64, KernelError>;

    /// Hints the backend to preload the given scope paths. Purely advisory;
    /// the default implementation does nothing.
    fn prefetch(&self, _paths: &[&[&[u8]]]) {}
}

/// A read-write transaction. Dropping the transaction without calling
/// [`WriteTxn::commit`] rolls every staged change back.
pub trait WriteTxn: ReadTxn {
    /// Creates `scope` (and any missing ancestors). Idempotent.
    fn create_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError>;

    /// Stores `value` under `key`. The scope must exist.
    fn put(&mut self, scope: &[&[u8]], key: &[u8], value: &[u8]) -> Result<(), KernelError>;

    /// Removes `key` from `scope`. Removing an absent key is a no-op.
    fn delete(&mut self, scope: &[&[u8]], key: &[u8]) -> Result<(), KernelError>;

    /// Removes `scope` with everything beneath it. Removing an absent scope
    /// is a no-op.
    fn delete_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError>;

    /// Sets the sequence counter of `scope`. The scope must exist.
    fn set_sequence(&mut self, scope: &[&[u8]], sequence: u64) -> Result<(), KernelError>;

    /// Atomically applies all staged changes.
    fn commit(self: Box<Self>) -> Result<(), KernelError>;
}

/// A transactional storage backend.
pub trait TxnBackend: Send + Sync {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, KernelError>;

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, KernelError>;
}

/// Cheap handle around a shared backend offering closure-style transactions.
#[derive(Clone)]
pub struct Kernel {
    backend: Arc<dyn TxnBackend>,
}

impl Kernel {
    pub fn new(backend: Arc<dyn TxnBackend>) -> Self {
        Self { backend }
    }

    /// Runs `f` inside a read-only transaction.
    pub fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<KernelError>,
        F: FnOnce(&dyn ReadTxn) -> Result<T, E>,
    {
        let txn = self.backend.begin_read().map_err(E::from)?;
        f(txn.as_ref())
    }

    /// Runs `f` inside a read-write transaction and commits on success. Any
    /// error from `f` rolls the transaction back.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<KernelError>,
        F: FnOnce(&mut dyn WriteTxn) -> Result<T, E>,
    {
        let mut txn = self.backend.begin_write().map_err(E::from)?;
        let out = f(txn.as_mut())?;
        txn.commit().map_err(E::from)?;
        Ok(out)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBackend;
    use super::*;

    fn kernel() -> Kernel {
        Kernel::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_update_commits_and_view_reads() {
        let kernel = kernel();

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.create_scope(&[b"top"])?;
                txn.put(&[b"top"], b"k", b"v")
            })
            .unwrap();

        let value = kernel
            .view::<_, KernelError, _>(|txn| txn.get(&[b"top"], b"k"))
            .unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
    }

    #[test]
    fn test_update_rolls_back_on_error() {
        let kernel = kernel();

        kernel
            .update::<_, KernelError, _>(|txn| txn.create_scope(&[b"top"]))
            .unwrap();

        let res = kernel.update::<(), KernelError, _>(|txn| {
            txn.put(&[b"top"], b"k", b"v")?;
            Err(KernelError::Io("forced".into()))
        });
        assert!(res.is_err());

        let value = kernel
            .view::<_, KernelError, _>(|txn| txn.get(&[b"top"], b"k"))
            .unwrap();
        assert_eq!(value, None);
    }
}
