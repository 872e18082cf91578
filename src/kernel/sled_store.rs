//! Durable backend over an embedded [`sled`] tree.
//!
//! The hierarchical scope model is flattened into a single sled tree with a
//! typed key encoding: each scope path segment is written as
//! `0x01 ∥ len(u16 be) ∥ segment`, followed by one record-type byte:
//! `0x00` for the scope marker, `0x02 ∥ len ∥ key` for a value,
//! `0x03` for the sequence counter.
//!
//! Within one scope, values order by `(key length, key bytes)` rather than
//! by plain key bytes. The payment store only relies on ordering for
//! fixed-width keys (the 8-byte sequence index), where both orders agree.
//!
//! Isolation is a coarse reader-writer lock: readers share a snapshot
//! because writers are exclusive, and a write transaction stages every
//! change in an overlay that is applied atomically with [`sled::Batch`] on
//! commit. Scope names and keys are limited to 64 KiB by the encoding.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{missing_scope, KernelError, ReadTxn, TxnBackend, WriteTxn};

const TAG_SCOPE: u8 = 0x01;
const TAG_VALUE: u8 = 0x02;
const TAG_SEQUENCE: u8 = 0x03;
const MARK_SCOPE: u8 = 0x00;

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

fn io_err(e: sled::Error) -> KernelError {
    KernelError::Io(e.to_string())
}

fn lock_err(_: impl std::fmt::Debug) -> KernelError {
    KernelError::Io("backend lock poisoned".into())
}

fn push_segment(buf: &mut Vec<u8>, tag: u8, segment: &[u8]) {
    debug_assert!(segment.len() <= u16::MAX as usize);
    buf.push(tag);
    buf.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    buf.extend_from_slice(segment);
}

fn scope_prefix(scope: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    for segment in scope {
        push_segment(&mut buf, TAG_SCOPE, segment);
    }
    buf
}

fn marker_key(scope: &[&[u8]]) -> Vec<u8> {
    let mut key = scope_prefix(scope);
    key.push(MARK_SCOPE);
    key
}

fn value_key(scope: &[&[u8]], key: &[u8]) -> Vec<u8> {
    let mut out = scope_prefix(scope);
    push_segment(&mut out, TAG_VALUE, key);
    out
}

fn sequence_key(scope: &[&[u8]]) -> Vec<u8> {
    let mut key = scope_prefix(scope);
    key.push(TAG_SEQUENCE);
    key
}

/// Parses `len(u16) ∥ key` and returns the key if the suffix is exactly one
/// length-prefixed segment.
fn parse_value_suffix(suffix: &[u8]) -> Option<&[u8]> {
    if suffix.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([suffix[0], suffix[1]]) as usize;
    if suffix.len() == 2 + len {
        Some(&suffix[2..])
    } else {
        None
    }
}

/// Parses `len(u16) ∥ name ∥ 0x00` and returns the name of a direct child
/// scope marker.
fn parse_child_marker(suffix: &[u8]) -> Option<&[u8]> {
    if suffix.len() < 3 {
        return None;
    }
    let len = u16::from_be_bytes([suffix[0], suffix[1]]) as usize;
    if suffix.len() == 2 + len + 1 && suffix[2 + len] == MARK_SCOPE {
        Some(&suffix[2..2 + len])
    } else {
        None
    }
}

fn overlay_get(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    encoded_key: &[u8],
) -> Result<Option<Vec<u8>>, KernelError> {
    if let Some(staged) = staged {
        if let Some(entry) = staged.get(encoded_key) {
            return Ok(entry.clone());
        }
    }
    Ok(tree.get(encoded_key).map_err(io_err)?.map(|v| v.to_vec()))
}

/// Materializes the direct values of a scope, overlay applied.
///
/// TODO: merge the staged overlay with `Tree::range` iterators instead of
/// materializing the whole scope; only matters for very large indexes.
fn collect_scope_values(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, KernelError> {
    let mut prefix = scope_prefix(scope);
    prefix.push(TAG_VALUE);

    let mut out = BTreeMap::new();
    for item in tree.scan_prefix(&prefix) {
        let (key, value) = item.map_err(io_err)?;
        if let Some(plain) = parse_value_suffix(&key[prefix.len()..]) {
            out.insert(plain.to_vec(), value.to_vec());
        }
    }

    if let Some(staged) = staged {
        for (encoded, entry) in staged.range(prefix.clone()..) {
            if !encoded.starts_with(&prefix) {
                break;
            }
            let Some(plain) = parse_value_suffix(&encoded[prefix.len()..]) else {
                continue;
            };
            match entry {
                Some(value) => {
                    out.insert(plain.to_vec(), value.clone());
                }
                None => {
                    out.remove(plain);
                }
            }
        }
    }

    Ok(out)
}

/// Names of the direct child scopes, overlay applied.
fn collect_child_scopes(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
) -> Result<Vec<Vec<u8>>, KernelError> {
    let mut prefix = scope_prefix(scope);
    prefix.push(TAG_SCOPE);

    let mut present: BTreeMap<Vec<u8>, bool> = BTreeMap::new();
    for item in tree.scan_prefix(&prefix) {
        let (key, _) = item.map_err(io_err)?;
        if let Some(name) = parse_child_marker(&key[prefix.len()..]) {
            present.insert(name.to_vec(), true);
        }
    }

    if let Some(staged) = staged {
        for (encoded, entry) in staged.range(prefix.clone()..) {
            if !encoded.starts_with(&prefix) {
                break;
            }
            if let Some(name) = parse_child_marker(&encoded[prefix.len()..]) {
                present.insert(name.to_vec(), entry.is_some());
            }
        }
    }

    Ok(present
        .into_iter()
        .filter_map(|(name, alive)| alive.then_some(name))
        .collect())
}

fn scope_exists_inner(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
) -> Result<bool, KernelError> {
    if scope.is_empty() {
        return Ok(true);
    }
    Ok(overlay_get(tree, staged, &marker_key(scope))?.is_some())
}

fn for_each_inner(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
    f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
) -> Result<(), KernelError> {
    for (key, value) in collect_scope_values(tree, staged, scope)? {
        f(&key, Some(&value))?;
    }
    for name in collect_child_scopes(tree, staged, scope)? {
        f(&name, None)?;
    }
    Ok(())
}

fn range_inner(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
    start_after: Option<&[u8]>,
    reverse: bool,
    f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
) -> Result<(), KernelError> {
    let values = collect_scope_values(tree, staged, scope)?;

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

    let selected = values.range::<Vec<u8>, _>(bounds);
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

fn sequence_inner(
    tree: &sled::Tree,
    staged: Option<&Overlay>,
    scope: &[&[u8]],
) -> Result<u64, KernelError> {
    match overlay_get(tree, staged, &sequence_key(scope))? {
        None => Ok(0),
        Some(raw) => {
            let bytes: [u8; 8] = raw
                .as_slice()
                .try_into()
                .map_err(|_| KernelError::Io("corrupt sequence record".into()))?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

/// Embedded durable backend.
pub struct SledBackend {
    db: sled::Db,
    tree: sled::Tree,
    lock: RwLock<()>,
}

impl SledBackend {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let db = sled::open(path).map_err(io_err)?;
        let tree = db.open_tree("payment-control").map_err(io_err)?;
        Ok(Self {
            db,
            tree,
            lock: RwLock::new(()),
        })
    }

    /// Forces outstanding writes to disk.
    pub fn flush(&self) -> Result<(), KernelError> {
        self.db.flush().map(|_| ()).map_err(io_err)
    }
}

impl std::fmt::Debug for SledBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBackend").finish_non_exhaustive()
    }
}

impl TxnBackend for SledBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadTxn + '_>, KernelError> {
        let guard = self.lock.read().map_err(lock_err)?;
        Ok(Box::new(SledReadTxn {
            tree: &self.tree,
            _guard: guard,
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTxn + '_>, KernelError> {
        let guard = self.lock.write().map_err(lock_err)?;
        Ok(Box::new(SledWriteTxn {
            tree: &self.tree,
            staged: Overlay::new(),
            _guard: guard,
        }))
    }
}

struct SledReadTxn<'a> {
    tree: &'a sled::Tree,
    _guard: RwLockReadGuard<'a, ()>,
}

impl ReadTxn for SledReadTxn<'_> {
    fn get(&self, scope: &[&[u8]], key: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        overlay_get(self.tree, None, &value_key(scope, key))
    }

    fn scope_exists(&self, scope: &[&[u8]]) -> Result<bool, KernelError> {
        scope_exists_inner(self.tree, None, scope)
    }

    fn for_each(
        &self,
        scope: &[&[u8]],
        f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        for_each_inner(self.tree, None, scope, f)
    }

    fn range(
        &self,
        scope: &[&[u8]],
        start_after: Option<&[u8]>,
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
    ) -> Result<(), KernelError> {
        range_inner(self.tree, None, scope, start_after, reverse, f)
    }

    fn sequence(&self, scope: &[&[u8]]) -> Result<u64, KernelError> {
        sequence_inner(self.tree, None, scope)
    }
}

struct SledWriteTxn<'a> {
    tree: &'a sled::Tree,
    staged: Overlay,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl ReadTxn for SledWriteTxn<'_> {
    fn get(&self, scope: &[&[u8]], key: &[u8]) -> Result<Option<Vec<u8>>, KernelError> {
        overlay_get(self.tree, Some(&self.staged), &value_key(scope, key))
    }

    fn scope_exists(&self, scope: &[&[u8]]) -> Result<bool, KernelError> {
        scope_exists_inner(self.tree, Some(&self.staged), scope)
    }

    fn for_each(
        &self,
        scope: &[&[u8]],
        f: &mut dyn FnMut(&[u8], Option<&[u8]>) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        for_each_inner(self.tree, Some(&self.staged), scope, f)
    }

    fn range(
        &self,
        scope: &[&[u8]],
        start_after: Option<&[u8]>,
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, KernelError>,
    ) -> Result<(), KernelError> {
        range_inner(self.tree, Some(&self.staged), scope, start_after, reverse, f)
    }

    fn sequence(&self, scope: &[&[u8]]) -> Result<u64, KernelError> {
        sequence_inner(self.tree, Some(&self.staged), scope)
    }
}

impl WriteTxn for SledWriteTxn<'_> {
    fn create_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError> {
        for depth in 1..=scope.len() {
            self.staged
                .insert(marker_key(&scope[..depth]), Some(Vec::new()));
        }
        Ok(())
    }

    fn put(&mut self, scope: &[&[u8]], key: &[u8], value: &[u8]) -> Result<(), KernelError> {
        if !self.scope_exists(scope)? {
            return Err(missing_scope(scope));
        }
        self.staged
            .insert(value_key(scope, key), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, scope: &[&[u8]], key: &[u8]) -> Result<(), KernelError> {
        self.staged.insert(value_key(scope, key), None);
        Ok(())
    }

    fn delete_scope(&mut self, scope: &[&[u8]]) -> Result<(), KernelError> {
        let prefix = scope_prefix(scope);

        for item in self.tree.scan_prefix(&prefix) {
            let (key, _) = item.map_err(io_err)?;
            self.staged.insert(key.to_vec(), None);
        }

        let staged_keys: Vec<Vec<u8>> = self
            .staged
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in staged_keys {
            self.staged.insert(key, None);
        }
        Ok(())
    }

    fn set_sequence(&mut self, scope: &[&[u8]], sequence: u64) -> Result<(), KernelError> {
        if !self.scope_exists(scope)? {
            return Err(missing_scope(scope));
        }
        self.staged
            .insert(sequence_key(scope), Some(sequence.to_be_bytes().to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), KernelError> {
        let mut batch = sled::Batch::default();
        for (key, entry) in self.staged.iter() {
            match entry {
                Some(value) => batch.insert(key.clone(), value.clone()),
                None => batch.remove(key.clone()),
            }
        }
        self.tree.apply_batch(batch).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use std::sync::Arc;

    fn open(dir: &tempfile::TempDir) -> Arc<SledBackend> {
        Arc::new(SledBackend::open(dir.path().join("db")).unwrap())
    }

    #[test]
    fn test_basic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        let kernel = Kernel::new(backend);

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.create_scope(&[b"payments", b"id-1"])?;
                txn.put(&[b"payments", b"id-1"], b"creation-info", b"blob")?;
                txn.set_sequence(&[b"payments"], 1000)
            })
            .unwrap();

        kernel
            .view::<_, KernelError, _>(|txn| {
                assert!(txn.scope_exists(&[b"payments", b"id-1"])?);
                assert_eq!(
                    txn.get(&[b"payments", b"id-1"], b"creation-info")?,
                    Some(b"blob".to_vec())
                );
                assert_eq!(txn.sequence(&[b"payments"])?, 1000);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_reads_within_write_txn_see_staged_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        let kernel = Kernel::new(backend);

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.create_scope(&[b"scope"])?;
                txn.put(&[b"scope"], b"k", b"v1")?;
                assert_eq!(txn.get(&[b"scope"], b"k")?, Some(b"v1".to_vec()));

                txn.delete(&[b"scope"], b"k")?;
                assert_eq!(txn.get(&[b"scope"], b"k")?, None);

                txn.put(&[b"scope"], b"k", b"v2")?;
                let mut seen = Vec::new();
                txn.for_each(&[b"scope"], &mut |key, value| {
                    seen.push((key.to_vec(), value.map(|v| v.to_vec())));
                    Ok(())
                })?;
                assert_eq!(seen, vec![(b"k".to_vec(), Some(b"v2".to_vec()))]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_scope_covers_tree_and_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        let kernel = Kernel::new(backend);

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.create_scope(&[b"a", b"b"])?;
                txn.put(&[b"a", b"b"], b"persisted", b"v")
            })
            .unwrap();

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.put(&[b"a", b"b"], b"staged", b"v")?;
                txn.delete_scope(&[b"a", b"b"])?;
                assert!(!txn.scope_exists(&[b"a", b"b"])?);
                assert_eq!(txn.get(&[b"a", b"b"], b"persisted")?, None);
                assert_eq!(txn.get(&[b"a", b"b"], b"staged")?, None);
                Ok(())
            })
            .unwrap();

        kernel
            .view::<_, KernelError, _>(|txn| {
                assert!(txn.scope_exists(&[b"a"])?);
                assert!(!txn.scope_exists(&[b"a", b"b"])?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_rollback_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);

        {
            let mut txn = backend.begin_write().unwrap();
            txn.create_scope(&[b"scope"]).unwrap();
            txn.put(&[b"scope"], b"k", b"v").unwrap();
            // dropped without commit
        }

        let txn = backend.begin_read().unwrap();
        assert!(!txn.scope_exists(&[b"scope"]).unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let backend = SledBackend::open(dir.path().join("db")).unwrap();
            let kernel = Kernel::new(Arc::new(backend));
            kernel
                .update::<_, KernelError, _>(|txn| {
                    txn.create_scope(&[b"payments"])?;
                    txn.put(&[b"payments"], b"k", b"v")?;
                    txn.set_sequence(&[b"payments"], 42)
                })
                .unwrap();
        }

        let backend = SledBackend::open(dir.path().join("db")).unwrap();
        let kernel = Kernel::new(Arc::new(backend));
        kernel
            .view::<_, KernelError, _>(|txn| {
                assert_eq!(txn.get(&[b"payments"], b"k")?, Some(b"v".to_vec()));
                assert_eq!(txn.sequence(&[b"payments"])?, 42);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_child_scope_listing_ignores_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open(&dir);
        let kernel = Kernel::new(backend);

        kernel
            .update::<_, KernelError, _>(|txn| {
                txn.create_scope(&[b"root", b"child-a", b"grandchild"])?;
                txn.create_scope(&[b"root", b"child-b"])?;
                txn.put(&[b"root"], b"value", b"v")
            })
            .unwrap();

        kernel
            .view::<_, KernelError, _>(|txn| {
                let mut children = Vec::new();
                let mut values = Vec::new();
                txn.for_each(&[b"root"], &mut |key, value| {
                    if value.is_none() {
                        children.push(key.to_vec());
                    } else {
                        values.push(key.to_vec());
                    }
                    Ok(())
                })?;
                assert_eq!(children, vec![b"child-a".to_vec(), b"child-b".to_vec()]);
                assert_eq!(values, vec![b"value".to_vec()]);
                Ok(())
            })
            .unwrap();
    }
}
