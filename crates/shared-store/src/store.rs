//! The store handle: snapshot-commit transactions and read access.

use crate::error::StoreError;
use crate::tables::Tables;
use crate::txn::Txn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Handle to the durable store. Cheap to clone; all clones share tables.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Tables>>,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` inside a transaction.
    ///
    /// The closure receives a [`Txn`] over a snapshot of all tables. When it
    /// returns `Ok`, the snapshot replaces the live tables atomically; on
    /// `Err` the snapshot is discarded and the live tables are untouched.
    ///
    /// The closure runs under the store lock and must not block on I/O.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut Txn<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.inner.lock();
        let mut snapshot = guard.clone();
        match f(&mut Txn { tables: &mut snapshot }) {
            Ok(value) => {
                *guard = snapshot;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Run a read-only closure against the live tables.
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.inner.lock();
        f(&guard)
    }

    /// Round-trip time of a trivial read. The health surface's "database
    /// ping".
    #[must_use]
    pub fn ping(&self) -> std::time::Duration {
        let start = Instant::now();
        let _ = self.read(Tables::outbox_len);
        start.elapsed()
    }
}
