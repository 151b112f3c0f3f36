use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::datastore::DataStore;
use crate::error::StoreError;
use crate::item::{DueItem, NewDueItem, Snapshot, sort_snapshot};

/// Write and observe access to the due-item table.
pub trait ItemStore {
    fn insert(&self, item: NewDueItem) -> Result<DueItem, StoreError>;

    fn update(&self, item: &DueItem) -> Result<(), StoreError>;

    /// Deleting an id that is not present is not an error.
    fn delete(&self, item: &DueItem) -> Result<(), StoreError>;

    /// Sends the current snapshot right away, then one after every
    /// successful mutation.
    fn observe_all(&self) -> Receiver<Snapshot>;
}

impl<T: ItemStore + ?Sized> ItemStore for &T {
    fn insert(&self, item: NewDueItem) -> Result<DueItem, StoreError> {
        (**self).insert(item)
    }

    fn update(&self, item: &DueItem) -> Result<(), StoreError> {
        (**self).update(item)
    }

    fn delete(&self, item: &DueItem) -> Result<(), StoreError> {
        (**self).delete(item)
    }

    fn observe_all(&self) -> Receiver<Snapshot> {
        (**self).observe_all()
    }
}

struct Inner {
    store: DataStore,
    items: Snapshot,
    last_id: u64,
    observers: Vec<Sender<Snapshot>>,
}

impl Inner {
    fn emit(&mut self) {
        let before = self.observers.len();
        let items = &self.items;
        self.observers
            .retain(|observer| observer.send(items.clone()).is_ok());
        debug!(
            observers = self.observers.len(),
            dropped = before - self.observers.len(),
            rows = self.items.len(),
            "emitted snapshot"
        );
    }
}

pub struct Gateway {
    inner: Mutex<Inner>,
}

impl Gateway {
    pub fn new(store: DataStore) -> Result<Self, StoreError> {
        let items = store.load_items()?;
        let stored_last = store.load_last_id()?;
        let max_row = items.iter().map(|item| item.id).max().unwrap_or(0);
        let last_id = stored_last.max(max_row);

        info!(rows = items.len(), last_id, "gateway ready");
        Ok(Self {
            inner: Mutex::new(Inner {
                store,
                items,
                last_id,
                observers: Vec::new(),
            }),
        })
    }

    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Self::new(DataStore::open(data_dir)?)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().items.clone()
    }

    /// Runs `f` against the underlying files, under the write lock.
    pub fn with_store<T>(&self, f: impl FnOnce(&DataStore) -> T) -> T {
        let inner = self.inner.lock();
        f(&inner.store)
    }
}

impl ItemStore for Gateway {
    #[instrument(skip(self, item), fields(name = %item.name, due = %item.due_date))]
    fn insert(&self, item: NewDueItem) -> Result<DueItem, StoreError> {
        let mut inner = self.inner.lock();
        let id = inner.last_id + 1;
        let item = item.with_id(id);

        let mut next = inner.items.clone();
        next.push(item.clone());
        sort_snapshot(&mut next);

        // Burn the id first so a failed row write leaves a gap, not a reuse.
        inner.store.save_last_id(id)?;
        inner.last_id = id;
        inner.store.save_items(&next)?;
        inner.items = next;

        info!(id, "inserted item");
        inner.emit();
        Ok(item)
    }

    #[instrument(skip(self, item), fields(id = item.id))]
    fn update(&self, item: &DueItem) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let mut next = inner.items.clone();
        let row = next
            .iter_mut()
            .find(|row| row.id == item.id)
            .ok_or(StoreError::NotFound(item.id))?;
        *row = item.clone();
        sort_snapshot(&mut next);

        inner.store.save_items(&next)?;
        inner.items = next;

        info!("updated item");
        inner.emit();
        Ok(())
    }

    #[instrument(skip(self, item), fields(id = item.id))]
    fn delete(&self, item: &DueItem) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.items.iter().any(|row| row.id == item.id) {
            debug!("item already absent; nothing to delete");
            return Ok(());
        }

        let next: Snapshot = inner
            .items
            .iter()
            .filter(|row| row.id != item.id)
            .cloned()
            .collect();

        inner.store.save_items(&next)?;
        inner.items = next;

        info!("deleted item");
        inner.emit();
        Ok(())
    }

    fn observe_all(&self) -> Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock();
        if tx.send(inner.items.clone()).is_ok() {
            inner.observers.push(tx);
        }
        debug!(observers = inner.observers.len(), "registered observer");
        rx
    }
}
