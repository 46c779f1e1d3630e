use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    Change, ChangeHub, ChangeListener, ChangeNotification, ChangeSource, ChangeTransport, Error,
    FieldPath, IndexFilter, Key, KeyExtractor, ListenerToken, Record, RecordStream, Result,
    ResyncListener, StoreCursor, StoreEngine,
};

/// Declaration of one object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    pub key_path: FieldPath,
    #[serde(default)]
    pub indexes: Vec<FieldPath>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<FieldPath>) -> Self {
        StoreSchema {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    pub fn index(mut self, path: impl Into<FieldPath>) -> Self {
        self.indexes.push(path.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new() -> Self {
        DatabaseSchema { stores: Vec::new() }
    }

    pub fn store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }
}

struct StoreData<R> {
    schema: StoreSchema,
    records: BTreeMap<Key, R>,
}

impl<R: Record> StoreData<R> {
    fn key_of(&self, record: &R) -> Result<Key> {
        record
            .lookup(&self.schema.key_path)
            .and_then(|value| Key::from_json(&value))
            .ok_or(Error::MissingKey)
    }

    fn check_index(&self, filter: &IndexFilter) -> Result<()> {
        if self.schema.indexes.contains(&filter.path) {
            Ok(())
        } else {
            Err(Error::UnknownIndex {
                store: self.schema.name.clone(),
                path: filter.path.to_string(),
            })
        }
    }

    fn matching<'a>(&'a self, filter: &'a IndexFilter) -> impl Iterator<Item = (&'a Key, &'a R)> + 'a {
        self.records
            .iter()
            .filter(move |(_, record)| filter.matches(*record))
    }
}

/// A write queued in a transaction.
#[derive(Debug, Clone)]
enum Operation<R> {
    Put(R),
    Delete(Key),
    Clear,
}

/// A batch of writes applied atomically on `commit`.
pub struct Transaction<'a, R: Record> {
    db: &'a MemoryDatabase<R>,
    operations: Vec<(String, Operation<R>)>,
}

impl<'a, R: Record> Transaction<'a, R> {
    pub fn put(mut self, store: &str, record: R) -> Self {
        self.operations.push((store.to_string(), Operation::Put(record)));
        self
    }

    pub fn delete(mut self, store: &str, key: impl Into<Key>) -> Self {
        self.operations.push((store.to_string(), Operation::Delete(key.into())));
        self
    }

    pub fn clear(mut self, store: &str) -> Self {
        self.operations.push((store.to_string(), Operation::Clear));
        self
    }

    pub fn commit(self) -> Result<()> {
        self.db.commit(self.operations)
    }
}

/// Transactional in-memory object store.
///
/// Records are kept in key order per store. Each commit is announced to
/// listeners as one `ChangeNotification` per touched store and, when a
/// transport is attached, published to other instances.
pub struct MemoryDatabase<R> {
    stores: RwLock<AHashMap<String, StoreData<R>>>,
    hub: Arc<ChangeHub<R>>,
    transport: RwLock<Option<Arc<dyn ChangeTransport<R>>>>,
}

impl<R: Record> MemoryDatabase<R> {
    pub fn open(schema: DatabaseSchema) -> Self {
        let stores = schema
            .stores
            .into_iter()
            .map(|schema| {
                (
                    schema.name.clone(),
                    StoreData {
                        schema,
                        records: BTreeMap::new(),
                    },
                )
            })
            .collect();

        MemoryDatabase {
            stores: RwLock::new(stores),
            hub: Arc::new(ChangeHub::new()),
            transport: RwLock::new(None),
        }
    }

    /// The hub local listeners are registered on. Remote batches replayed
    /// into it reach those listeners without being published again.
    pub fn hub(&self) -> Arc<ChangeHub<R>> {
        self.hub.clone()
    }

    pub fn attach_transport(&self, transport: Arc<dyn ChangeTransport<R>>) {
        *self.transport.write() = Some(transport);
    }

    pub fn detach_transport(&self) {
        *self.transport.write() = None;
    }

    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn transaction(&self) -> Transaction<'_, R> {
        Transaction {
            db: self,
            operations: Vec::new(),
        }
    }

    pub fn put(&self, store: &str, record: R) -> Result<()> {
        self.transaction().put(store, record).commit()
    }

    pub fn put_all(&self, store: &str, records: impl IntoIterator<Item = R>) -> Result<()> {
        records
            .into_iter()
            .fold(self.transaction(), |tx, record| tx.put(store, record))
            .commit()
    }

    pub fn delete(&self, store: &str, key: impl Into<Key>) -> Result<()> {
        self.transaction().delete(store, key).commit()
    }

    pub fn clear(&self, store: &str) -> Result<()> {
        self.transaction().clear(store).commit()
    }

    fn commit(&self, operations: Vec<(String, Operation<R>)>) -> Result<()> {
        let notifications = {
            let mut stores = self.stores.write();

            // Validate everything first so a failing transaction writes nothing.
            for (name, operation) in &operations {
                let data = stores
                    .get(name)
                    .ok_or_else(|| Error::UnknownStore(name.clone()))?;
                if let Operation::Put(record) = operation {
                    data.key_of(record)?;
                }
            }

            let mut notifications: Vec<ChangeNotification<R>> = Vec::new();
            for (name, operation) in operations {
                let data = stores
                    .get_mut(&name)
                    .ok_or_else(|| Error::UnknownStore(name.clone()))?;

                let change = match operation {
                    Operation::Put(record) => {
                        let key = data.key_of(&record)?;
                        match data.records.insert(key, record.clone()) {
                            Some(_) => Change::Updated(record),
                            None => Change::Created(record),
                        }
                    }
                    Operation::Delete(key) => {
                        data.records.remove(&key);
                        Change::Deleted(key)
                    }
                    Operation::Clear => {
                        data.records.clear();
                        Change::Cleared
                    }
                };

                match notifications.iter_mut().find(|n| n.store == name) {
                    Some(notification) => notification.push(change),
                    None => notifications.push(ChangeNotification::with_changes(name, [change])),
                }
            }

            notifications
        };

        // The data is committed at this point; every batch is still delivered
        // and the first delivery failure is reported.
        let transport = self.transport.read().clone();
        let mut first_error = None;
        for notification in &notifications {
            log::trace!(
                "Committed {} change(s) to store {}",
                notification.changes.len(),
                notification.store
            );
            if let Err(e) = self.hub.emit(notification) {
                first_error.get_or_insert(e);
            }
            if let Some(transport) = &transport {
                if let Err(e) = transport.publish(notification) {
                    log::error!("Failed to publish changes for store {}: {}", notification.store, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_store<T>(&self, store: &str, f: impl FnOnce(&StoreData<R>) -> Result<T>) -> Result<T> {
        let stores = self.stores.read();
        let data = stores
            .get(store)
            .ok_or_else(|| Error::UnknownStore(store.to_string()))?;
        f(data)
    }

    fn cursors(&self, store: &str, filter: Option<&IndexFilter>) -> Result<Vec<StoreCursor<R>>> {
        self.read_store(store, |data| {
            let cursor = |(key, record): (&Key, &R)| StoreCursor {
                key: key.clone(),
                record: record.clone(),
            };
            match filter {
                Some(filter) => {
                    data.check_index(filter)?;
                    Ok(data.matching(filter).map(cursor).collect())
                }
                None => Ok(data.records.iter().map(cursor).collect()),
            }
        })
    }

    fn stream(&self, store: &str, filter: Option<&IndexFilter>) -> RecordStream<R> {
        match self.cursors(store, filter) {
            Ok(cursors) => stream::iter(cursors.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

impl<R: Record> ChangeSource<R> for MemoryDatabase<R> {
    fn add_listener(&self, listener: ChangeListener<R>) -> ListenerToken {
        self.hub.add_listener(listener)
    }

    fn add_resync_listener(&self, listener: ResyncListener) -> ListenerToken {
        self.hub.add_resync_listener(listener)
    }

    fn remove_listener(&self, token: &ListenerToken) -> bool {
        self.hub.remove_listener(token)
    }
}

#[async_trait]
impl<R: Record> StoreEngine<R> for MemoryDatabase<R> {
    async fn get_all(&self, store: &str) -> Result<Vec<R>> {
        self.read_store(store, |data| Ok(data.records.values().cloned().collect()))
    }

    async fn get_index_all(&self, store: &str, filter: &IndexFilter) -> Result<Vec<R>> {
        self.read_store(store, |data| {
            data.check_index(filter)?;
            Ok(data.matching(filter).map(|(_, record)| record.clone()).collect())
        })
    }

    fn iterate(&self, store: &str) -> RecordStream<R> {
        self.stream(store, None)
    }

    fn iterate_index(&self, store: &str, filter: &IndexFilter) -> RecordStream<R> {
        self.stream(store, Some(filter))
    }

    async fn get_count(&self, store: &str) -> Result<usize> {
        self.read_store(store, |data| Ok(data.records.len()))
    }

    async fn get_index_count(&self, store: &str, filter: &IndexFilter) -> Result<usize> {
        self.read_store(store, |data| {
            data.check_index(filter)?;
            Ok(data.matching(filter).count())
        })
    }

    async fn get(&self, store: &str, key: &Key) -> Result<Option<R>> {
        self.read_store(store, |data| Ok(data.records.get(key).cloned()))
    }

    fn key_extractor(&self, store: &str) -> Result<KeyExtractor<R>> {
        let key_path = self.read_store(store, |data| Ok(data.schema.key_path.clone()))?;
        Ok(Arc::new(move |record: &R| {
            record
                .lookup(&key_path)
                .and_then(|value| Key::from_json(&value))
        }))
    }
}
