use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::data::connector::{Callback, ChangeConnector, Epoch, ExternalStore};
use crate::data::store_trait::collect_matching;
use crate::{
    Change, ChangeNotification, CollectionData, ListenerToken, OrderedCollection, Record, Result,
    StoreEngine, ViewOptions,
};

struct SliceShared<R: Record> {
    options: ViewOptions<R>,
    engine: Arc<dyn StoreEngine<R>>,
    connector: ChangeConnector<R>,
    collection: Mutex<OrderedCollection<R>>,
}

impl<R: Record> SliceShared<R> {
    async fn fetch(&self) -> Result<Vec<R>> {
        let store = self.options.store.as_str();
        match (&self.options.index, &self.options.filter) {
            (Some(index), None) => self.engine.get_index_all(store, index).await,
            (Some(index), Some(filter)) => collect_matching(self.engine.iterate_index(store, index), filter).await,
            (None, None) => self.engine.get_all(store).await,
            (None, Some(filter)) => collect_matching(self.engine.iterate(store), filter).await,
        }
    }

    async fn populate(self: Arc<Self>, epoch: Epoch) -> Result<()> {
        let records = self.fetch().await?;

        if !self.connector.is_current(epoch) {
            log::debug!("Discarding stale population of slice over {}", self.options.store);
            return Ok(());
        }

        log::debug!("Populated slice over {} with {} record(s)", self.options.store, records.len());
        self.collection.lock().reset(records)?;
        self.connector.dispatch_changed();
        Ok(())
    }

    /// Fold one batch into the collection, recording in `changed` whether
    /// anything visible moved. Changes before a failing one stay applied.
    fn reconcile(&self, notification: &ChangeNotification<R>, changed: &mut bool) -> Result<()> {
        let mut collection = self.collection.lock();

        for change in &notification.changes {
            *changed |= match change {
                Change::Created(record) | Change::Updated(record) => {
                    if self.options.includes(record) {
                        collection.add(record.clone())?;
                        true
                    } else {
                        let key = collection.key_of(record)?;
                        collection.remove(&key)?
                    }
                }
                Change::Deleted(key) => collection.remove(key)?,
                Change::Cleared => collection.clear(),
            };
        }

        Ok(())
    }

    fn on_change(&self, notification: &ChangeNotification<R>) -> Result<()> {
        if notification.store != self.options.store {
            return Ok(());
        }

        log::trace!(
            "Slice over {} reconciling {} change(s)",
            self.options.store,
            notification.changes.len()
        );
        let mut changed = false;
        let result = self.reconcile(notification, &mut changed);
        if changed {
            self.connector.dispatch_changed();
        }
        result
    }
}

/// A live, sorted view of the records of one store that pass the view's
/// index filter and predicate.
///
/// `setup()` loads the matching records and starts following the store's
/// change feed; every change batch that alters the visible contents fires
/// subscribers once.
pub struct Slice<R: Record> {
    shared: Arc<SliceShared<R>>,
}

impl<R: Record> Clone for Slice<R> {
    fn clone(&self) -> Self {
        Slice {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Record> Slice<R> {
    pub fn new<E>(engine: Arc<E>, options: ViewOptions<R>) -> Result<Self>
    where
        E: StoreEngine<R> + 'static,
    {
        let key_of = engine.key_extractor(&options.store)?;
        let collection = OrderedCollection::new(key_of, options.comparer());

        Ok(Slice {
            shared: Arc::new(SliceShared {
                connector: ChangeConnector::new(engine.clone()),
                engine,
                options,
                collection: Mutex::new(collection),
            }),
        })
    }

    pub fn options(&self) -> &ViewOptions<R> {
        &self.shared.options
    }

    /// Start following the store. Calls made before `teardown()` share the
    /// first call's outcome.
    pub async fn setup(&self) -> Result<()> {
        let weak: Weak<SliceShared<R>> = Arc::downgrade(&self.shared);
        let listener = Arc::new(move |notification: &ChangeNotification<R>| match weak.upgrade() {
            Some(shared) => shared.on_change(notification),
            None => Ok(()),
        });

        let shared = self.shared.clone();
        let ready = self
            .shared
            .connector
            .setup(move |epoch| shared.clone().populate(epoch), listener);
        ready.await
    }

    pub fn teardown(&self) {
        self.shared.connector.teardown();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connector.is_connected()
    }
}

impl<R: Record> ExternalStore for Slice<R> {
    type Snapshot = Arc<CollectionData<R>>;

    fn subscribe(&self, callback: Callback) -> ListenerToken {
        self.shared.connector.subscribe(callback)
    }

    fn unsubscribe(&self, token: &ListenerToken) -> bool {
        self.shared.connector.unsubscribe(token)
    }

    fn get_snapshot(&self) -> Self::Snapshot {
        self.shared.collection.lock().to_data()
    }
}
