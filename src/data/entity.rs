use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::data::connector::{Callback, ChangeConnector, Epoch, ExternalStore};
use crate::{Change, ChangeNotification, Key, KeyExtractor, ListenerToken, Record, Result, StoreEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Loading,
    NotFound,
    Found,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot<R> {
    pub status: EntityStatus,
    pub entity: Option<R>,
}

impl<R> EntitySnapshot<R> {
    pub fn loading() -> Self {
        EntitySnapshot {
            status: EntityStatus::Loading,
            entity: None,
        }
    }

    pub fn not_found() -> Self {
        EntitySnapshot {
            status: EntityStatus::NotFound,
            entity: None,
        }
    }

    pub fn found(entity: R) -> Self {
        EntitySnapshot {
            status: EntityStatus::Found,
            entity: Some(entity),
        }
    }

    pub fn from_lookup(entity: Option<R>) -> Self {
        match entity {
            Some(entity) => Self::found(entity),
            None => Self::not_found(),
        }
    }
}

struct EntityShared<R: Record> {
    store: String,
    key: Key,
    key_of: KeyExtractor<R>,
    engine: Arc<dyn StoreEngine<R>>,
    connector: ChangeConnector<R>,
    snapshot: Mutex<Arc<EntitySnapshot<R>>>,
}

impl<R: Record> EntityShared<R> {
    async fn load(self: Arc<Self>, epoch: Epoch) -> Result<()> {
        let entity = self.engine.get(&self.store, &self.key).await?;

        if !self.connector.is_current(epoch) {
            log::debug!("Discarding stale lookup of {} in {}", self.key, self.store);
            return Ok(());
        }

        log::debug!("Loaded {} from {}: found={}", self.key, self.store, entity.is_some());
        *self.snapshot.lock() = Arc::new(EntitySnapshot::from_lookup(entity));
        self.connector.dispatch_changed();
        Ok(())
    }

    /// The snapshot after applying `change`, or `None` when the change leaves
    /// the tracked entity alone.
    fn next(&self, current: &EntitySnapshot<R>, change: &Change<R>) -> Option<EntitySnapshot<R>> {
        match change {
            Change::Created(record) | Change::Updated(record) => {
                if (self.key_of)(record).as_ref() == Some(&self.key) {
                    Some(EntitySnapshot::found(record.clone()))
                } else {
                    None
                }
            }
            Change::Deleted(key) if key != &self.key => None,
            Change::Deleted(_) | Change::Cleared => {
                if current.status == EntityStatus::NotFound {
                    None
                } else {
                    Some(EntitySnapshot::not_found())
                }
            }
        }
    }

    fn on_change(&self, notification: &ChangeNotification<R>) -> Result<()> {
        if notification.store != self.store {
            return Ok(());
        }

        let changed = {
            let mut snapshot = self.snapshot.lock();
            let mut changed = false;
            for change in &notification.changes {
                if let Some(next) = self.next(&snapshot, change) {
                    *snapshot = Arc::new(next);
                    changed = true;
                }
            }
            changed
        };

        if changed {
            self.connector.dispatch_changed();
        }
        Ok(())
    }
}

/// Tracks whether a single key exists in a store, and its current record.
pub struct Entity<R: Record> {
    shared: Arc<EntityShared<R>>,
}

impl<R: Record> Clone for Entity<R> {
    fn clone(&self) -> Self {
        Entity {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Record> Entity<R> {
    pub fn new<E>(engine: Arc<E>, store: impl Into<String>, key: impl Into<Key>) -> Result<Self>
    where
        E: StoreEngine<R> + 'static,
    {
        let store = store.into();
        let key_of = engine.key_extractor(&store)?;

        Ok(Entity {
            shared: Arc::new(EntityShared {
                store,
                key: key.into(),
                key_of,
                connector: ChangeConnector::new(engine.clone()),
                engine,
                snapshot: Mutex::new(Arc::new(EntitySnapshot::loading())),
            }),
        })
    }

    pub fn key(&self) -> &Key {
        &self.shared.key
    }

    pub async fn setup(&self) -> Result<()> {
        let weak: Weak<EntityShared<R>> = Arc::downgrade(&self.shared);
        let listener = Arc::new(move |notification: &ChangeNotification<R>| match weak.upgrade() {
            Some(shared) => shared.on_change(notification),
            None => Ok(()),
        });

        let shared = self.shared.clone();
        let ready = self
            .shared
            .connector
            .setup(move |epoch| shared.clone().load(epoch), listener);
        ready.await
    }

    pub fn teardown(&self) {
        self.shared.connector.teardown();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connector.is_connected()
    }
}

impl<R: Record> ExternalStore for Entity<R> {
    type Snapshot = Arc<EntitySnapshot<R>>;

    fn subscribe(&self, callback: Callback) -> ListenerToken {
        self.shared.connector.subscribe(callback)
    }

    fn unsubscribe(&self, token: &ListenerToken) -> bool {
        self.shared.connector.unsubscribe(token)
    }

    fn get_snapshot(&self) -> Self::Snapshot {
        self.shared.snapshot.lock().clone()
    }
}
