use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::data::connector::{Callback, ChangeConnector, Epoch, ExternalStore};
use crate::data::store_trait::count_matching;
use crate::{ChangeNotification, Error, ListenerToken, Record, Result, StoreEngine, ViewOptions};

#[derive(Debug, Default)]
struct CountState {
    count: Option<usize>,
    applied: u64,
}

struct CounterShared<R: Record> {
    options: ViewOptions<R>,
    engine: Arc<dyn StoreEngine<R>>,
    connector: ChangeConnector<R>,
    state: Mutex<CountState>,
    requested: AtomicU64,
    finished: watch::Sender<u64>,
    failure: Mutex<Option<Error>>,
    runtime: Mutex<Option<Handle>>,
}

impl<R: Record> CounterShared<R> {
    async fn compute(&self) -> Result<usize> {
        let store = self.options.store.as_str();
        match (&self.options.index, &self.options.filter) {
            (None, None) => self.engine.get_count(store).await,
            (Some(index), None) => self.engine.get_index_count(store, index).await,
            (None, Some(filter)) => count_matching(self.engine.iterate(store), filter).await,
            (Some(index), Some(filter)) => count_matching(self.engine.iterate_index(store, index), filter).await,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.requested.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn finish(&self, sequence: u64) {
        self.finished.send_modify(|finished| *finished = (*finished).max(sequence));
    }

    /// Publish a count computed for `sequence`. Results for a stale epoch or
    /// older than the last applied count are dropped.
    fn apply(&self, sequence: u64, epoch: Epoch, count: usize) -> bool {
        if !self.connector.is_current(epoch) {
            log::debug!("Discarding stale count of {} for {}", count, self.options.store);
            return false;
        }

        let mut state = self.state.lock();
        if sequence <= state.applied {
            return false;
        }
        state.applied = sequence;

        if state.count == Some(count) {
            return false;
        }
        state.count = Some(count);
        true
    }

    async fn load(self: Arc<Self>, epoch: Epoch) -> Result<()> {
        let sequence = self.next_sequence();
        let result = self.compute().await;
        self.finish(sequence);

        let count = result?;
        log::debug!("Loaded count of {} for {}", count, self.options.store);
        if self.apply(sequence, epoch, count) {
            self.connector.dispatch_changed();
        }
        Ok(())
    }

    async fn recompute(self: Arc<Self>, sequence: u64, epoch: Epoch) {
        let result = self.compute().await;

        let changed = match result {
            Ok(count) => self.apply(sequence, epoch, count),
            Err(e) => {
                log::error!("Recounting {} failed: {}", self.options.store, e);
                *self.failure.lock() = Some(e);
                false
            }
        };

        self.finish(sequence);
        if changed {
            self.connector.dispatch_changed();
        }
    }

    fn on_change(self: &Arc<Self>, notification: &ChangeNotification<R>) -> Result<()> {
        if notification.store != self.options.store {
            return Ok(());
        }

        let Some(epoch) = self.connector.epoch() else {
            return Ok(());
        };
        let runtime = self
            .runtime
            .lock()
            .clone()
            .ok_or_else(|| Error::Runtime("counter has no runtime to recount on".to_string()))?;

        let sequence = self.next_sequence();
        log::trace!("Scheduling recount #{} for {}", sequence, self.options.store);
        runtime.spawn(self.clone().recompute(sequence, epoch));
        Ok(())
    }
}

/// A live count of the records of one store that pass the view's index
/// filter and predicate.
///
/// Counts are recomputed against the engine after every relevant change
/// batch. Subscribers only fire when the count actually moves.
pub struct Counter<R: Record> {
    shared: Arc<CounterShared<R>>,
}

impl<R: Record> Clone for Counter<R> {
    fn clone(&self) -> Self {
        Counter {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Record> Counter<R> {
    pub fn new<E>(engine: Arc<E>, options: ViewOptions<R>) -> Self
    where
        E: StoreEngine<R> + 'static,
    {
        let (finished, _) = watch::channel(0);

        Counter {
            shared: Arc::new(CounterShared {
                connector: ChangeConnector::new(engine.clone()),
                engine,
                options,
                state: Mutex::new(CountState::default()),
                requested: AtomicU64::new(0),
                finished,
                failure: Mutex::new(None),
                runtime: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &ViewOptions<R> {
        &self.shared.options
    }

    /// Load the initial count and start following the store. Must run inside
    /// a tokio runtime, which later recounts are spawned on.
    pub async fn setup(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        *self.shared.runtime.lock() = Some(runtime);

        let weak: Weak<CounterShared<R>> = Arc::downgrade(&self.shared);
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

    /// Wait for every recount scheduled so far. Surfaces the failure of a
    /// background recount, once.
    pub async fn settled(&self) -> Result<()> {
        let target = self.shared.requested.load(Ordering::SeqCst);
        let mut finished = self.shared.finished.subscribe();
        finished
            .wait_for(|finished| *finished >= target)
            .await
            .map_err(|e| Error::Runtime(e.to_string()))?;

        match self.shared.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<R: Record> ExternalStore for Counter<R> {
    /// `None` until the first count has loaded.
    type Snapshot = Option<usize>;

    fn subscribe(&self, callback: Callback) -> ListenerToken {
        self.shared.connector.subscribe(callback)
    }

    fn unsubscribe(&self, token: &ListenerToken) -> bool {
        self.shared.connector.unsubscribe(token)
    }

    fn get_snapshot(&self) -> Self::Snapshot {
        self.shared.state.lock().count
    }
}
