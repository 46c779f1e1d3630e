use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::{ChangeListener, ChangeSource, Error, ListenerToken, ResyncListener, Result};

/// Zero-argument callback fired when a view's visible contents change.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// The in-flight or completed initialization of a connected view. Cloning it
/// hands out the same outcome.
pub type Ready = Shared<BoxFuture<'static, Result<()>>>;

/// Identifies one `setup()` cycle of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

/// The pull-based subscription contract UI bindings consume: subscribe for
/// invalidation, then re-read with `get_snapshot`.
pub trait ExternalStore {
    type Snapshot: Clone;

    fn subscribe(&self, callback: Callback) -> ListenerToken;

    fn unsubscribe(&self, token: &ListenerToken) -> bool;

    /// Cheap and referentially stable until the view changes.
    fn get_snapshot(&self) -> Self::Snapshot;
}

type Initializer = Arc<dyn Fn(Epoch) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct ConnectorState {
    listener: Option<ListenerToken>,
    resync_listener: Option<ListenerToken>,
    initializer: Option<Initializer>,
    ready: Option<Ready>,
    epoch: u64,
}

impl ConnectorState {
    /// Move to a new epoch and start `initializer` under it.
    fn arm(&mut self, initializer: &Initializer) -> Ready {
        self.epoch += 1;
        let ready = initializer(Epoch(self.epoch)).shared();
        self.ready = Some(ready.clone());
        ready
    }
}

/// Re-run the initializer of a connected view under a fresh epoch. The run
/// is spawned on the current runtime; anything still in flight from the
/// previous epoch is discarded when it lands.
fn resync(state: &Mutex<ConnectorState>) -> Result<()> {
    let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

    let ready = {
        let mut state = state.lock();
        let Some(initializer) = state.initializer.clone() else {
            return Ok(());
        };
        let ready = state.arm(&initializer);
        log::debug!("Connector resynchronizing at epoch {}", state.epoch);
        ready
    };

    runtime.spawn(async move {
        if let Err(e) = ready.await {
            log::error!("Resynchronization failed: {}", e);
        }
    });
    Ok(())
}

/// Bridges a change source to a view's reconcile logic and re-publishes a
/// payload-free "changed" signal to the view's own subscribers.
pub struct ChangeConnector<R> {
    source: Arc<dyn ChangeSource<R>>,
    state: Arc<Mutex<ConnectorState>>,
    subscribers: Mutex<Vec<(ListenerToken, Callback)>>,
}

impl<R> ChangeConnector<R> {
    pub fn new(source: Arc<dyn ChangeSource<R>>) -> Self {
        ChangeConnector {
            source,
            state: Arc::new(Mutex::new(ConnectorState::default())),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register `listener` and start `initializer`, once. Until `teardown()`,
    /// further calls return the first call's outcome and drop their arguments.
    /// The initializer is kept so a resync from the source can run it again.
    pub fn setup<F, Fut>(&self, initializer: F, listener: ChangeListener<R>) -> Ready
    where
        F: Fn(Epoch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(ready) = &state.ready {
            return ready.clone();
        }

        let initializer: Initializer = Arc::new(move |epoch| initializer(epoch).boxed());
        state.listener = Some(self.source.add_listener(listener));
        state.resync_listener = Some(self.source.add_resync_listener(self.resync_listener()));

        let ready = state.arm(&initializer);
        state.initializer = Some(initializer);
        log::debug!("Connector armed for epoch {}", state.epoch);
        ready
    }

    fn resync_listener(&self) -> ResyncListener {
        let state = Arc::downgrade(&self.state);
        Arc::new(move || match state.upgrade() {
            Some(state) => resync(&state),
            None => Ok(()),
        })
    }

    /// Reload a connected view from scratch. Does nothing when disconnected.
    /// Must be called inside a tokio runtime.
    pub fn resync(&self) -> Result<()> {
        resync(&self.state)
    }

    /// Deregister the listeners and allow a fresh `setup()`. An initializer
    /// still in flight keeps running, but its epoch is no longer current.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        for token in [state.listener.take(), state.resync_listener.take()].into_iter().flatten() {
            self.source.remove_listener(&token);
        }
        state.initializer = None;
        if state.ready.take().is_some() {
            log::debug!("Connector torn down at epoch {}", state.epoch);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().ready.is_some()
    }

    /// The epoch of the active setup, if any.
    pub fn epoch(&self) -> Option<Epoch> {
        let state = self.state.lock();
        state.ready.as_ref().map(|_| Epoch(state.epoch))
    }

    /// Whether work started under `epoch` may still publish its result.
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch() == Some(epoch)
    }

    pub fn subscribe(&self, callback: Callback) -> ListenerToken {
        let token = ListenerToken::new();
        self.subscribers.lock().push((token.clone(), callback));
        token
    }

    pub fn unsubscribe(&self, token: &ListenerToken) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(t, _)| t != token);
        subscribers.len() != before
    }

    /// Fire every subscriber. Callbacks run outside the lock so they can read
    /// snapshots or unsubscribe.
    pub fn dispatch_changed(&self) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

impl<R> std::fmt::Debug for ChangeConnector<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChangeConnector")
            .field("epoch", &state.epoch)
            .field("connected", &state.ready.is_some())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
