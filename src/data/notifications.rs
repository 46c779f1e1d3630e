use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{Error, Key, Result};

/// Identifies one listener or subscriber registration. Handing it back to
/// the registry removes exactly that registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerToken(Uuid);

impl ListenerToken {
    pub fn new() -> Self {
        ListenerToken(Uuid::new_v4())
    }
}

impl Default for ListenerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One mutation inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Change<R> {
    Created(R),
    Updated(R),
    Deleted(Key),
    Cleared,
}

/// All changes a single transaction made to one store, in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification<R> {
    pub store: String,
    pub changes: SmallVec<[Change<R>; 4]>,
}

impl<R> ChangeNotification<R> {
    pub fn new(store: impl Into<String>) -> Self {
        ChangeNotification {
            store: store.into(),
            changes: SmallVec::new(),
        }
    }

    pub fn with_changes(store: impl Into<String>, changes: impl IntoIterator<Item = Change<R>>) -> Self {
        ChangeNotification {
            store: store.into(),
            changes: changes.into_iter().collect(),
        }
    }

    pub fn push(&mut self, change: Change<R>) {
        self.changes.push(change);
    }
}

/// Decode a notification received from outside the process. A change kind
/// this crate does not know is an error, not something to skip.
pub fn decode_notification<R: DeserializeOwned>(payload: &str) -> Result<ChangeNotification<R>> {
    serde_json::from_str(payload).map_err(|e| Error::UnhandledChange(e.to_string()))
}

pub fn encode_notification<R: Serialize>(notification: &ChangeNotification<R>) -> Result<String> {
    Ok(serde_json::to_string(notification)?)
}

/// Callback invoked synchronously for every committed change batch.
pub type ChangeListener<R> = Arc<dyn Fn(&ChangeNotification<R>) -> Result<()> + Send + Sync>;

/// Callback invoked when a source may have lost change batches and every
/// view built on it has to reload.
pub type ResyncListener = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Anything that publishes committed change batches.
pub trait ChangeSource<R>: Send + Sync {
    fn add_listener(&self, listener: ChangeListener<R>) -> ListenerToken;

    fn add_resync_listener(&self, listener: ResyncListener) -> ListenerToken;

    /// Removes a change or resync registration.
    fn remove_listener(&self, token: &ListenerToken) -> bool;
}

/// Listener registry that fans change batches out to every registered listener.
pub struct ChangeHub<R> {
    listeners: Mutex<Vec<(ListenerToken, ChangeListener<R>)>>,
    resync_listeners: Mutex<Vec<(ListenerToken, ResyncListener)>>,
}

impl<R> ChangeHub<R> {
    pub fn new() -> Self {
        ChangeHub {
            listeners: Mutex::new(Vec::new()),
            resync_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn resync_listener_count(&self) -> usize {
        self.resync_listeners.lock().len()
    }

    /// Tell every resync listener that batches were lost. All of them run;
    /// the first failure is returned.
    pub fn resync(&self) -> Result<()> {
        let listeners: Vec<ResyncListener> = self
            .resync_listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        log::debug!("Resynchronizing {} listener(s)", listeners.len());
        let mut first_error = None;
        for listener in listeners {
            if let Err(e) = listener() {
                log::error!("Resync listener failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Deliver a batch to every listener. Listeners run outside the registry
    /// lock so they may register or remove listeners themselves. Every
    /// listener runs; the first failure is returned.
    pub fn emit(&self, notification: &ChangeNotification<R>) -> Result<()> {
        let listeners: Vec<ChangeListener<R>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        let mut first_error = None;
        for listener in listeners {
            if let Err(e) = listener(notification) {
                log::error!("Change listener failed for store {}: {}", notification.store, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<R> Default for ChangeHub<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send + Sync> ChangeSource<R> for ChangeHub<R> {
    fn add_listener(&self, listener: ChangeListener<R>) -> ListenerToken {
        let token = ListenerToken::new();
        self.listeners.lock().push((token.clone(), listener));
        token
    }

    fn add_resync_listener(&self, listener: ResyncListener) -> ListenerToken {
        let token = ListenerToken::new();
        self.resync_listeners.lock().push((token.clone(), listener));
        token
    }

    fn remove_listener(&self, token: &ListenerToken) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(t, _)| t != token);
        if listeners.len() != before {
            return true;
        }

        let mut resync_listeners = self.resync_listeners.lock();
        let before = resync_listeners.len();
        resync_listeners.retain(|(t, _)| t != token);
        resync_listeners.len() != before
    }
}
