use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::data::notifications::{decode_notification, encode_notification};
use crate::{ChangeHub, ChangeNotification, Error, ListenerToken, Result};

/// Carries committed change batches to other instances.
pub trait ChangeTransport<R>: Send + Sync {
    fn publish(&self, notification: &ChangeNotification<R>) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: ListenerToken,
    notification: String,
}

/// Transport over a `tokio::sync::broadcast` channel of JSON envelopes.
///
/// Every instance owns one `BroadcastTransport` on a shared sender. An
/// instance ignores envelopes carrying its own origin.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    origin: ListenerToken,
    sender: broadcast::Sender<String>,
}

impl BroadcastTransport {
    pub fn new(sender: broadcast::Sender<String>) -> Self {
        BroadcastTransport {
            origin: ListenerToken::new(),
            sender,
        }
    }

    pub fn origin(&self) -> &ListenerToken {
        &self.origin
    }

    /// Replay batches published by other instances into `hub`. The task ends
    /// when the channel closes.
    ///
    /// Instances read the same underlying storage and only exchange change
    /// notifications. When the receiver falls behind and batches are
    /// overwritten, the hub is told to resync so every view reloads.
    pub fn listen<R>(&self, hub: Arc<ChangeHub<R>>) -> JoinHandle<()>
    where
        R: DeserializeOwned + Send + Sync + 'static,
    {
        let origin = self.origin.clone();
        let mut receiver = self.sender.subscribe();

        tokio::spawn(async move {
            loop {
                let payload = match receiver.recv().await {
                    Ok(payload) => payload,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Change relay lagged, {} message(s) skipped; resynchronizing", skipped);
                        if let Err(e) = hub.resync() {
                            log::error!("Resynchronization after lag failed: {}", e);
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                match unwrap_envelope::<R>(&origin, &payload) {
                    Ok(Some(notification)) => {
                        if let Err(e) = hub.emit(&notification) {
                            log::error!("Relayed changes for store {} failed: {}", notification.store, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::error!("Dropping relayed message: {}", e),
                }
            }
            log::debug!("Change relay {} stopped", origin);
        })
    }
}

fn unwrap_envelope<R: DeserializeOwned>(
    origin: &ListenerToken,
    payload: &str,
) -> Result<Option<ChangeNotification<R>>> {
    let envelope: Envelope =
        serde_json::from_str(payload).map_err(|e| Error::UnhandledChange(e.to_string()))?;
    if &envelope.origin == origin {
        return Ok(None);
    }
    decode_notification(&envelope.notification).map(Some)
}

impl<R: Serialize> ChangeTransport<R> for BroadcastTransport {
    fn publish(&self, notification: &ChangeNotification<R>) -> Result<()> {
        let envelope = Envelope {
            origin: self.origin.clone(),
            notification: encode_notification(notification)?,
        };
        // No receivers is fine: nobody else is listening yet.
        let _ = self.sender.send(serde_json::to_string(&envelope)?);
        Ok(())
    }
}
