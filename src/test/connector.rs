use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::test::fixtures::CallCounter;
use crate::*;

fn noop_listener() -> ChangeListener<Value> {
    Arc::new(|_: &ChangeNotification<Value>| Ok(()))
}

fn connector() -> (Arc<ChangeHub<Value>>, ChangeConnector<Value>) {
    let hub = Arc::new(ChangeHub::<Value>::new());
    let connector = ChangeConnector::new(hub.clone());
    (hub, connector)
}

#[tokio::test]
async fn test_setup_runs_initializer_once() -> Result<()> {
    let (hub, connector) = connector();
    let runs = Arc::new(AtomicUsize::new(0));

    let make_initializer = || {
        let runs = runs.clone();
        move |_: Epoch| {
            runs.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Error>(()) }
        }
    };

    let first = connector.setup(make_initializer(), noop_listener());
    let second = connector.setup(make_initializer(), noop_listener());
    first.await?;
    second.await?;
    connector.setup(make_initializer(), noop_listener()).await?;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(hub.listener_count(), 1);
    assert!(connector.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_teardown_allows_fresh_setup() -> Result<()> {
    let (hub, connector) = connector();
    let epochs = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..2 {
        let epochs = epochs.clone();
        connector
            .setup(
                move |epoch| {
                    epochs.lock().push(epoch);
                    async { Ok(()) }
                },
                noop_listener(),
            )
            .await?;
        connector.teardown();
        assert_eq!(hub.listener_count(), 0);
        assert_eq!(hub.resync_listener_count(), 0);
        assert!(!connector.is_connected());
    }

    let epochs = epochs.lock().clone();
    assert_eq!(epochs.len(), 2);
    assert!(epochs[0] < epochs[1]);
    assert!(!connector.is_current(epochs[0]));
    assert_eq!(connector.epoch(), None);
    Ok(())
}

#[tokio::test]
async fn test_setup_failure_is_shared() {
    let (_hub, connector) = connector();

    let first = connector.setup(
        |_| async { Err(Error::Storage("offline".to_string())) },
        noop_listener(),
    );
    let second = connector.setup(|_| async { Ok(()) }, noop_listener());

    assert_eq!(first.await, Err(Error::Storage("offline".to_string())));
    assert_eq!(second.await, Err(Error::Storage("offline".to_string())));
}

#[tokio::test]
async fn test_listener_receives_source_events() -> Result<()> {
    let (hub, connector) = connector();
    let seen = Arc::new(AtomicUsize::new(0));

    let counted = seen.clone();
    connector
        .setup(
            |_| async { Ok(()) },
            Arc::new(move |notification: &ChangeNotification<Value>| {
                counted.fetch_add(notification.changes.len(), Ordering::SeqCst);
                Ok(())
            }),
        )
        .await?;

    hub.emit(&ChangeNotification::with_changes("users", [Change::Cleared, Change::Deleted(skey!(1))]))?;
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    connector.teardown();
    hub.emit(&ChangeNotification::with_changes("users", [Change::Cleared]))?;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_subscribe_and_dispatch() {
    let (_hub, connector) = connector();
    let first = CallCounter::default();
    let second = CallCounter::default();

    let token = connector.subscribe(first.callback());
    connector.subscribe(second.callback());
    connector.dispatch_changed();
    assert_eq!((first.count(), second.count()), (1, 1));

    assert!(connector.unsubscribe(&token));
    assert!(!connector.unsubscribe(&token));
    connector.dispatch_changed();
    assert_eq!((first.count(), second.count()), (1, 2));
}

#[test]
fn test_callback_may_unsubscribe_itself() {
    let (_hub, connector) = connector();
    let connector = Arc::new(connector);
    let token_slot: Arc<Mutex<Option<ListenerToken>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&connector);
    let slot = token_slot.clone();
    let counted = calls.clone();
    let token = connector.subscribe(Arc::new(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        if let (Some(connector), Some(token)) = (weak.upgrade(), slot.lock().clone()) {
            connector.unsubscribe(&token);
        }
    }));
    *token_slot.lock() = Some(token);

    connector.dispatch_changed();
    connector.dispatch_changed();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resync_reruns_initializer_under_new_epoch() -> Result<()> {
    let (hub, connector) = connector();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    connector
        .setup(
            move |epoch| {
                let _ = tx.send(epoch);
                async { Ok(()) }
            },
            noop_listener(),
        )
        .await?;
    let first = rx.recv().await.ok_or(Error::Runtime("initializer never ran".to_string()))?;
    assert_eq!(hub.resync_listener_count(), 1);

    hub.resync()?;
    let second = rx.recv().await.ok_or(Error::Runtime("resync never ran".to_string()))?;
    assert!(first < second);
    assert!(!connector.is_current(first));
    assert!(connector.is_current(second));

    connector.resync()?;
    let third = rx.recv().await.ok_or(Error::Runtime("resync never ran".to_string()))?;
    assert!(connector.is_current(third));

    connector.teardown();
    hub.resync()?;
    connector.resync()?;
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(connector.epoch(), None);
    Ok(())
}

#[test]
fn test_resync_outside_runtime_fails() -> Result<()> {
    let (_hub, connector) = connector();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| Error::Runtime(e.to_string()))?;
    runtime.block_on(connector.setup(|_| async { Ok(()) }, noop_listener()))?;

    assert!(matches!(connector.resync(), Err(Error::Runtime(_))));
    Ok(())
}
