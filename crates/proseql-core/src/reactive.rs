//! Reactive change-event bus and watcher subscriptions: a
//! single process-wide broadcaster of change events, with per-subscription
//! recompute, optional debounce, and dedup of adjacent identical result
//! sequences.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Reload,
}

/// `{collection, kind, id?, before?, after?}`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Process-wide publish-subscribe broadcaster, grounded on the shape of
/// `event_adapter.rs`'s `LedgerHandler` (subscribe once, map inbound
/// events) but carrying ProseQL's own event type over `tokio::sync::
/// broadcast` rather than `oxidizedgraph::events::EventBus`.
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        ChangeBus { sender }
    }

    /// Publish to every current subscriber. Never fails: a bus with no
    /// subscribers simply drops the event.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A live query subscription. Dropping it unsubscribes (aborts the
/// background recompute task).
pub struct WatchHandle<T> {
    pub receiver: mpsc::Receiver<T>,
    task: tokio::task::JoinHandle<()>,
}

impl<T> Drop for WatchHandle<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe to a query: emits `initial` synchronously, then recomputes
/// via `recompute` on every event touching `collection` (or a `reload`),
/// optionally coalescing a burst within `debounce`, deduplicating adjacent
/// identical result sequences.
pub fn watch_query<F, Fut>(
    bus: &ChangeBus,
    collection: String,
    debounce: Option<Duration>,
    initial: Vec<Value>,
    recompute: F,
) -> WatchHandle<Vec<Value>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<Value>> + Send + 'static,
{
    let mut events = bus.subscribe();
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(async move {
        let mut last = initial.clone();
        if tx.send(initial).await.is_err() {
            return;
        }
        loop {
            match events.recv().await {
                Ok(event) if event.collection == collection => {
                    if let Some(window) = debounce {
                        tokio::time::sleep(window).await;
                        while events.try_recv().is_ok() {}
                    }
                    let next = recompute().await;
                    if next != last {
                        last = next.clone();
                        if tx.send(next).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    WatchHandle { receiver: rx, task }
}

/// `watchById` specialization: emits the entity (or `null`)
/// on subscription and on every create/update/delete/reload touching that
/// id.
pub fn watch_by_id<F, Fut>(
    bus: &ChangeBus,
    collection: String,
    id: String,
    initial: Option<Value>,
    lookup: F,
) -> WatchHandle<Option<Value>>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<Value>> + Send + 'static,
{
    let mut events = bus.subscribe();
    let (tx, rx) = mpsc::channel(16);
    let watched_id = id.clone();
    let task = tokio::spawn(async move {
        let mut last = initial.clone();
        if tx.send(initial).await.is_err() {
            return;
        }
        loop {
            match events.recv().await {
                Ok(event) if event.collection == collection => {
                    let matches_id = event.kind == ChangeKind::Reload
                        || event.id.as_deref() == Some(watched_id.as_str());
                    if !matches_id {
                        continue;
                    }
                    let next = lookup().await;
                    if next != last {
                        last = next.clone();
                        if tx.send(next).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    WatchHandle { receiver: rx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn watch_query_emits_initial_then_recomputes_on_matching_event() {
        let bus = ChangeBus::new(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut handle = watch_query(&bus, "users".into(), None, vec![json!({"n": 0})], move || {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                vec![json!({"n": n})]
            }
        });

        let first = handle.receiver.recv().await.unwrap();
        assert_eq!(first, vec![json!({"n": 0})]);

        bus.publish(ChangeEvent {
            collection: "users".into(),
            kind: ChangeKind::Create,
            id: Some("1".into()),
            before: None,
            after: None,
        });
        let second = handle.receiver.recv().await.unwrap();
        assert_eq!(second, vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn watch_ignores_events_for_other_collections() {
        let bus = ChangeBus::new(16);
        let mut handle = watch_query(&bus, "users".into(), None, vec![], || async { vec![json!({"touched": true})] });
        let _ = handle.receiver.recv().await.unwrap();

        bus.publish(ChangeEvent {
            collection: "companies".into(),
            kind: ChangeKind::Create,
            id: None,
            before: None,
            after: None,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn watch_by_id_only_reacts_to_its_own_id() {
        let bus = ChangeBus::new(16);
        let mut handle = watch_by_id(&bus, "users".into(), "u1".into(), None, || async { Some(json!({"id": "u1"})) });
        let initial = handle.receiver.recv().await.unwrap();
        assert_eq!(initial, None);

        bus.publish(ChangeEvent {
            collection: "users".into(),
            kind: ChangeKind::Update,
            id: Some("u2".into()),
            before: None,
            after: None,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.receiver.try_recv().is_err());

        bus.publish(ChangeEvent {
            collection: "users".into(),
            kind: ChangeKind::Update,
            id: Some("u1".into()),
            before: None,
            after: None,
        });
        let next = handle.receiver.recv().await.unwrap();
        assert_eq!(next, Some(json!({"id": "u1"})));
    }
}
