use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{Location, LocationResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub(crate) struct Progress {
    pub(crate) current: usize,
    pub(crate) total: usize,
    pub(crate) location: String,
}

/// Everything a live observer can receive, as `{"type": ..., "data": ...}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub(crate) enum StreamEvent {
    Locations(Vec<Location>),
    #[serde(rename = "test_started")]
    RunStarted,
    #[serde(rename = "test_progress")]
    Progress(Progress),
    #[serde(rename = "test_result")]
    LocationResult(Box<LocationResult>),
    #[serde(rename = "test_complete")]
    RunCompleted,
}

pub(crate) type SubscriberId = u64;

/// Events a subscriber may fall behind by before it is dropped.
const SUBSCRIBER_BUFFER: usize = 256;

pub(crate) struct Subscription {
    pub(crate) id: SubscriberId,
    pub(crate) events: mpsc::Receiver<String>,
}

/// Fan-out of run events to however many observers are connected right now.
///
/// All access to the subscriber set goes through one lock; a publish holds it for
/// the whole pass, so joins and leaves land strictly before or after a broadcast.
/// There is no replay: a subscriber sees only events published after it joined,
/// apart from the catalog it is sent on joining.
pub(crate) struct StreamBroadcaster {
    catalog: Vec<Location>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl StreamBroadcaster {
    pub(crate) fn new(catalog: Vec<Location>) -> Self {
        Self {
            catalog,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        match encode(&StreamEvent::Locations(self.catalog.clone())) {
            Some(text) => {
                // fresh channel with the receiver in scope
                let _ = tx.try_send(text);
            }
            None => warn!(subscriber = id, "could not encode catalog for new subscriber"),
        }

        self.subscribers.lock().insert(id, tx);
        debug!(subscriber = id, "subscriber joined");
        Subscription { id, events: rx }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "subscriber left");
        }
        removed
    }

    /// Sends `event` to every current subscriber and returns how many got it.
    /// Subscribers whose receiving side is gone, or whose queue is full, are
    /// dropped; publishing itself never fails or waits.
    pub(crate) fn publish(&self, event: &StreamEvent) -> usize {
        let Some(text) = encode(event) else {
            return 0;
        };

        let mut subscribers = self.subscribers.lock();
        let mut broken = Vec::new();
        for (id, tx) in subscribers.iter() {
            if tx.try_send(text.clone()).is_err() {
                broken.push(*id);
            }
        }
        for id in &broken {
            subscribers.remove(id);
            debug!(subscriber = id, "dropped disconnected subscriber");
        }
        subscribers.len()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

fn encode(event: &StreamEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "failed to encode stream event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::models::fixtures::location;

    fn broadcaster() -> StreamBroadcaster {
        StreamBroadcaster::new(vec![location("Tokyo"), location("Paris")])
    }

    fn next(sub: &mut Subscription) -> Value {
        serde_json::from_str(&sub.events.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn wire_format_is_tagged() {
        let progress = StreamEvent::Progress(Progress {
            current: 1,
            total: 2,
            location: "Tokyo".to_string(),
        });
        let value: Value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["type"], "test_progress");
        assert_eq!(value["data"]["current"], 1);
        assert_eq!(value["data"]["location"], "Tokyo");

        let started = serde_json::to_value(StreamEvent::RunStarted).unwrap();
        assert_eq!(started["type"], "test_started");
        assert_eq!(
            serde_json::to_value(StreamEvent::RunCompleted).unwrap()["type"],
            "test_complete"
        );
    }

    #[test]
    fn new_subscriber_gets_catalog_first() {
        let hub = broadcaster();
        let mut sub = hub.subscribe();
        let first = next(&mut sub);
        assert_eq!(first["type"], "locations");
        assert_eq!(first["data"].as_array().unwrap().len(), 2);
        assert!(sub.events.try_recv().is_err());
    }

    #[test]
    fn late_subscriber_sees_no_history() {
        let hub = broadcaster();
        hub.publish(&StreamEvent::RunStarted);
        let mut sub = hub.subscribe();
        assert_eq!(next(&mut sub)["type"], "locations");
        assert!(sub.events.try_recv().is_err());
        hub.publish(&StreamEvent::RunCompleted);
        assert_eq!(next(&mut sub)["type"], "test_complete");
    }

    #[test]
    fn broken_subscriber_is_removed_and_others_still_receive() {
        let hub = broadcaster();
        let mut alive = hub.subscribe();
        let broken = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);
        drop(broken.events);

        let result = crate::models::LocationResult::failed(location("Tokyo"), "no endpoints found for Tokyo");
        let delivered = hub.publish(&StreamEvent::LocationResult(Box::new(result)));

        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(next(&mut alive)["type"], "locations");
        let event = next(&mut alive);
        assert_eq!(event["type"], "test_result");
        assert_eq!(event["data"]["location"]["name"], "Tokyo");
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = broadcaster();
        let mut sub = hub.subscribe();
        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
        assert_eq!(hub.publish(&StreamEvent::RunStarted), 0);
        assert_eq!(next(&mut sub)["type"], "locations");
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_and_publishes_keep_order() {
        let hub = Arc::new(broadcaster());
        let mut watcher = hub.subscribe();

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    hub.publish(&StreamEvent::Progress(Progress {
                        current: i,
                        total: 200,
                        location: "Tokyo".to_string(),
                    }));
                    tokio::task::yield_now().await;
                }
            })
        };
        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let sub = hub.subscribe();
                    tokio::task::yield_now().await;
                    hub.unsubscribe(sub.id);
                }
            })
        };
        publisher.await.unwrap();
        churn.await.unwrap();

        assert_eq!(next(&mut watcher)["type"], "locations");
        for i in 0..200 {
            assert_eq!(next(&mut watcher)["data"]["current"], i);
        }
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn subscriber_that_never_reads_is_dropped_when_full() {
        let hub = broadcaster();
        let stalled = hub.subscribe();
        let mut reader = hub.subscribe();

        for i in 0..SUBSCRIBER_BUFFER {
            hub.publish(&StreamEvent::Progress(Progress {
                current: i,
                total: SUBSCRIBER_BUFFER,
                location: "Tokyo".to_string(),
            }));
            while reader.events.try_recv().is_ok() {}
        }

        assert_eq!(hub.subscriber_count(), 1);
        assert!(!hub.unsubscribe(stalled.id));
        assert_eq!(hub.publish(&StreamEvent::RunCompleted), 1);
        assert_eq!(next(&mut reader)["type"], "test_complete");
    }
}
