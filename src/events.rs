//! Fan-out of task state transitions to live-update subscribers.
//!
//! The broadcaster keeps an id-keyed registry of subscriber channels and
//! delivers every event to each of them in registration order. A subscriber
//! that went away (dropped its receiver) is pruned during delivery and can
//! never prevent later subscribers from receiving the event. Subscribers do
//! not affect task execution; dropping one merely stops its updates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::task::{TaskId, TaskStatus};

/// Kind of a live-update event, one per status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskStarted,
    TaskUpdate,
}

/// A single status-transition event as published to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn started(task_id: TaskId) -> Self {
        Self {
            event_type: EventType::TaskStarted,
            task_id,
            status: TaskStatus::Pending,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn update(task_id: TaskId, status: TaskStatus, result: Option<Value>) -> Self {
        Self {
            event_type: EventType::TaskUpdate,
            task_id,
            status,
            result,
            timestamp: Utc::now(),
        }
    }
}

/// Identifier handed back on subscription, used to unsubscribe.
pub type SubscriberId = Uuid;

/// Publish/subscribe hub for task events.
#[derive(Debug, Default)]
pub struct Broadcaster {
    // Vec keeps registration order for delivery; lookups stay O(n) but the
    // subscriber count is the number of connected streams, always small.
    subscribers: RwLock<Vec<(SubscriberId, mpsc::UnboundedSender<TaskEvent>)>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its id plus the event stream.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().await.push((id, tx));
        tracing::debug!(subscriber = %id, "event subscriber registered");
        (id, rx)
    }

    /// Drop a subscriber; a no-op for unknown ids.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.retain(|(sid, _)| *sid != id);
    }

    /// Deliver an event to every subscriber in registration order.
    ///
    /// Closed channels are pruned; their failure is isolated per subscriber.
    pub async fn broadcast(&self, event: TaskEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|(id, tx)| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(subscriber = %id, "pruning disconnected event subscriber");
                false
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_all_subscribers_in_order() {
        let hub = Broadcaster::new();
        let (_a, mut rx_a) = hub.subscribe().await;
        let (_b, mut rx_b) = hub.subscribe().await;

        let id = TaskId::new();
        hub.broadcast(TaskEvent::started(id)).await;
        hub.broadcast(TaskEvent::update(id, TaskStatus::Thinking, None))
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            assert_eq!(first.event_type, EventType::TaskStarted);
            let second = rx.recv().await.unwrap();
            assert_eq!(second.status, TaskStatus::Thinking);
        }
    }

    #[tokio::test]
    async fn dead_subscriber_does_not_block_later_ones() {
        let hub = Broadcaster::new();
        let (_a, rx_a) = hub.subscribe().await;
        let (_b, mut rx_b) = hub.subscribe().await;
        drop(rx_a);

        let id = TaskId::new();
        hub.broadcast(TaskEvent::started(id)).await;

        assert_eq!(rx_b.recv().await.unwrap().task_id, id);
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = Broadcaster::new();
        let (a, mut rx_a) = hub.subscribe().await;
        hub.unsubscribe(a).await;

        hub.broadcast(TaskEvent::started(TaskId::new())).await;
        assert!(rx_a.recv().await.is_none());
    }

    #[test]
    fn event_wire_shape() {
        let id = TaskId::new();
        let event = TaskEvent::update(
            id,
            TaskStatus::Completed,
            Some(serde_json::json!({ "review": "ok" })),
        );
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "task_update");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["taskId"], serde_json::to_value(id).unwrap());
        assert_eq!(value["result"]["review"], "ok");
        assert!(value.get("timestamp").is_some());
    }
}
