use super::{EventEnvelope, WorkflowEvent};
use crate::WorkflowId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Best-effort publish/subscribe channel keyed by workflow id.
///
/// Each workflow id gets its own broadcast channel, created on first
/// subscription and dropped once the last subscriber leaves. Slow subscribers
/// lose the oldest events instead of slowing the publisher down.
pub struct StatusReporter {
    capacity: usize,
    channels: Mutex<HashMap<WorkflowId, broadcast::Sender<WorkflowEvent>>>,
    global: broadcast::Sender<EventEnvelope>,
    next_id: AtomicU64,
}

impl StatusReporter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
            global,
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to the events of one workflow
    pub fn subscribe(&self, workflow_id: &str) -> Subscription {
        let receiver = {
            let mut channels = self.channels();
            channels
                .entry(workflow_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Subscriber {} joined workflow {}", id, workflow_id);

        Subscription {
            id,
            workflow_id: workflow_id.to_string(),
            receiver,
        }
    }

    /// Detach a subscription. The channel is dropped with its last subscriber.
    pub fn unsubscribe(&self, workflow_id: &str, subscription: Subscription) {
        let id = subscription.id;
        drop(subscription);

        let mut channels = self.channels();
        if let Some(sender) = channels.get(workflow_id) {
            if sender.receiver_count() == 0 {
                channels.remove(workflow_id);
            }
        }
        tracing::debug!("Subscriber {} left workflow {}", id, workflow_id);
    }

    /// Global feed of every workflow's events
    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global.subscribe()
    }

    pub fn subscriber_count(&self, workflow_id: &str) -> usize {
        self.channels()
            .get(workflow_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Deliver an event to the workflow's subscribers. Never blocks and never
    /// fails; events for a workflow nobody watches are dropped.
    pub fn publish(&self, workflow_id: &str, event: WorkflowEvent) {
        tracing::debug!("Publishing {} for workflow {}", event.name(), workflow_id);

        if self.global.receiver_count() > 0 {
            let _ = self.global.send(EventEnvelope {
                workflow_id: workflow_id.to_string(),
                event: event.clone(),
            });
        }

        let sender = self.channels().get(workflow_id).cloned();
        let Some(sender) = sender else {
            return;
        };

        if sender.send(event).is_err() {
            // Every receiver was dropped without unsubscribing
            let mut channels = self.channels();
            if channels
                .get(workflow_id)
                .is_some_and(|s| s.receiver_count() == 0)
            {
                channels.remove(workflow_id);
            }
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<WorkflowId, broadcast::Sender<WorkflowEvent>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Handle returned by [`StatusReporter::subscribe`]
pub struct Subscription {
    id: u64,
    workflow_id: WorkflowId,
    receiver: broadcast::Receiver<WorkflowEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Wait for the next event. Returns `None` once the reporter is gone.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        "Subscriber {} on workflow {} missed {} events",
                        self.id,
                        self.workflow_id,
                        missed
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, without waiting
    pub fn try_recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(generation: u64) -> WorkflowEvent {
        WorkflowEvent::WorkflowExecutionCancelled { generation }
    }

    #[tokio::test]
    async fn delivers_only_to_matching_workflow() {
        let reporter = StatusReporter::new(16);
        let mut a = reporter.subscribe("wf-a");
        let mut b = reporter.subscribe("wf-b");

        reporter.publish("wf-a", cancelled(1));

        assert_eq!(a.recv().await, Some(cancelled(1)));
        assert_eq!(b.try_recv(), None);
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let reporter = StatusReporter::new(16);
        let mut first = reporter.subscribe("wf");
        let mut second = reporter.subscribe("wf");
        assert_eq!(reporter.subscriber_count("wf"), 2);
        assert_ne!(first.id(), second.id());

        reporter.publish("wf", cancelled(1));
        reporter.publish("wf", cancelled(2));

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await, Some(cancelled(1)));
            assert_eq!(sub.recv().await, Some(cancelled(2)));
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let reporter = StatusReporter::new(4);
        reporter.publish("nobody", cancelled(1));
        assert_eq!(reporter.subscriber_count("nobody"), 0);
    }

    #[test]
    fn last_unsubscribe_drops_the_channel() {
        let reporter = StatusReporter::new(4);
        let first = reporter.subscribe("wf");
        let second = reporter.subscribe("wf");

        reporter.unsubscribe("wf", first);
        assert_eq!(reporter.subscriber_count("wf"), 1);

        reporter.unsubscribe("wf", second);
        assert_eq!(reporter.subscriber_count("wf"), 0);
        assert!(reporter.channels().get("wf").is_none());
    }

    #[test]
    fn dropped_subscription_is_pruned_on_publish() {
        let reporter = StatusReporter::new(4);
        drop(reporter.subscribe("wf"));

        reporter.publish("wf", cancelled(1));
        assert!(reporter.channels().get("wf").is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest_events() {
        let reporter = StatusReporter::new(2);
        let mut sub = reporter.subscribe("wf");

        for generation in 1..=5 {
            reporter.publish("wf", cancelled(generation));
        }

        assert_eq!(sub.recv().await, Some(cancelled(4)));
        assert_eq!(sub.recv().await, Some(cancelled(5)));
    }

    #[tokio::test]
    async fn global_feed_sees_all_workflows() {
        let reporter = StatusReporter::new(8);
        let mut all = reporter.subscribe_all();

        reporter.publish("wf-a", cancelled(1));
        reporter.publish("wf-b", cancelled(2));

        let first = all.recv().await.unwrap();
        let second = all.recv().await.unwrap();
        assert_eq!(first.workflow_id, "wf-a");
        assert_eq!(second.workflow_id, "wf-b");
        assert_eq!(second.event, cancelled(2));
    }
}
