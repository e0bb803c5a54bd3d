//! Fan-out of parsed events to independent consumer queues
//!
//! Every consumer owns an unbounded queue obtained from [`Broadcaster::queue`]
//! and registers it for the event types it wants, or for [`EventType::Any`]
//! to receive everything. Emitting never waits on a consumer: a slow
//! consumer only grows its own queue.

use log::debug;
use shared::{Event, EventType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

pub type EventReceiver = mpsc::UnboundedReceiver<Arc<Event>>;

/// Sending half of a consumer queue.
///
/// Queues are identified by the id assigned when they were created, so two
/// handles compare equal only if they feed the same receiver.
#[derive(Debug, Clone)]
pub struct EventQueue {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<Event>>,
}

impl EventQueue {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for EventQueue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventQueue {}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("queue {queue} is already registered for {event_type}")]
    DuplicateRegistration { queue: u64, event_type: EventType },
}

/// Registry of consumer queues keyed by event type
#[derive(Debug, Default)]
pub struct Broadcaster {
    next_queue_id: AtomicU64,
    consumers: RwLock<HashMap<EventType, Vec<EventQueue>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new consumer queue. It receives nothing until registered
    /// with [`Broadcaster::consume`].
    pub fn queue(&self) -> (EventQueue, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_queue_id.fetch_add(1, Ordering::Relaxed) + 1;
        (EventQueue { id, sender }, receiver)
    }

    /// Registers `queue` under each of `event_types`.
    ///
    /// Registration is all or nothing: if the queue is already present in
    /// any of the listed buckets nothing is added and
    /// [`BroadcastError::DuplicateRegistration`] names the first clash.
    pub async fn consume(
        &self,
        queue: &EventQueue,
        event_types: &[EventType],
    ) -> Result<(), BroadcastError> {
        let mut consumers = self.consumers.write().await;

        for (index, event_type) in event_types.iter().enumerate() {
            let registered = consumers
                .get(event_type)
                .is_some_and(|queues| queues.contains(queue));
            if registered || event_types[..index].contains(event_type) {
                return Err(BroadcastError::DuplicateRegistration {
                    queue: queue.id,
                    event_type: *event_type,
                });
            }
        }

        for event_type in event_types {
            consumers
                .entry(*event_type)
                .or_default()
                .push(queue.clone());
        }

        debug!("Queue {} registered for {:?}", queue.id, event_types);
        Ok(())
    }

    /// Removes `queue` from every bucket it was registered in. Calling this
    /// for an unknown queue does nothing.
    pub async fn unregister_consumer(&self, queue: &EventQueue) {
        let mut consumers = self.consumers.write().await;
        for queues in consumers.values_mut() {
            queues.retain(|registered| registered != queue);
        }
        consumers.retain(|_, queues| !queues.is_empty());
        debug!("Queue {} unregistered", queue.id);
    }

    /// Hands `event` to every queue registered for its type and to every
    /// catch-all queue, once per queue. Returns the number of queues that
    /// accepted it.
    pub async fn emit(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let consumers = self.consumers.read().await;

        let typed = consumers
            .get(&event.event_type)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let catch_all = consumers
            .get(&EventType::Any)
            .map(Vec::as_slice)
            .unwrap_or_default();

        // A queue registered both ways still gets one copy
        let mut delivered = 0;
        for queue in typed
            .iter()
            .chain(catch_all.iter().filter(|queue| !typed.contains(*queue)))
        {
            match queue.sender.send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(_) => debug!("Queue {} closed, dropping {}", queue.id, event.event_type),
            }
        }
        delivered
    }

    /// Number of queues registered directly under `event_type`
    pub async fn consumer_count(&self, event_type: EventType) -> usize {
        let consumers = self.consumers.read().await;
        consumers.get(&event_type).map_or(0, Vec::len)
    }
}
