//! Task-context event queue fed from interrupt context.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::dio::DeferredEvent;

/// Events the queue can hold before `post` starts failing.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Identifies the packet queue a [`Event::Packets`] notification belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueId(pub u8);

/// Work deferred to the consumer task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A DIO line fired and is masked until acknowledged.
    Line(DeferredEvent),
    /// A packet queue went from empty to non-empty.
    Packets(QueueId),
}

/// Bounded multi-producer queue drained by a single task.
pub struct EventQueue {
    channel: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueues without blocking. Safe to call from interrupt context.
    ///
    /// Gives the event back when the queue is full.
    pub fn post(&self, event: Event) -> Result<(), Event> {
        self.channel.try_send(event).map_err(|err| match err {
            embassy_sync::channel::TrySendError::Full(event) => event,
        })
    }

    /// Waits for the next event.
    pub async fn wait(&self) -> Event {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_returns_the_event() {
        let queue = EventQueue::new();
        for i in 0..EVENT_QUEUE_DEPTH {
            queue.post(Event::Packets(QueueId(i as u8))).unwrap();
        }
        let extra = Event::Packets(QueueId(0xFF));
        assert_eq!(queue.post(extra), Err(extra));
        assert_eq!(queue.len(), EVENT_QUEUE_DEPTH);
    }

    #[test]
    fn events_come_out_in_order() {
        let queue = EventQueue::new();
        queue.post(Event::Packets(QueueId(1))).unwrap();
        queue.post(Event::Packets(QueueId(2))).unwrap();

        assert_eq!(
            embassy_futures::block_on(queue.wait()),
            Event::Packets(QueueId(1))
        );
        assert_eq!(queue.try_next(), Some(Event::Packets(QueueId(2))));
        assert_eq!(queue.try_next(), None);
        assert!(queue.is_empty());
    }
}
