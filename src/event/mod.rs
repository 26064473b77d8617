//! Event system for operator-facing signals.
//!
//! The coordinator and the scheduler publish what happened to their
//! dispatcher: failed reads, communication mix-ups, cache clears and task
//! outcomes. Subscribing is optional; events without subscribers are dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

/// Which part of the cache was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// Every entry of one unit.
    Device(u8),
    /// The whole cache.
    All,
}

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A task callback returned successfully.
    TaskCompleted { name: String },
    /// A task callback failed.
    TaskFailed { name: String, message: String },
    /// A register read failed.
    ReadFailed {
        unit: u8,
        register: u16,
        message: String,
    },
    /// A response was attributed to the wrong unit.
    MixUpDetected { unit: u8, register: u16 },
    /// Cache entries were removed.
    CacheCleared { scope: CacheScope, entries: usize },
}

/// Event kinds, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TaskCompleted,
    TaskFailed,
    ReadFailed,
    MixUpDetected,
    CacheCleared,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskFailed { .. } => EventKind::TaskFailed,
            Self::ReadFailed { .. } => EventKind::ReadFailed,
            Self::MixUpDetected { .. } => EventKind::MixUpDetected,
            Self::CacheCleared { .. } => EventKind::CacheCleared,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone. Events missed because the
    /// subscriber lagged behind are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter for specific event kinds.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by kind.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter by unit (read failures, mix-ups and device cache clears).
    pub unit: Option<u8>,
}

impl EventFilter {
    /// Creates a filter for specific kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            unit: None,
        }
    }

    /// Restricts the filter to one unit.
    #[must_use]
    pub const fn unit(mut self, unit: u8) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.unit {
            let unit = match event {
                Event::ReadFailed { unit, .. } | Event::MixUpDetected { unit, .. } => Some(*unit),
                Event::CacheCleared {
                    scope: CacheScope::Device(unit),
                    ..
                } => Some(*unit),
                _ => None,
            };
            if unit != Some(expected) {
                return false;
            }
        }

        true
    }
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    if filter.matches(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
