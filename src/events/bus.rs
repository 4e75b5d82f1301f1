//! Synchronous in-process fan-out of prompt change events.
//!
//! [`ChangeEventBus`] is created once by the app and shared via
//! `Arc<ChangeEventBus>`. Observers run on the emitting task, in subscription
//! order, before [`ChangeEventBus::emit`] returns. A failing or panicking
//! observer is logged and skipped.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

use crate::model::Prompt;

/// A mutation of the primary store that has been persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEvent {
    PromptCreated(Prompt),
    PromptUpdated(Prompt),
    PromptDeleted { id: String },
}

impl ChangeEvent {
    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::PromptCreated(_) => "PROMPT_CREATED",
            ChangeEvent::PromptUpdated(_) => "PROMPT_UPDATED",
            ChangeEvent::PromptDeleted { .. } => "PROMPT_DELETED",
        }
    }

    pub fn prompt_id(&self) -> &str {
        match self {
            ChangeEvent::PromptCreated(prompt) | ChangeEvent::PromptUpdated(prompt) => &prompt.id,
            ChangeEvent::PromptDeleted { id } => id,
        }
    }
}

/// Receiver of change events
pub trait ChangeObserver: Send + Sync {
    fn on_event(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

impl<F> ChangeObserver for F
where
    F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Observer that traces every event
pub struct LoggingObserver;

impl ChangeObserver for LoggingObserver {
    fn on_event(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        debug!("{} {}", event.event_type(), event.prompt_id());
        Ok(())
    }
}

/// Handle returned by [`ChangeEventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ChangeEventBus {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ChangeObserver>)>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
}

impl ChangeEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it receives every event emitted afterwards
    pub fn subscribe<O>(&self, observer: O) -> SubscriptionId
    where
        O: ChangeObserver + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers
            .read()
            .map(|observers| observers.len())
            .unwrap_or_default()
    }

    /// Total events emitted since creation
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every observer in subscription order.
    ///
    /// The observer list is cloned first, so observers may subscribe or
    /// unsubscribe while handling an event.
    pub fn emit(&self, event: ChangeEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let observers: Vec<_> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for (id, observer) in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    "Observer {:?} failed on {} {}: {:#}",
                    id,
                    event.event_type(),
                    event.prompt_id(),
                    err
                ),
                Err(_) => error!(
                    "Observer {:?} panicked on {} {}",
                    id,
                    event.event_type(),
                    event.prompt_id()
                ),
            }
        }
    }
}
