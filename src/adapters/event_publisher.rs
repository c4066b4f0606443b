//! Event Publisher Adapters
//!
//! `LoggingEventPublisher` is the production sink: every PMem mutation ends
//! up as a structured `tracing` record under the `pmemstor::events` target.
//! `InMemoryEventCollector` keeps events for assertions in tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes PMem events to the log.
///
/// Records go to the `pmemstor::events` target at debug level, so
/// `RUST_LOG=pmemstor::events=debug` yields an audit trail of region and
/// namespace changes without the rest of the debug output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let at = event.timestamp();
        match &event {
            DomainEvent::GoalsDeleted { selector, .. } => {
                debug!(target: "pmemstor::events", %at, socket = %selector, "GoalsDeleted");
            }
            DomainEvent::RegionsCreated { selector, .. } => {
                debug!(target: "pmemstor::events", %at, socket = %selector, "RegionsCreated");
            }
            DomainEvent::NamespaceCreated {
                region,
                numa_node,
                size_bytes,
                ..
            } => {
                debug!(
                    target: "pmemstor::events",
                    %at,
                    region = %region,
                    numa_node,
                    size_bytes,
                    "NamespaceCreated"
                );
            }
            DomainEvent::NamespaceRemoved { device, .. } => {
                debug!(target: "pmemstor::events", %at, device = %device, "NamespaceRemoved");
            }
            DomainEvent::PrepareCompleted {
                reset,
                state,
                namespaces,
                reboot_required,
                ..
            } => {
                debug!(
                    target: "pmemstor::events",
                    %at,
                    reset,
                    state = %state,
                    namespaces,
                    reboot_required,
                    "PrepareCompleted"
                );
            }
        }
        Ok(())
    }
}

/// Keeps every published event in memory, in publication order.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events whose `event_type()` is `event_type`.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}
