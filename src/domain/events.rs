//! Domain Events
//!
//! This module defines domain events that represent significant occurrences
//! while preparing PMem. Events are immutable records of things that have
//! happened to regions and namespaces on this host.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::namespace_created("region0", 0, 1 << 30);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Region Events
    // =========================================================================
    /// Pending allocation goals were deleted.
    GoalsDeleted {
        selector: String,
        timestamp: DateTime<Utc>,
    },

    /// An AppDirect interleaved region goal was created.
    RegionsCreated {
        selector: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Namespace Events
    // =========================================================================
    /// A namespace was created on a region.
    NamespaceCreated {
        region: String,
        numa_node: u32,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// A namespace was disabled and destroyed.
    NamespaceRemoved {
        device: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Lifecycle Events
    // =========================================================================
    /// A prepare or reset finished.
    PrepareCompleted {
        reset: bool,
        state: String,
        namespaces: usize,
        reboot_required: bool,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::GoalsDeleted { timestamp, .. } => *timestamp,
            DomainEvent::RegionsCreated { timestamp, .. } => *timestamp,
            DomainEvent::NamespaceCreated { timestamp, .. } => *timestamp,
            DomainEvent::NamespaceRemoved { timestamp, .. } => *timestamp,
            DomainEvent::PrepareCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::GoalsDeleted { .. } => "GoalsDeleted",
            DomainEvent::RegionsCreated { .. } => "RegionsCreated",
            DomainEvent::NamespaceCreated { .. } => "NamespaceCreated",
            DomainEvent::NamespaceRemoved { .. } => "NamespaceRemoved",
            DomainEvent::PrepareCompleted { .. } => "PrepareCompleted",
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create a GoalsDeleted event.
    pub fn goals_deleted(selector: impl ToString) -> Self {
        DomainEvent::GoalsDeleted {
            selector: selector.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a RegionsCreated event.
    pub fn regions_created(selector: impl ToString) -> Self {
        DomainEvent::RegionsCreated {
            selector: selector.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a NamespaceCreated event.
    pub fn namespace_created(region: impl Into<String>, numa_node: u32, size_bytes: u64) -> Self {
        DomainEvent::NamespaceCreated {
            region: region.into(),
            numa_node,
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Create a NamespaceRemoved event.
    pub fn namespace_removed(device: impl Into<String>) -> Self {
        DomainEvent::NamespaceRemoved {
            device: device.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a PrepareCompleted event.
    pub fn prepare_completed(
        reset: bool,
        state: impl ToString,
        namespaces: usize,
        reboot_required: bool,
    ) -> Self {
        DomainEvent::PrepareCompleted {
            reset,
            state: state.to_string(),
            namespaces,
            reboot_required,
            timestamp: Utc::now(),
        }
    }
}
