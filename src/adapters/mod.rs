//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │            CommandExecutor │ EventPublisher                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ ProcessExecutor │ ScriptedExecutor                         │ │
//! │  │ LoggingEventPublisher │ InMemoryEventCollector             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pmemstor::adapters::ProcessExecutor;
//! use pmemstor::domain::ports::CommandExecutor;
//!
//! let exec = ProcessExecutor::new();
//! let out = exec.execute("ipmctl", &["version".to_string()]).await?;
//! ```

mod event_publisher;
mod process;
mod scripted;

pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
pub use process::ProcessExecutor;
pub use scripted::ScriptedExecutor;
