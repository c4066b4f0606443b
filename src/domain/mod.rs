//! Domain Layer
//!
//! This module contains the ports the PMem layer depends on and the events
//! it emits.
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for external dependencies
//! - **Events** (`events.rs`) - Domain events for audit and decoupling
//!
//! # Usage
//!
//! ```ignore
//! use pmemstor::domain::ports::{CommandExecutor, Tool, ToolCommand};
//!
//! async fn version<E: CommandExecutor>(exec: &E) -> Result<String> {
//!     let cmd = ToolCommand::new(Tool::Ipmctl, &["version"]);
//!     Ok(exec.execute(cmd.tool.binary(), &cmd.args).await?.stdout)
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::DomainEvent;
pub use ports::{CommandExecutor, CommandOutput, EventPublisher, Tool, ToolCommand};
