//! Hardware Module
//!
//! Storage-class memory discovery and provisioning.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmemstor::adapters::{LoggingEventPublisher, ProcessExecutor};
//! use pmemstor::hardware::pmem::{PmemConfig, PrepareOrchestrator, PrepareRequest};
//! use pmemstor::metrics::PmemMetrics;
//!
//! # async fn example() -> pmemstor::Result<()> {
//! let orchestrator = PrepareOrchestrator::new(
//!     PmemConfig::default(),
//!     Arc::new(ProcessExecutor::new()),
//!     Arc::new(LoggingEventPublisher::new()),
//!     Arc::new(PmemMetrics::new()?),
//! );
//!
//! let scan = orchestrator.scan().await?;
//! let resp = orchestrator.prepare(&PrepareRequest::default(), &scan).await?;
//! println!("state: {}, reboot: {}", resp.socket_state, resp.reboot_required);
//! # Ok(())
//! # }
//! ```

pub mod pmem;

pub use pmem::{PmemConfig, PrepareOrchestrator, PrepareRequest, PrepareResponse, ScanResult};
