//! pmemstor - PMem Region and Namespace Preparation
//!
//! Discovers, classifies and reconfigures persistent memory (PMem/SCM) on a
//! storage server so that it can be consumed as AppDirect namespaces.
//!
//! # Architecture
//!
//! The crate reconciles two independently versioned vendor tools, the
//! region tool (`ipmctl`) and the namespace tool (`ndctl`), behind a single
//! command port:
//!
//! ```text
//! scan → classify → prepare / reset → verify
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`domain`] - Domain layer with ports and events (DDD)
//! - [`error`] - Error types
//! - [`hardware`] - PMem discovery and the prepare state machine
//! - [`metrics`] - Prometheus metrics integration

pub mod adapters;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod metrics;

// Re-export commonly used types
pub use error::{Error, Result};
pub use hardware::pmem::{
    PmemConfig, PmemState, PrepareOrchestrator, PrepareRequest, PrepareResponse, ScanResult,
    SocketSelector, SocketState,
};
pub use metrics::PmemMetrics;
