//! Metrics module
//!
//! Prometheus metrics for PMem preparation. Each invocation of the binary is
//! short lived, so metrics live in a private registry and are exported by
//! writing the text exposition format to a node-exporter textfile-collector
//! path rather than by serving them.

use std::path::Path;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::error::{Error, Result};

/// Metrics collected while inspecting and preparing PMem.
#[derive(Clone)]
pub struct PmemMetrics {
    registry: Registry,
    /// Tool invocations by tool and outcome
    pub tool_commands: IntCounterVec,
    /// Namespaces created
    pub namespaces_created: IntCounter,
    /// Namespaces disabled and destroyed
    pub namespaces_removed: IntCounter,
    /// AppDirect region goals created
    pub region_goals_created: IntCounter,
    /// Current PMem state, one series per state set to 1
    pub socket_state: IntGaugeVec,
}

impl PmemMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tool_commands = IntCounterVec::new(
            Opts::new("pmem_tool_commands_total", "Total number of PMem tool invocations"),
            &["tool", "outcome"],
        )
        .map_err(metrics_error)?;
        let namespaces_created = IntCounter::new(
            "pmem_namespaces_created_total",
            "Total number of PMem namespaces created",
        )
        .map_err(metrics_error)?;
        let namespaces_removed = IntCounter::new(
            "pmem_namespaces_removed_total",
            "Total number of PMem namespaces removed",
        )
        .map_err(metrics_error)?;
        let region_goals_created = IntCounter::new(
            "pmem_region_goals_created_total",
            "Total number of AppDirect region goals created",
        )
        .map_err(metrics_error)?;
        let socket_state = IntGaugeVec::new(
            Opts::new("pmem_socket_state", "Current PMem state"),
            &["state"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(tool_commands.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(namespaces_created.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(namespaces_removed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(region_goals_created.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(socket_state.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            tool_commands,
            namespaces_created,
            namespaces_removed,
            region_goals_created,
            socket_state,
        })
    }

    /// Count one tool invocation.
    pub fn record_command(&self, tool: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.tool_commands.with_label_values(&[tool, outcome]).inc();
    }

    /// Record the current state, clearing any previous one.
    pub fn set_state(&self, state: &str) {
        self.socket_state.reset();
        self.socket_state.with_label_values(&[state]).set(1);
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {}", e)))
    }

    /// Write the rendered metrics to `path`, replacing it atomically.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.render()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Wrote metrics textfile");
        Ok(())
    }
}

impl std::fmt::Debug for PmemMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmemMetrics")
            .field("namespaces_created", &self.namespaces_created.get())
            .field("region_goals_created", &self.region_goals_created.get())
            .finish()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_command() {
        let metrics = PmemMetrics::new().unwrap();
        metrics.record_command("ipmctl", true);
        metrics.record_command("ipmctl", true);
        metrics.record_command("ndctl", false);

        assert_eq!(
            metrics
                .tool_commands
                .with_label_values(&["ipmctl", "success"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .tool_commands
                .with_label_values(&["ndctl", "failure"])
                .get(),
            1
        );
    }

    #[test]
    fn test_set_state_replaces_previous() {
        let metrics = PmemMetrics::new().unwrap();
        metrics.set_state("FreeCapacity");
        metrics.set_state("NoFreeCapacity");

        let text = metrics.render().unwrap();
        assert!(text.contains("pmem_socket_state{state=\"NoFreeCapacity\"} 1"));
        assert!(!text.contains("state=\"FreeCapacity\""));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PmemMetrics::new().unwrap();
        let b = PmemMetrics::new().unwrap();
        a.namespaces_created.inc();
        assert_eq!(b.namespaces_created.get(), 0);
    }

    #[test]
    fn test_write_textfile() {
        let metrics = PmemMetrics::new().unwrap();
        metrics.region_goals_created.inc();

        let path = std::env::temp_dir().join(format!("pmemstor-test-{}.prom", std::process::id()));
        metrics.write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("pmem_region_goals_created_total 1"));
        std::fs::remove_file(&path).unwrap();
    }
}
