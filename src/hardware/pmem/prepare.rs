//! Prepare Orchestrator
//!
//! The prepare/reset state machine. Every call re-derives state from live
//! tool output, so a call that fails half way can simply be repeated.
//!
//! ```text
//!                 prep                          prep_reset
//!  NoRegions ───────────► (create goal, reboot)     ▲
//!  FreeCapacity ────────► NoFreeCapacity            │ destroy namespaces,
//!  NoFreeCapacity ──────► NoFreeCapacity            │ create goal, reboot
//!  offending ───────────► fault                 any state but NoRegions
//! ```

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::command::CommandRunner;
use super::namespace::{validate_namespace_count, NamespaceManager};
use super::region::{map_regions_to_socket, RegionInspector};
use super::state::get_pmem_state;
use super::verify::verify_namespaces;
use super::{
    Namespace, PmemConfig, PmemState, PrepareRequest, PrepareResponse, Region, ScanResult,
    SocketSelector, SocketState,
};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{CommandExecutor, EventPublisher, Tool, ToolCommand};
use crate::error::{Error, Result, StepContext};
use crate::metrics::PmemMetrics;

/// Namespaces per socket when a request does not say.
pub const DEFAULT_NAMESPACES_PER_SOCKET: u32 = 1;

/// Drives scan, prepare and reset of the PMem on this host.
pub struct PrepareOrchestrator {
    runner: Arc<CommandRunner>,
    regions: RegionInspector,
    namespaces: NamespaceManager,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<PmemMetrics>,
}

impl PrepareOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: PmemConfig,
        executor: Arc<dyn CommandExecutor>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<PmemMetrics>,
    ) -> Self {
        let runner = Arc::new(CommandRunner::new(executor, config, metrics.clone()));
        Self {
            regions: RegionInspector::new(runner.clone()),
            namespaces: NamespaceManager::new(runner.clone(), events.clone(), metrics.clone()),
            runner,
            events,
            metrics,
        }
    }

    /// Region inspector sharing this orchestrator's runner.
    pub fn regions(&self) -> &RegionInspector {
        &self.regions
    }

    /// Namespace manager sharing this orchestrator's runner.
    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// Snapshot modules, namespaces and the system-wide state.
    ///
    /// A region layout that cannot be classified is reported as `Unknown`
    /// rather than failing the scan, so that a reset can still be driven
    /// from the result.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanResult> {
        let modules = self.regions.get_modules().await.step("list modules")?;
        if modules.is_empty() {
            info!("No PMem modules found");
            self.metrics.set_state(&PmemState::NoModules.to_string());
            return Ok(ScanResult::no_modules());
        }

        let regions = self
            .regions
            .get_regions(SocketSelector::Any)
            .await
            .step("list regions")?;
        let state = get_pmem_state(&regions).unwrap_or_else(|e| {
            warn!(error = %e, "Unable to classify PMem regions");
            SocketState::new(PmemState::Unknown, None)
        });

        let namespaces = if regions.is_empty() {
            Vec::new()
        } else {
            self.namespaces
                .get_namespaces(SocketSelector::Any)
                .await
                .step("list namespaces")?
        };

        info!(
            modules = modules.len(),
            regions = regions.len(),
            namespaces = namespaces.len(),
            state = %state,
            "PMem scan complete"
        );
        self.metrics.set_state(&state.state.to_string());

        Ok(ScanResult {
            modules,
            namespaces,
            state,
        })
    }

    // =========================================================================
    // Prepare
    // =========================================================================

    /// Prepare or reset, as the request asks.
    pub async fn prepare(
        &self,
        req: &PrepareRequest,
        scan: &ScanResult,
    ) -> Result<PrepareResponse> {
        if req.reset {
            self.prep_reset(req, scan).await
        } else {
            self.prep(req, scan).await
        }
    }

    /// Move PMem towards fully consumed AppDirect namespaces.
    ///
    /// Creates regions when there are none (a reboot is then required before
    /// the next call), creates namespaces on free regions, and leaves fully
    /// consumed regions alone.
    #[instrument(skip(self, scan))]
    pub async fn prep(&self, req: &PrepareRequest, scan: &ScanResult) -> Result<PrepareResponse> {
        if scan.modules.is_empty() {
            info!("No PMem modules, nothing to prepare");
            return Ok(PrepareResponse::new(SocketState::new(PmemState::NoModules, None)));
        }

        let selector = SocketSelector::from(req.socket_id);
        let per_socket = req
            .namespaces_per_socket
            .unwrap_or(DEFAULT_NAMESPACES_PER_SOCKET);
        validate_namespace_count(per_socket)?;

        let regions = self
            .regions
            .get_regions(selector)
            .await
            .step("list regions")?;
        let state = get_pmem_state(&regions)?;
        info!(selector = %selector, state = %state, "PMem state before prepare");

        if let Some(fault) = state.fault() {
            self.metrics.set_state(&state.state.to_string());
            return Err(fault);
        }

        self.delete_goals(selector).await?;

        let (resp, region_count) = match state.state {
            PmemState::NoRegions => {
                self.create_regions().await?;
                let mut resp = PrepareResponse::new(state);
                resp.reboot_required = true;
                (resp, 0)
            }
            PmemState::FreeCapacity => {
                self.create_namespaces(selector, &regions, per_socket).await?
            }
            PmemState::NoFreeCapacity => {
                let mut resp = PrepareResponse::new(state);
                resp.namespaces = namespaces_on(selector, &scan.namespaces);
                (resp, regions.len())
            }
            other => {
                return Err(Error::UnexpectedState {
                    operation: "prepare".to_string(),
                    expected: "NoRegions, FreeCapacity or NoFreeCapacity".to_string(),
                    actual: other.to_string(),
                })
            }
        };

        verify_namespaces(&resp, region_count, per_socket)?;
        self.finish(false, &resp).await?;
        Ok(resp)
    }

    /// Tear PMem back down to fresh, interleaved AppDirect regions.
    ///
    /// Proceeds whatever state the regions are in, including states `prep`
    /// refuses. A system without regions is left as it is.
    #[instrument(skip(self, scan))]
    pub async fn prep_reset(
        &self,
        req: &PrepareRequest,
        scan: &ScanResult,
    ) -> Result<PrepareResponse> {
        if scan.modules.is_empty() {
            info!("No PMem modules, nothing to reset");
            return Ok(PrepareResponse::new(SocketState::new(PmemState::NoModules, None)));
        }

        let selector = SocketSelector::from(req.socket_id);
        let regions = self
            .regions
            .get_regions(selector)
            .await
            .step("list regions")?;
        let state = get_pmem_state(&regions).unwrap_or_else(|e| {
            warn!(error = %e, "PMem state unknown, resetting anyway");
            SocketState::new(PmemState::UnknownMode, None)
        });
        info!(selector = %selector, state = %state, "PMem state before reset");

        self.delete_goals(selector).await?;

        let mut resp = PrepareResponse::new(state);
        if state.state == PmemState::NoRegions {
            info!("No PMem regions, nothing to reset");
            self.finish(true, &resp).await?;
            return Ok(resp);
        }

        for ns in &scan.namespaces {
            self.namespaces
                .remove_namespace(&ns.name)
                .await
                .step(&format!("remove namespace {}", ns.name))?;
        }

        self.create_regions().await?;
        resp.reboot_required = true;

        self.finish(true, &resp).await?;
        Ok(resp)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn delete_goals(&self, selector: SocketSelector) -> Result<()> {
        let cmd = ToolCommand::new(Tool::Ipmctl, &["delete", "-f", "-goal"]);
        self.runner
            .run_socket_aware(selector, &cmd)
            .await
            .step("delete pending goals")?;
        self.events.publish(DomainEvent::goals_deleted(selector)).await
    }

    /// Interleave-mode changes must cover every socket, so region goals are
    /// never socket scoped.
    async fn create_regions(&self) -> Result<()> {
        let cmd = ToolCommand::new(
            Tool::Ipmctl,
            &["create", "-f", "-goal", "PersistentMemoryType=AppDirect"],
        );
        self.runner.run(&cmd).await.step("create regions")?;

        info!("Created AppDirect region goal, reboot required");
        self.metrics.region_goals_created.inc();
        self.events
            .publish(DomainEvent::regions_created(SocketSelector::Any))
            .await
    }

    async fn create_namespaces(
        &self,
        selector: SocketSelector,
        regions: &[Region],
        per_socket: u32,
    ) -> Result<(PrepareResponse, usize)> {
        let by_socket = map_regions_to_socket(regions)?;
        let nodes = self
            .namespaces
            .create_namespaces(&by_socket, per_socket)
            .await
            .step("create namespaces")?;

        if nodes.is_empty() {
            return Err(Error::UnexpectedState {
                operation: "create namespaces".to_string(),
                expected: "namespaces on at least one NUMA node".to_string(),
                actual: "none created".to_string(),
            });
        }
        if selector != SocketSelector::Any && nodes.len() != 1 {
            return Err(Error::UnexpectedState {
                operation: "create namespaces".to_string(),
                expected: format!("namespaces on socket {} only", selector),
                actual: format!("namespaces on NUMA nodes {:?}", nodes),
            });
        }

        let regions = self
            .regions
            .get_regions(selector)
            .await
            .step("list regions after namespace creation")?;
        let state = get_pmem_state(&regions)?;
        if state.state != PmemState::NoFreeCapacity {
            return Err(Error::UnexpectedState {
                operation: "create namespaces".to_string(),
                expected: PmemState::NoFreeCapacity.to_string(),
                actual: state.state.to_string(),
            });
        }

        let mut resp = PrepareResponse::new(state);
        resp.namespaces = self
            .namespaces
            .get_namespaces(selector)
            .await
            .step("list namespaces after creation")?;
        Ok((resp, regions.len()))
    }

    async fn finish(&self, reset: bool, resp: &PrepareResponse) -> Result<()> {
        info!(
            reset,
            state = %resp.socket_state,
            namespaces = resp.namespaces.len(),
            reboot_required = resp.reboot_required,
            "PMem preparation complete"
        );
        self.metrics.set_state(&resp.socket_state.state.to_string());
        self.events
            .publish(DomainEvent::prepare_completed(
                reset,
                resp.socket_state,
                resp.namespaces.len(),
                resp.reboot_required,
            ))
            .await
    }
}

impl std::fmt::Debug for PrepareOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepareOrchestrator")
            .field("runner", &self.runner)
            .finish()
    }
}

/// Namespaces on the selected socket's NUMA node.
fn namespaces_on(selector: SocketSelector, namespaces: &[Namespace]) -> Vec<Namespace> {
    namespaces
        .iter()
        .filter(|ns| selector.socket_id().map_or(true, |id| ns.numa_node == id))
        .cloned()
        .collect()
}
