//! Namespace Manager
//!
//! Lists, creates and removes namespaces through the namespace tool, and
//! joins the namespace tool's region view with the region tool's by
//! interleave-set id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::command::CommandRunner;
use super::{
    Namespace, NdctlRegion, Region, SocketSelector, MAX_NAMESPACES_PER_SOCKET,
    MIN_NAMESPACES_PER_SOCKET, NAMESPACE_ALIGNMENT,
};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, Tool, ToolCommand};
use crate::error::{Error, Result, StepContext};
use crate::metrics::PmemMetrics;

/// Namespace-tool region type that can host namespaces.
pub const NDCTL_REGION_TYPE_PMEM: &str = "pmem";

/// Persistence domain of regions backed by the memory controller.
pub const NDCTL_PERSISTENCE_DOMAIN: &str = "memory_controller";

/// Where namespaces for one socket will be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTarget {
    /// Socket the region belongs to
    pub socket_id: u32,
    /// Namespace-tool region handle, e.g. `region0`
    pub region: String,
    /// NUMA node namespaces will land on
    pub numa_node: u32,
    /// Bytes available for namespaces
    pub available: u64,
}

/// Check a requested namespaces-per-socket count.
pub fn validate_namespace_count(count: u32) -> Result<()> {
    if (MIN_NAMESPACES_PER_SOCKET..=MAX_NAMESPACES_PER_SOCKET).contains(&count) {
        Ok(())
    } else {
        Err(Error::InvalidNamespaceCount {
            requested: count,
            min: MIN_NAMESPACES_PER_SOCKET,
            max: MAX_NAMESPACES_PER_SOCKET,
        })
    }
}

/// Size of each namespace when `available` is split `count` ways.
pub fn namespace_size(region: &str, available: u64, count: u32) -> Result<u64> {
    let unaligned = || Error::UnalignedNamespaceSize {
        region: region.to_string(),
        available,
        count,
        alignment: NAMESPACE_ALIGNMENT,
    };

    let count64 = u64::from(count);
    if count64 == 0 || available % count64 != 0 {
        return Err(unaligned());
    }
    let size = available / count64;
    if size % NAMESPACE_ALIGNMENT != 0 {
        return Err(unaligned());
    }
    Ok(size)
}

/// Resolve which namespace-tool region backs each socket's region.
///
/// Every socket is first matched by interleave-set id against regions of the
/// expected type and persistence domain. If any socket fails to match, all
/// matches are discarded and socket N is assumed to be `regionN`, sized by
/// the region tool's free capacity.
pub fn resolve_targets(
    regions_by_socket: &BTreeMap<u32, Region>,
    ndctl_regions: &[NdctlRegion],
) -> Vec<NamespaceTarget> {
    let candidates: Vec<&NdctlRegion> = ndctl_regions
        .iter()
        .filter(|r| {
            r.region_type == NDCTL_REGION_TYPE_PMEM
                && r.persistence_domain.as_deref() == Some(NDCTL_PERSISTENCE_DOMAIN)
        })
        .collect();

    let matched: Option<Vec<NamespaceTarget>> = regions_by_socket
        .iter()
        .map(|(socket_id, region)| {
            let iset_id = region.iset_id?;
            candidates
                .iter()
                .find(|c| c.iset_id == Some(iset_id))
                .map(|c| NamespaceTarget {
                    socket_id: *socket_id,
                    region: c.dev.clone(),
                    numa_node: c.numa_node,
                    available: c.available_size,
                })
        })
        .collect();

    if let Some(targets) = matched {
        return targets;
    }

    warn!("Interleave-set ids did not match for every socket, using socket index as region");
    regions_by_socket
        .iter()
        .map(|(socket_id, region)| NamespaceTarget {
            socket_id: *socket_id,
            region: format!("region{}", socket_id),
            numa_node: *socket_id,
            available: region.free_capacity,
        })
        .collect()
}

/// Parse namespace-tool JSON that may be a single object or an array.
pub fn parse_json_list<T: DeserializeOwned>(json: &str, context: &str) -> Result<Vec<T>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|source| Error::JsonParse {
            context: context.to_string(),
            source,
        })?;
    let value = match value {
        serde_json::Value::Array(_) => value,
        other => serde_json::Value::Array(vec![other]),
    };

    serde_json::from_value(value).map_err(|source| Error::JsonParse {
        context: context.to_string(),
        source,
    })
}

/// Parse a namespace listing.
pub fn parse_namespaces(json: &str) -> Result<Vec<Namespace>> {
    parse_json_list(json, "namespace list")
}

/// Parse a namespace-tool region listing.
pub fn parse_ndctl_regions(json: &str) -> Result<Vec<NdctlRegion>> {
    parse_json_list(json, "ndctl region list")
}

/// Manages namespaces through the namespace tool.
#[derive(Clone)]
pub struct NamespaceManager {
    runner: Arc<CommandRunner>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<PmemMetrics>,
}

impl NamespaceManager {
    pub fn new(
        runner: Arc<CommandRunner>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<PmemMetrics>,
    ) -> Self {
        Self {
            runner,
            events,
            metrics,
        }
    }

    fn numa_scoped(cmd: ToolCommand, selector: SocketSelector) -> ToolCommand {
        match selector.socket_id() {
            Some(node) => cmd.arg("--numa-node").arg(node.to_string()),
            None => cmd,
        }
    }

    /// Namespaces on the selected NUMA node, or on all nodes for `Any`.
    #[instrument(skip(self))]
    pub async fn get_namespaces(&self, selector: SocketSelector) -> Result<Vec<Namespace>> {
        let cmd = Self::numa_scoped(ToolCommand::new(Tool::Ndctl, &["list", "-N", "-v"]), selector);
        let out = self.runner.run(&cmd).await?;
        parse_namespaces(&out)
    }

    /// The namespace tool's own region records.
    #[instrument(skip(self))]
    pub async fn get_ndctl_regions(&self, selector: SocketSelector) -> Result<Vec<NdctlRegion>> {
        let cmd = Self::numa_scoped(ToolCommand::new(Tool::Ndctl, &["list", "-R", "-v"]), selector);
        let out = self.runner.run(&cmd).await?;
        parse_ndctl_regions(&out)
    }

    /// Create `per_socket` equally sized namespaces on every region.
    ///
    /// Returns the NUMA nodes on which at least one namespace was created.
    /// Regions with no available capacity are skipped. Sizes are validated
    /// for every region before any namespace is created.
    #[instrument(skip(self, regions_by_socket), fields(sockets = regions_by_socket.len()))]
    pub async fn create_namespaces(
        &self,
        regions_by_socket: &BTreeMap<u32, Region>,
        per_socket: u32,
    ) -> Result<Vec<u32>> {
        validate_namespace_count(per_socket)?;
        if regions_by_socket.is_empty() {
            return Err(Error::NoRegionsForNamespaces);
        }

        let ndctl_regions = self
            .get_ndctl_regions(SocketSelector::Any)
            .await
            .step("list ndctl regions")?;
        let targets = resolve_targets(regions_by_socket, &ndctl_regions);

        let mut plan = Vec::with_capacity(targets.len());
        for target in targets {
            if target.available == 0 {
                debug!(region = %target.region, "Region has no available capacity, skipping");
                continue;
            }
            let size = namespace_size(&target.region, target.available, per_socket)?;
            plan.push((target, size));
        }

        let mut numa_nodes = BTreeSet::new();
        for (target, size) in plan {
            for _ in 0..per_socket {
                let cmd = ToolCommand::new(
                    Tool::Ndctl,
                    &["create-namespace", "--region", target.region.as_str(), "--size"],
                )
                .arg(size.to_string());
                self.runner.run(&cmd).await?;

                info!(
                    region = %target.region,
                    numa_node = target.numa_node,
                    size,
                    "Created PMem namespace"
                );
                self.metrics.namespaces_created.inc();
                self.events
                    .publish(DomainEvent::namespace_created(
                        target.region.clone(),
                        target.numa_node,
                        size,
                    ))
                    .await?;
                numa_nodes.insert(target.numa_node);
            }
        }

        Ok(numa_nodes.into_iter().collect())
    }

    /// Disable then destroy a namespace.
    #[instrument(skip(self))]
    pub async fn remove_namespace(&self, device: &str) -> Result<()> {
        let disable = ToolCommand::new(Tool::Ndctl, &["disable-namespace", device]);
        self.runner.run(&disable).await?;

        let destroy = ToolCommand::new(Tool::Ndctl, &["destroy-namespace", device]);
        self.runner.run(&destroy).await?;

        info!(device = %device, "Removed PMem namespace");
        self.metrics.namespaces_removed.inc();
        self.events
            .publish(DomainEvent::namespace_removed(device))
            .await
    }
}

impl std::fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceManager")
            .field("runner", &self.runner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, ScriptedExecutor};
    use crate::domain::ports::CommandOutput;
    use crate::hardware::pmem::{PmemConfig, PmemHealth, PmemType};
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const GIB: u64 = 1 << 30;

    const NAMESPACES_JSON: &str = r#"[
  {
    "dev":"namespace1.0",
    "mode":"fsdax",
    "map":"dev",
    "size":3183575302144,
    "uuid":"842fc847-28e0-4bb6-8dfc-d24afdba1528",
    "raw_uuid":"dedb4b28-dc4b-4ccd-b7d1-9bd475c91264",
    "sector_size":512,
    "align":2097152,
    "blockdev":"pmem1",
    "numa_node":1
  },
  {
    "dev":"namespace0.0",
    "mode":"fsdax",
    "map":"dev",
    "size":3183575302144,
    "uuid":"a41e1d3b-7b5d-4e56-8bb5-6c1b4c35e4c4",
    "sector_size":512,
    "align":2097152,
    "blockdev":"pmem0",
    "numa_node":0
  }
]"#;

    fn region(socket_id: u32, free: u64, iset_id: Option<u64>) -> Region {
        Region {
            id: socket_id + 1,
            socket_id,
            pmem_type: PmemType::AppDirect,
            capacity: free,
            free_capacity: free,
            health: PmemHealth::Normal,
            iset_id,
        }
    }

    fn ndctl_region(dev: &str, iset_id: i64, numa_node: u32, available: u64) -> NdctlRegion {
        NdctlRegion {
            dev: dev.to_string(),
            size: available,
            available_size: available,
            iset_id: Some(iset_id as u64),
            numa_node,
            region_type: "pmem".to_string(),
            persistence_domain: Some("memory_controller".to_string()),
        }
    }

    fn by_socket(regions: Vec<Region>) -> BTreeMap<u32, Region> {
        regions.into_iter().map(|r| (r.socket_id, r)).collect()
    }

    fn manager(
        exec: ScriptedExecutor,
    ) -> (
        NamespaceManager,
        Arc<ScriptedExecutor>,
        Arc<InMemoryEventCollector>,
    ) {
        let exec = Arc::new(exec);
        let metrics = Arc::new(PmemMetrics::new().unwrap());
        let runner = Arc::new(CommandRunner::new(
            exec.clone(),
            PmemConfig::default(),
            metrics.clone(),
        ));
        let events = Arc::new(InMemoryEventCollector::new());
        (
            NamespaceManager::new(runner, events.clone(), metrics),
            exec,
            events,
        )
    }

    #[test]
    fn test_parse_namespaces() {
        let namespaces = parse_namespaces(NAMESPACES_JSON).unwrap();
        assert_eq!(namespaces.len(), 2);
        assert_eq!(namespaces[0].name, "namespace1.0");
        assert_eq!(namespaces[0].block_device, "pmem1");
        assert_eq!(namespaces[0].numa_node, 1);
        assert_eq!(namespaces[0].size, 3183575302144);
        assert_eq!(
            namespaces[0].uuid.to_string(),
            "842fc847-28e0-4bb6-8dfc-d24afdba1528"
        );
    }

    #[test]
    fn test_parse_bare_object_matches_array() {
        let object = r#"{"dev":"namespace0.0","blockdev":"pmem0","numa_node":0,"size":1024,"uuid":"a41e1d3b-7b5d-4e56-8bb5-6c1b4c35e4c4"}"#;
        let array = format!("[{}]", object);

        assert_eq!(
            parse_namespaces(object).unwrap(),
            parse_namespaces(&array).unwrap()
        );
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_namespaces("").unwrap().is_empty());
        assert!(parse_namespaces("[]").unwrap().is_empty());
        assert_matches!(parse_namespaces("{nope"), Err(Error::JsonParse { .. }));
        assert_matches!(
            parse_namespaces(r#"[{"dev":"namespace0.0"}]"#),
            Err(Error::JsonParse { .. })
        );
    }

    #[test]
    fn test_namespace_size() {
        assert_eq!(namespace_size("region0", 8 * GIB, 1).unwrap(), 8 * GIB);
        assert_eq!(namespace_size("region0", 8 * GIB, 4).unwrap(), 2 * GIB);
        assert_matches!(
            namespace_size("region0", 8 * GIB, 3),
            Err(Error::UnalignedNamespaceSize { count: 3, .. })
        );
        assert_matches!(
            namespace_size("region0", 3 * NAMESPACE_ALIGNMENT, 2),
            Err(Error::UnalignedNamespaceSize { .. })
        );
    }

    #[test]
    fn test_namespace_size_leaves_no_remainder() {
        // two aligned halves plus one stray byte
        let available = 2 * NAMESPACE_ALIGNMENT + 1;
        assert_matches!(
            namespace_size("region0", available, 2),
            Err(Error::UnalignedNamespaceSize { available: a, count: 2, .. }) if a == available
        );
        assert_eq!(
            namespace_size("region0", 2 * NAMESPACE_ALIGNMENT, 2).unwrap(),
            NAMESPACE_ALIGNMENT
        );
    }

    #[test]
    fn test_resolve_targets_by_iset_id() {
        let regions = by_socket(vec![
            region(0, 10 * GIB, Some(0xb8c1_2120_c7bd_1110)),
            region(1, 10 * GIB, Some(0x4c4a_2120_b2bd_1110)),
        ]);
        let ndctl = vec![
            ndctl_region("region3", 0x4c4a_2120_b2bd_1110, 1, 6 * GIB),
            ndctl_region("region2", 0xb8c1_2120_c7bd_1110u64 as i64, 0, 8 * GIB),
        ];

        let targets = resolve_targets(&regions, &ndctl);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].region, "region2");
        assert_eq!(targets[0].available, 8 * GIB);
        assert_eq!(targets[1].region, "region3");
        assert_eq!(targets[1].numa_node, 1);
    }

    #[test]
    fn test_resolve_targets_falls_back_when_any_socket_misses() {
        let regions = by_socket(vec![
            region(0, 10 * GIB, Some(1)),
            region(1, 12 * GIB, Some(2)),
        ]);
        let ndctl = vec![ndctl_region("region7", 1, 0, 8 * GIB)];

        let targets = resolve_targets(&regions, &ndctl);
        assert_eq!(
            targets,
            vec![
                NamespaceTarget {
                    socket_id: 0,
                    region: "region0".to_string(),
                    numa_node: 0,
                    available: 10 * GIB,
                },
                NamespaceTarget {
                    socket_id: 1,
                    region: "region1".to_string(),
                    numa_node: 1,
                    available: 12 * GIB,
                },
            ]
        );
    }

    #[test]
    fn test_resolve_targets_ignores_wrong_domain() {
        let regions = by_socket(vec![region(0, 10 * GIB, Some(1))]);
        let mut wrong = ndctl_region("region5", 1, 0, 8 * GIB);
        wrong.persistence_domain = Some("cpu_cache".to_string());

        let targets = resolve_targets(&regions, &[wrong]);
        assert_eq!(targets[0].region, "region0");
    }

    #[tokio::test]
    async fn test_create_namespaces_fallback() {
        let (mgr, exec, events) = manager(ScriptedExecutor::new());
        let regions = by_socket(vec![region(0, 8 * GIB, None), region(1, 8 * GIB, None)]);

        let nodes = mgr.create_namespaces(&regions, 2).await.unwrap();
        assert_eq!(nodes, vec![0, 1]);

        let creates = exec.calls_matching("ndctl create-namespace");
        assert_eq!(
            creates,
            vec![
                "ndctl create-namespace --region region0 --size 4294967296",
                "ndctl create-namespace --region region0 --size 4294967296",
                "ndctl create-namespace --region region1 --size 4294967296",
                "ndctl create-namespace --region region1 --size 4294967296",
            ]
        );
        assert_eq!(events.events_of_type("NamespaceCreated").len(), 4);
    }

    #[tokio::test]
    async fn test_create_namespaces_skips_consumed_region() {
        let (mgr, exec, _) = manager(ScriptedExecutor::new());
        let regions = by_socket(vec![region(0, 0, None), region(1, 8 * GIB, None)]);

        let nodes = mgr.create_namespaces(&regions, 1).await.unwrap();
        assert_eq!(nodes, vec![1]);
        assert_eq!(exec.calls_matching("ndctl create-namespace").len(), 1);
    }

    #[tokio::test]
    async fn test_create_namespaces_rejects_before_mutating() {
        let (mgr, exec, _) = manager(ScriptedExecutor::new());
        let regions = by_socket(vec![
            region(0, 8 * GIB, None),
            region(1, 8 * GIB + NAMESPACE_ALIGNMENT, None),
        ]);

        assert_matches!(
            mgr.create_namespaces(&regions, 2).await,
            Err(Error::UnalignedNamespaceSize { ref region, .. }) if region == "region1"
        );
        assert!(exec.calls_matching("ndctl create-namespace").is_empty());
    }

    #[tokio::test]
    async fn test_create_namespaces_no_regions() {
        let (mgr, _, _) = manager(ScriptedExecutor::new());
        assert_matches!(
            mgr.create_namespaces(&BTreeMap::new(), 1).await,
            Err(Error::NoRegionsForNamespaces)
        );
    }

    #[tokio::test]
    async fn test_remove_namespace() {
        let (mgr, exec, events) = manager(ScriptedExecutor::new());
        mgr.remove_namespace("namespace0.0").await.unwrap();

        assert_eq!(
            exec.calls(),
            vec![
                "ndctl disable-namespace namespace0.0",
                "ndctl destroy-namespace namespace0.0",
            ]
        );
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_namespace_disable_fails() {
        let (mgr, exec, _) = manager(ScriptedExecutor::new().on(
            "ndctl disable-namespace",
            CommandOutput::failed("", "device busy"),
        ));

        assert_matches!(
            mgr.remove_namespace("namespace0.0").await,
            Err(Error::CommandFailed { .. })
        );
        assert!(exec.calls_matching("ndctl destroy-namespace").is_empty());
    }

    #[tokio::test]
    async fn test_get_namespaces_numa_scoped() {
        let (mgr, exec, _) = manager(
            ScriptedExecutor::new().on_stdout("ndctl list -N", NAMESPACES_JSON),
        );

        let namespaces = mgr.get_namespaces(SocketSelector::Socket(1)).await.unwrap();
        assert_eq!(namespaces.len(), 2);
        assert_eq!(exec.calls(), vec!["ndctl list -N -v --numa-node 1"]);
    }

    #[tokio::test]
    async fn test_missing_ndctl() {
        let (mgr, exec, _) = manager(ScriptedExecutor::new().without_binary("ndctl"));
        assert_matches!(
            mgr.get_namespaces(SocketSelector::Any).await,
            Err(Error::NdctlMissing { .. })
        );
        assert!(exec.calls().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_count_outside_range_rejected(count in prop_oneof![Just(0u32), 5u32..1000]) {
            let (mgr, exec, _) = manager(ScriptedExecutor::new());
            let regions = by_socket(vec![region(0, 8 * GIB, None)]);

            let res = tokio_test::block_on(mgr.create_namespaces(&regions, count));
            let is_invalid = matches!(res, Err(Error::InvalidNamespaceCount { .. }));
            prop_assert!(is_invalid);
            prop_assert!(exec.calls().is_empty());
        }

        #[test]
        fn prop_unaligned_capacity_rejected(
            count in 1u32..=4,
            chunks in 1u64..4096,
            offset in 1u64..NAMESPACE_ALIGNMENT,
        ) {
            let available = chunks * NAMESPACE_ALIGNMENT * u64::from(count) + offset;
            prop_assert!(namespace_size("region0", available, count).is_err());
        }
    }
}
