//! Region Inspector
//!
//! Queries the region tool for regions and modules and parses its XML
//! output. A handful of well-known plain-text replies stand in for XML when
//! there is nothing to report; they are matched through [`SENTINELS`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use super::command::{command_failed, socket_command, CommandRunner};
use super::{
    parse_byte_size, parse_tool_number, Module, PmemHealth, PmemType, Region, SocketSelector,
};
use crate::domain::ports::{CommandOutput, Tool, ToolCommand};
use crate::error::{Error, Result};

// =============================================================================
// Sentinels
// =============================================================================

/// Outcome of a recognised plain-text reply from the region tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Tool needs root
    NoPermissions,
    /// No PMem modules installed
    NoModules,
    /// Modules present but no regions configured
    NoRegions,
    /// No regions on the requested socket
    NoRegionsOnSocket,
}

/// Recognised replies, matched case-insensitively as substrings of the
/// combined stdout and stderr. Earlier entries win.
pub const SENTINELS: &[(&str, Sentinel)] = &[
    ("requires root privileges", Sentinel::NoPermissions),
    ("requires root access", Sentinel::NoPermissions),
    ("no pmem modules in the system", Sentinel::NoModules),
    ("no dimms in the system", Sentinel::NoModules),
    ("no regions defined in the system", Sentinel::NoRegions),
    ("no regions defined on the socket", Sentinel::NoRegionsOnSocket),
    ("no regions exist on the socket", Sentinel::NoRegionsOnSocket),
];

/// Find the first sentinel present in the tool's output.
pub fn match_sentinel(out: &CommandOutput) -> Option<Sentinel> {
    let text = format!("{}\n{}", out.stdout, out.stderr).to_lowercase();
    SENTINELS
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, sentinel)| *sentinel)
}

// =============================================================================
// XML Schema
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegionListXml {
    #[serde(rename = "Region", default)]
    regions: Vec<RegionXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegionXml {
    #[serde(rename = "RegionID")]
    region_id: String,
    #[serde(rename = "SocketID")]
    socket_id: String,
    persistent_memory_type: String,
    capacity: String,
    free_capacity: String,
    #[serde(default)]
    health_state: String,
    #[serde(rename = "ISetID", default)]
    iset_id: Option<String>,
}

impl RegionXml {
    fn into_region(self) -> Result<Region> {
        let iset_id = match self.iset_id.as_deref().map(str::trim) {
            None | Some("") | Some("N/A") => None,
            Some(id) => Some(parse_tool_number(id)?),
        };

        Ok(Region {
            id: to_u32(parse_tool_number(&self.region_id)?)?,
            socket_id: to_u32(parse_tool_number(&self.socket_id)?)?,
            pmem_type: PmemType::from(self.persistent_memory_type.as_str()),
            capacity: parse_byte_size(&self.capacity)?,
            free_capacity: parse_byte_size(&self.free_capacity)?,
            health: PmemHealth::from(self.health_state.as_str()),
            iset_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DimmListXml {
    #[serde(rename = "Dimm", default)]
    dimms: Vec<DimmXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DimmXml {
    #[serde(rename = "DimmID")]
    dimm_id: String,
    #[serde(rename = "DimmUID", default)]
    dimm_uid: String,
    #[serde(rename = "SocketID")]
    socket_id: String,
    #[serde(rename = "PhysicalID", default)]
    physical_id: Option<String>,
    #[serde(rename = "MemControllerID", default)]
    mem_controller_id: Option<String>,
    #[serde(rename = "ChannelID", default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel_pos: Option<String>,
    capacity: String,
    #[serde(default)]
    health_state: String,
    #[serde(rename = "FWVersion", default)]
    fw_version: String,
}

impl DimmXml {
    fn into_module(self) -> Result<Module> {
        let opt = |v: &Option<String>| -> Result<u32> {
            match v.as_deref() {
                Some(s) => to_u32(parse_tool_number(s)?),
                None => Ok(0),
            }
        };

        Ok(Module {
            physical_id: opt(&self.physical_id)?,
            controller_id: opt(&self.mem_controller_id)?,
            channel_id: opt(&self.channel_id)?,
            channel_position: opt(&self.channel_pos)?,
            socket_id: to_u32(parse_tool_number(&self.socket_id)?)?,
            capacity: parse_byte_size(&self.capacity)?,
            dimm_id: self.dimm_id.trim().to_string(),
            uid: self.dimm_uid.trim().to_string(),
            health: self.health_state.trim().to_string(),
            firmware_version: self.fw_version.trim().to_string(),
        })
    }
}

fn to_u32(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::RegionParse(format!("value {} out of range", v)))
}

/// Parse region-list XML into regions.
pub fn parse_regions(xml: &str) -> Result<Vec<Region>> {
    let list: RegionListXml =
        quick_xml::de::from_str(xml).map_err(|e| Error::RegionParse(e.to_string()))?;
    list.regions.into_iter().map(RegionXml::into_region).collect()
}

/// Parse module-list XML into modules.
pub fn parse_modules(xml: &str) -> Result<Vec<Module>> {
    let list: DimmListXml =
        quick_xml::de::from_str(xml).map_err(|e| Error::RegionParse(e.to_string()))?;
    list.dimms.into_iter().map(DimmXml::into_module).collect()
}

// =============================================================================
// Inspector
// =============================================================================

/// Reads regions and modules through the region tool.
#[derive(Debug, Clone)]
pub struct RegionInspector {
    runner: Arc<CommandRunner>,
}

impl RegionInspector {
    pub fn new(runner: Arc<CommandRunner>) -> Self {
        Self { runner }
    }

    /// Command listing regions as XML.
    pub fn show_regions_command() -> ToolCommand {
        ToolCommand::new(Tool::Ipmctl, &["show", "-o", "nvmxml", "-region"])
    }

    /// Command listing modules as XML.
    pub fn show_modules_command() -> ToolCommand {
        ToolCommand::new(Tool::Ipmctl, &["show", "-o", "nvmxml", "-a", "-dimm"])
    }

    /// Regions on the selected socket, or on every socket for `Any`.
    #[instrument(skip(self))]
    pub async fn get_regions(&self, selector: SocketSelector) -> Result<Vec<Region>> {
        let cmd = socket_command(selector, &Self::show_regions_command());
        let out = self.runner.run_output(&cmd).await?;

        match match_sentinel(&out) {
            Some(Sentinel::NoPermissions) => return Err(Error::NoCliPermissions),
            Some(Sentinel::NoModules) => return Err(Error::NoPmemModules),
            Some(Sentinel::NoRegions) | Some(Sentinel::NoRegionsOnSocket) => {
                debug!(selector = %selector, "No PMem regions");
                return Ok(Vec::new());
            }
            None => {}
        }

        if !out.success {
            return Err(command_failed(&cmd, &out));
        }
        if out.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let regions = parse_regions(&out.stdout)?;
        debug!(selector = %selector, count = regions.len(), "Discovered PMem regions");
        Ok(regions)
    }

    /// Every PMem module in the system.
    #[instrument(skip(self))]
    pub async fn get_modules(&self) -> Result<Vec<Module>> {
        let cmd = Self::show_modules_command();
        let out = self.runner.run_output(&cmd).await?;

        match match_sentinel(&out) {
            Some(Sentinel::NoPermissions) => return Err(Error::NoCliPermissions),
            Some(Sentinel::NoModules) => return Ok(Vec::new()),
            _ => {}
        }

        if !out.success {
            return Err(command_failed(&cmd, &out));
        }
        if out.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let modules = parse_modules(&out.stdout)?;
        debug!(count = modules.len(), "Discovered PMem modules");
        Ok(modules)
    }
}

/// Key regions by socket. Two regions on one socket is an unsupported
/// configuration.
pub fn map_regions_to_socket(regions: &[Region]) -> Result<BTreeMap<u32, Region>> {
    let mut by_socket = BTreeMap::new();
    for region in regions {
        if by_socket.insert(region.socket_id, region.clone()).is_some() {
            return Err(Error::MultipleRegionsOnSocket {
                socket_id: region.socket_id,
            });
        }
    }
    Ok(by_socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedExecutor;
    use crate::hardware::pmem::PmemConfig;
    use crate::metrics::PmemMetrics;
    use assert_matches::assert_matches;

    const VERSION_OUT: &str = "Version 02.00.00.3825";

    const TWO_REGIONS_XML: &str = r#"<?xml version="1.0"?>
<RegionList>
 <Region>
  <SocketID>0x0000</SocketID>
  <PersistentMemoryType>AppDirect</PersistentMemoryType>
  <Capacity>1008.000 GiB</Capacity>
  <FreeCapacity>1008.000 GiB</FreeCapacity>
  <HealthState>Healthy</HealthState>
  <DimmID>0x0001, 0x0011, 0x0101, 0x0111, 0x0201, 0x0211</DimmID>
  <RegionID>0x0001</RegionID>
  <ISetID>0xb8c12120c7bd1110</ISetID>
 </Region>
 <Region>
  <SocketID>0x0001</SocketID>
  <PersistentMemoryType>AppDirect</PersistentMemoryType>
  <Capacity>1008.000 GiB</Capacity>
  <FreeCapacity>0.000 GiB</FreeCapacity>
  <HealthState>Error</HealthState>
  <DimmID>0x1001, 0x1011, 0x1101, 0x1111, 0x1201, 0x1211</DimmID>
  <RegionID>0x0002</RegionID>
  <ISetID>0x4c4a2120b2bd1110</ISetID>
 </Region>
</RegionList>
"#;

    const DIMMS_XML: &str = r#"<?xml version="1.0"?>
<DimmList>
 <Dimm>
  <DimmID>0x0001</DimmID>
  <Capacity>502.599 GiB</Capacity>
  <HealthState>Healthy</HealthState>
  <FWVersion>01.02.00.5435</FWVersion>
  <DimmUID>8089-a2-1839-00000001</DimmUID>
  <SocketID>0x0000</SocketID>
  <PhysicalID>0x001e</PhysicalID>
  <MemControllerID>0x0000</MemControllerID>
  <ChannelID>0x0000</ChannelID>
  <ChannelPos>0</ChannelPos>
 </Dimm>
</DimmList>
"#;

    fn scripted_inspector(exec: ScriptedExecutor) -> (RegionInspector, Arc<ScriptedExecutor>) {
        let exec = Arc::new(exec.on_stdout("ipmctl version", VERSION_OUT));
        let runner = CommandRunner::new(
            exec.clone(),
            PmemConfig::default(),
            Arc::new(PmemMetrics::new().unwrap()),
        );
        (RegionInspector::new(Arc::new(runner)), exec)
    }

    fn region(socket_id: u32) -> Region {
        Region {
            id: socket_id + 1,
            socket_id,
            pmem_type: PmemType::AppDirect,
            capacity: 1 << 30,
            free_capacity: 1 << 30,
            health: PmemHealth::Normal,
            iset_id: None,
        }
    }

    #[test]
    fn test_parse_regions() {
        let regions = parse_regions(TWO_REGIONS_XML).unwrap();
        assert_eq!(regions.len(), 2);

        assert_eq!(regions[0].id, 1);
        assert_eq!(regions[0].socket_id, 0);
        assert_eq!(regions[0].pmem_type, PmemType::AppDirect);
        assert_eq!(regions[0].capacity, 1008 << 30);
        assert_eq!(regions[0].free_capacity, 1008 << 30);
        assert_eq!(regions[0].health, PmemHealth::Normal);
        assert_eq!(regions[0].iset_id, Some(0xb8c1_2120_c7bd_1110));

        assert_eq!(regions[1].socket_id, 1);
        assert_eq!(regions[1].free_capacity, 0);
        assert_eq!(regions[1].health, PmemHealth::Error);
    }

    #[test]
    fn test_parse_empty_region_list() {
        let regions =
            parse_regions("<?xml version=\"1.0\"?>\n<RegionList>\n</RegionList>").unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn test_parse_regions_garbage() {
        assert_matches!(parse_regions("not xml at all"), Err(Error::RegionParse(_)));
    }

    #[test]
    fn test_parse_modules() {
        let modules = parse_modules(DIMMS_XML).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].dimm_id, "0x0001");
        assert_eq!(modules[0].uid, "8089-a2-1839-00000001");
        assert_eq!(modules[0].physical_id, 0x1e);
        assert_eq!(modules[0].firmware_version, "01.02.00.5435");
        assert_eq!(modules[0].health, "Healthy");
        assert_eq!(modules[0].capacity, 539_661_567_000);
    }

    #[test]
    fn test_match_sentinel() {
        let out = CommandOutput::failed(
            "ipmctl command you have attempted to execute requires root privileges.",
            "",
        );
        assert_eq!(match_sentinel(&out), Some(Sentinel::NoPermissions));

        let out = CommandOutput::ok("No PMem modules in the system.");
        assert_eq!(match_sentinel(&out), Some(Sentinel::NoModules));

        let out = CommandOutput::ok("There are no Regions defined in the system.");
        assert_eq!(match_sentinel(&out), Some(Sentinel::NoRegions));

        assert_eq!(match_sentinel(&CommandOutput::ok(TWO_REGIONS_XML)), None);
    }

    #[tokio::test]
    async fn test_get_regions_socket_scoped() {
        let (inspector, exec) = scripted_inspector(
            ScriptedExecutor::new()
                .on_stdout("ipmctl show -o nvmxml -region", TWO_REGIONS_XML),
        );

        let regions = inspector.get_regions(SocketSelector::Socket(1)).await.unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(
            exec.calls(),
            vec!["ipmctl version", "ipmctl show -o nvmxml -region -socket 1"]
        );
    }

    #[tokio::test]
    async fn test_get_regions_sentinels() {
        let (inspector, _) = scripted_inspector(ScriptedExecutor::new().on_stdout(
            "ipmctl show",
            "There are no Regions defined in the system.",
        ));
        assert!(inspector.get_regions(SocketSelector::Any).await.unwrap().is_empty());

        let (inspector, _) = scripted_inspector(
            ScriptedExecutor::new().on_stdout("ipmctl show", "No PMem modules in the system."),
        );
        assert_matches!(
            inspector.get_regions(SocketSelector::Any).await,
            Err(Error::NoPmemModules)
        );

        let (inspector, _) = scripted_inspector(ScriptedExecutor::new().on(
            "ipmctl show",
            CommandOutput::failed("This command requires root privileges.", ""),
        ));
        assert_matches!(
            inspector.get_regions(SocketSelector::Any).await,
            Err(Error::NoCliPermissions)
        );

        let (inspector, _) =
            scripted_inspector(ScriptedExecutor::new().on_stdout("ipmctl show", "\n"));
        assert!(inspector.get_regions(SocketSelector::Socket(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_regions_unparsable() {
        let (inspector, _) = scripted_inspector(
            ScriptedExecutor::new().on_stdout("ipmctl show", "Something odd happened"),
        );
        assert_matches!(
            inspector.get_regions(SocketSelector::Any).await,
            Err(Error::RegionParse(_))
        );
    }

    #[tokio::test]
    async fn test_get_modules_none() {
        let (inspector, _) = scripted_inspector(
            ScriptedExecutor::new().on_stdout("ipmctl show", "No PMem modules in the system."),
        );
        assert!(inspector.get_modules().await.unwrap().is_empty());
    }

    #[test]
    fn test_map_regions_to_socket() {
        let map = map_regions_to_socket(&[region(1), region(0)]).unwrap();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_map_regions_duplicate_socket() {
        let mut dup = region(0);
        dup.id = 9;
        assert_matches!(
            map_regions_to_socket(&[region(0), dup]),
            Err(Error::MultipleRegionsOnSocket { socket_id: 0 })
        );
    }
}
