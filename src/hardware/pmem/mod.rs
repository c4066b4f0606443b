//! PMem Discovery and Preparation
//!
//! Reconciles the views of the region-management tool (`ipmctl`) and the
//! namespace-management tool (`ndctl`) into one model, derives a per-socket
//! state and drives the prepare/reset state machine.
//!
//! ```text
//! PrepareOrchestrator
//!   ├── RegionInspector ──┐
//!   ├── StateClassifier   ├── CommandRunner ── CommandExecutor (port)
//!   ├── NamespaceManager ─┘
//!   └── Verifier
//! ```
//!
//! Nothing is cached between calls: every scan and prepare re-derives state
//! from live tool output. The only state kept for the lifetime of a
//! [`CommandRunner`] is the one-time tool check.

pub mod command;
pub mod namespace;
pub mod prepare;
pub mod region;
pub mod state;
pub mod verify;

pub use command::CommandRunner;
pub use namespace::NamespaceManager;
pub use prepare::PrepareOrchestrator;
pub use region::{map_regions_to_socket, RegionInspector};
pub use state::{get_pmem_state, get_region_state};
pub use verify::verify_namespaces;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Namespaces must be carved in multiples of this many bytes.
pub const NAMESPACE_ALIGNMENT: u64 = 2 << 20;

/// Fewest namespaces that may be requested per socket.
pub const MIN_NAMESPACES_PER_SOCKET: u32 = 1;

/// Most namespaces that may be requested per socket.
pub const MAX_NAMESPACES_PER_SOCKET: u32 = 4;

/// Region tool releases known to misbehave.
pub const DEFAULT_BAD_IPMCTL_VERSIONS: &[&str] =
    &["02.00.00.3809", "02.00.00.3816", "02.00.00.3820"];

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for PMem tooling
#[derive(Debug, Clone)]
pub struct PmemConfig {
    /// Region tool binary
    pub ipmctl_bin: String,

    /// Namespace tool binary
    pub ndctl_bin: String,

    /// Region tool versions that must not be used
    pub bad_ipmctl_versions: Vec<String>,
}

impl Default for PmemConfig {
    fn default() -> Self {
        Self {
            ipmctl_bin: "ipmctl".to_string(),
            ndctl_bin: "ndctl".to_string(),
            bad_ipmctl_versions: DEFAULT_BAD_IPMCTL_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }
}

// =============================================================================
// Socket Selector
// =============================================================================

/// Which NUMA socket an operation is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SocketSelector {
    /// Whole system
    #[default]
    Any,
    /// A single socket
    Socket(u32),
}

impl SocketSelector {
    /// The selected socket, if restricted.
    pub fn socket_id(&self) -> Option<u32> {
        match self {
            SocketSelector::Any => None,
            SocketSelector::Socket(id) => Some(*id),
        }
    }
}

impl From<Option<u32>> for SocketSelector {
    fn from(id: Option<u32>) -> Self {
        id.map(SocketSelector::Socket).unwrap_or(SocketSelector::Any)
    }
}

impl std::fmt::Display for SocketSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketSelector::Any => write!(f, "any"),
            SocketSelector::Socket(id) => write!(f, "{}", id),
        }
    }
}

// =============================================================================
// Regions
// =============================================================================

/// Memory mode of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmemType {
    AppDirect,
    AppDirectNotInterleaved,
    Volatile,
    Unknown,
}

impl From<&str> for PmemType {
    fn from(s: &str) -> Self {
        match s.trim() {
            "AppDirect" => PmemType::AppDirect,
            "AppDirectNotInterleaved" => PmemType::AppDirectNotInterleaved,
            "Volatile" => PmemType::Volatile,
            _ => PmemType::Unknown,
        }
    }
}

/// Health of a region as reported by the region tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmemHealth {
    Normal,
    Error,
    Unknown,
    Pending,
    Locked,
}

impl From<&str> for PmemHealth {
    fn from(s: &str) -> Self {
        match s.trim() {
            "Healthy" | "Normal" => PmemHealth::Normal,
            "Error" => PmemHealth::Error,
            "Pending" => PmemHealth::Pending,
            "Locked" => PmemHealth::Locked,
            _ => PmemHealth::Unknown,
        }
    }
}

/// One AppDirect interleave set, as seen by the region tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier
    pub id: u32,
    /// Owning socket
    pub socket_id: u32,
    /// Memory mode
    pub pmem_type: PmemType,
    /// Total capacity in bytes
    pub capacity: u64,
    /// Capacity not yet consumed by namespaces, in bytes
    pub free_capacity: u64,
    /// Health
    pub health: PmemHealth,
    /// Interleave-set id, the join key with the namespace tool
    pub iset_id: Option<u64>,
}

/// A PMem module (DIMM).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Module handle
    pub dimm_id: String,
    /// Unique id of the module
    pub uid: String,
    /// Owning socket
    pub socket_id: u32,
    /// SMBIOS physical id
    pub physical_id: u32,
    /// Memory controller
    pub controller_id: u32,
    /// Channel on the memory controller
    pub channel_id: u32,
    /// Slot on the channel
    pub channel_position: u32,
    /// Raw capacity in bytes
    pub capacity: u64,
    /// Health as reported by the region tool
    pub health: String,
    /// Firmware revision
    pub firmware_version: String,
}

// =============================================================================
// Namespaces
// =============================================================================

/// A block device carved out of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Device name, `namespace<major>.<minor>`
    #[serde(rename = "dev")]
    pub name: String,
    /// Block device name, e.g. `pmem0`
    #[serde(rename = "blockdev", default)]
    pub block_device: String,
    /// NUMA node the namespace lives on
    #[serde(default)]
    pub numa_node: u32,
    /// Size in bytes
    pub size: u64,
    /// Namespace UUID
    pub uuid: Uuid,
}

/// A region as seen by the namespace tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdctlRegion {
    /// Region handle, e.g. `region0`
    pub dev: String,
    /// Total size in bytes
    #[serde(default)]
    pub size: u64,
    /// Unallocated bytes
    #[serde(default)]
    pub available_size: u64,
    /// Interleave-set id
    #[serde(default, deserialize_with = "deserialize_iset_id")]
    pub iset_id: Option<u64>,
    /// NUMA node of the region
    #[serde(default)]
    pub numa_node: u32,
    /// Region type, `pmem` or `blk`
    #[serde(rename = "type", default)]
    pub region_type: String,
    /// Persistence domain
    #[serde(default)]
    pub persistence_domain: Option<String>,
}

/// Read an interleave-set id, which the namespace tool prints as a signed
/// 64-bit integer. Anything that is not an integer in the signed or unsigned
/// 64-bit range is treated as absent.
fn deserialize_iset_id<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_i64().map(|v| v as u64).or_else(|| n.as_u64()),
        _ => None,
    })
}

// =============================================================================
// State
// =============================================================================

/// Derived state of the PMem on a socket or on the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmemState {
    Unknown,
    NoModules,
    NoRegions,
    NotInterleaved,
    NotHealthy,
    PartialFreeCapacity,
    UnknownMode,
    FreeCapacity,
    NoFreeCapacity,
}

impl PmemState {
    /// States that block `prep` and name an offending socket.
    pub fn is_offending(&self) -> bool {
        matches!(
            self,
            PmemState::NotInterleaved
                | PmemState::NotHealthy
                | PmemState::PartialFreeCapacity
                | PmemState::UnknownMode
        )
    }
}

impl std::fmt::Display for PmemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PmemState::Unknown => "Unknown",
            PmemState::NoModules => "NoModules",
            PmemState::NoRegions => "NoRegions",
            PmemState::NotInterleaved => "NotInterleaved",
            PmemState::NotHealthy => "NotHealthy",
            PmemState::PartialFreeCapacity => "PartialFreeCapacity",
            PmemState::UnknownMode => "UnknownMode",
            PmemState::FreeCapacity => "FreeCapacity",
            PmemState::NoFreeCapacity => "NoFreeCapacity",
        };
        write!(f, "{}", s)
    }
}

/// Classifier verdict: a state plus the socket it applies to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketState {
    pub state: PmemState,
    pub socket_id: Option<u32>,
}

impl SocketState {
    pub fn new(state: PmemState, socket_id: Option<u32>) -> Self {
        Self { state, socket_id }
    }

    /// The hardware-state fault this verdict represents, if it is offending.
    pub fn fault(&self) -> Option<Error> {
        let socket_id = self.socket_id.unwrap_or_default();
        match self.state {
            PmemState::NotInterleaved => Some(Error::NotInterleaved { socket_id }),
            PmemState::NotHealthy => Some(Error::NotHealthy { socket_id }),
            PmemState::PartialFreeCapacity => Some(Error::PartialFreeCapacity { socket_id }),
            PmemState::UnknownMode => Some(Error::UnknownMode { socket_id }),
            _ => None,
        }
    }
}

impl std::fmt::Display for SocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.socket_id {
            Some(id) => write!(f, "{} (socket {})", self.state, id),
            None => write!(f, "{}", self.state),
        }
    }
}

// =============================================================================
// Requests and Responses
// =============================================================================

/// Request to prepare or reset PMem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    /// Restrict to one socket
    pub socket_id: Option<u32>,
    /// Namespaces to create per socket, 1 when unset
    pub namespaces_per_socket: Option<u32>,
    /// Tear down instead of building up
    pub reset: bool,
}

/// Result of a prepare or reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub namespaces: Vec<Namespace>,
    pub socket_state: SocketState,
    /// Set whenever region goals were created
    pub reboot_required: bool,
}

impl PrepareResponse {
    pub(crate) fn new(state: SocketState) -> Self {
        Self {
            namespaces: Vec::new(),
            socket_state: state,
            reboot_required: false,
        }
    }
}

/// Snapshot of the PMem on this host, consumed by prepare and reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub modules: Vec<Module>,
    pub namespaces: Vec<Namespace>,
    pub state: SocketState,
}

impl ScanResult {
    /// Scan result for a host without PMem modules.
    pub fn no_modules() -> Self {
        Self {
            modules: Vec::new(),
            namespaces: Vec::new(),
            state: SocketState::new(PmemState::NoModules, None),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Parse a region tool number, either `0x` hex or decimal.
pub fn parse_tool_number(s: &str) -> Result<u64> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| Error::RegionParse(format!("invalid number '{}': {}", s, e)))
}

/// Parse a human readable size such as `1008.000 GiB` into bytes.
///
/// Binary unit suffixes are understood. The tools print rounded values such
/// as `502.599 GiB`, so any fractional byte left after scaling is truncated.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let invalid = |why: &str| Error::RegionParse(format!("invalid size '{}': {}", s, why));

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let multiplier: u128 = match unit.trim() {
        "" | "B" => 1,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        "PiB" => 1 << 50,
        _ => return Err(invalid("unknown unit")),
    };

    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() {
        return Err(invalid("missing digits"));
    }
    let digits = format!("{}{}", whole, frac);
    let mantissa: u128 = digits.parse().map_err(|_| invalid("bad number"))?;
    let scale = 10u128
        .checked_pow(frac.len() as u32)
        .ok_or_else(|| invalid("too many decimals"))?;

    let scaled = mantissa
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("overflow"))?;
    u64::try_from(scaled / scale).map_err(|_| invalid("overflow"))
}
