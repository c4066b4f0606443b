//! Error types for PMem preparation

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while inspecting or preparing PMem
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Tool Errors
    // =========================================================================
    /// Namespace tool binary could not be resolved on PATH
    #[error("missing dependency: {binary} not found in PATH")]
    NdctlMissing { binary: String },

    /// Region tool version is on the deny-list
    #[error("ipmctl version {version} is known to be incompatible")]
    BadIpmctlVersion { version: String },

    /// Region tool version output could not be understood
    #[error("unable to determine ipmctl version from output: {output}")]
    IpmctlVersionUnparsable { output: String },

    /// External command exited unsuccessfully
    #[error("command '{command}' failed: {reason} (stdout: {stdout})")]
    CommandFailed {
        command: String,
        stdout: String,
        reason: String,
    },

    /// A step of a larger operation failed
    #[error("{step}: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    /// Region tool refused to run without elevated privileges
    #[error("insufficient permissions to query PMem, run as root")]
    NoCliPermissions,

    /// No PMem modules (DIMMs) present in the system
    #[error("no PMem modules (DIMMs) in the system")]
    NoPmemModules,

    /// Region tool XML output could not be parsed
    #[error("failed to parse region tool output: {0}")]
    RegionParse(String),

    /// Namespace tool JSON output could not be parsed
    #[error("failed to parse {context}: {source}")]
    JsonParse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two regions claim the same socket
    #[error("multiple PMem regions assigned to the same socket {socket_id}")]
    MultipleRegionsOnSocket { socket_id: u32 },

    // =========================================================================
    // Hardware State Errors
    // =========================================================================
    /// Region is AppDirect but not interleaved
    #[error("PMem region on socket {socket_id} is in non-interleaved AppDirect mode")]
    NotInterleaved { socket_id: u32 },

    /// Region health is Error
    #[error("PMem region on socket {socket_id} is not healthy")]
    NotHealthy { socket_id: u32 },

    /// Region is partially consumed by namespaces
    #[error("PMem region on socket {socket_id} has only partial free capacity")]
    PartialFreeCapacity { socket_id: u32 },

    /// Region is not in AppDirect mode
    #[error("PMem region on socket {socket_id} is in an unsupported memory mode")]
    UnknownMode { socket_id: u32 },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    /// Requested namespaces per socket outside the supported range
    #[error("namespaces per socket must be between {min} and {max}, got {requested}")]
    InvalidNamespaceCount { requested: u32, min: u32, max: u32 },

    /// Namespace creation requested without any regions
    #[error("no PMem regions available to create namespaces on")]
    NoRegionsForNamespaces,

    /// Per-namespace size is not aligned
    #[error(
        "region {region} available size {available} cannot be split into {count} namespaces aligned to {alignment} bytes"
    )]
    UnalignedNamespaceSize {
        region: String,
        available: u64,
        count: u32,
        alignment: u64,
    },

    /// State after a mutation is not what the state machine expects
    #[error("unexpected PMem state after {operation}: want {expected}, got {actual}")]
    UnexpectedState {
        operation: String,
        expected: String,
        actual: String,
    },

    /// Post-condition verification failed
    #[error("invalid PMem configuration: {0}")]
    InvalidPmemConfig(String),
}

impl Error {
    /// Wrap an error with the name of the step that produced it.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        Error::StepFailed {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with any step wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Operator-facing remedy for actionable faults.
    pub fn resolution(&self) -> Option<&'static str> {
        match self.root() {
            Error::NdctlMissing { .. } => Some("install the ndctl package"),
            Error::BadIpmctlVersion { .. } => Some("install a supported ipmctl release"),
            Error::NoCliPermissions => Some("run the command as root"),
            Error::NoPmemModules => {
                Some("install PMem modules or disable SCM in the configuration")
            }
            Error::NotInterleaved { .. } => Some("reset PMem to recreate interleaved regions"),
            Error::NotHealthy { .. } => Some("check PMem module health and replace faulty modules"),
            Error::PartialFreeCapacity { .. } => Some("reset PMem before retrying"),
            Error::UnknownMode { .. } => Some("reset PMem to switch regions to AppDirect mode"),
            Error::MultipleRegionsOnSocket { .. } => {
                Some("reset PMem to rebuild one region per socket")
            }
            Error::UnalignedNamespaceSize { .. } => {
                Some("choose a different number of namespaces per socket")
            }
            Error::InvalidPmemConfig(_) => Some("reset PMem and prepare again"),
            _ => None,
        }
    }
}

/// Attach a step name to the error of a fallible result.
pub trait StepContext<T> {
    fn step(self, step: &str) -> Result<T>;
}

impl<T> StepContext<T> for Result<T> {
    fn step(self, step: &str) -> Result<T> {
        self.map_err(|e| e.in_step(step))
    }
}
