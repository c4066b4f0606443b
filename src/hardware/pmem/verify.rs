//! Verifier
//!
//! Post-condition check run after prepare: namespace device names must line
//! up with the regions they were carved from and the requested count.

use std::collections::BTreeMap;

use tracing::warn;

use super::{PmemState, PrepareResponse};
use crate::error::{Error, Result};

/// Split a `namespace<major>.<minor>` device name.
pub fn parse_namespace_name(name: &str) -> Result<(u32, u32)> {
    let invalid =
        || Error::InvalidPmemConfig(format!("unexpected namespace device name '{}'", name));

    let ids = name.strip_prefix("namespace").ok_or_else(invalid)?;
    let (major, minor) = ids.split_once('.').ok_or_else(invalid)?;
    let major = major.parse::<u32>().map_err(|_| invalid())?;
    let minor = minor.parse::<u32>().map_err(|_| invalid())?;
    Ok((major, minor))
}

/// Check a prepare response against the expected region and namespace counts.
pub fn verify_namespaces(
    resp: &PrepareResponse,
    region_count: usize,
    per_socket: u32,
) -> Result<()> {
    match resp.socket_state.state {
        PmemState::NoRegions => return Ok(()),
        PmemState::NoFreeCapacity => {}
        other => {
            return Err(Error::InvalidPmemConfig(format!(
                "unexpected state {} after prepare",
                other
            )))
        }
    }

    let mut minors: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for ns in &resp.namespaces {
        let (major, minor) = parse_namespace_name(&ns.name)?;
        if major != ns.numa_node {
            warn!(
                namespace = %ns.name,
                numa_node = ns.numa_node,
                "Namespace major id does not match its NUMA node"
            );
        }
        minors.entry(major).or_default().push(minor);
    }

    if minors.len() != region_count {
        return Err(Error::InvalidPmemConfig(format!(
            "namespaces span {} regions, want {}",
            minors.len(),
            region_count
        )));
    }

    for (major, ids) in &minors {
        if ids.len() != per_socket as usize {
            return Err(Error::InvalidPmemConfig(format!(
                "region {} has {} namespaces, want {}",
                major,
                ids.len(),
                per_socket
            )));
        }
    }

    Ok(())
}
