//! State Classifier
//!
//! Derives one PMem state for the whole system (or a single socket) from the
//! regions the region tool reports.

use super::region::map_regions_to_socket;
use super::{PmemHealth, PmemState, PmemType, Region, SocketState};
use crate::error::Result;

/// State of a single region.
pub fn get_region_state(region: &Region) -> PmemState {
    match region.pmem_type {
        PmemType::AppDirectNotInterleaved => return PmemState::NotInterleaved,
        PmemType::AppDirect => {}
        _ => return PmemState::UnknownMode,
    }

    if region.health == PmemHealth::Error {
        return PmemState::NotHealthy;
    }

    if region.free_capacity == region.capacity {
        PmemState::FreeCapacity
    } else if region.free_capacity == 0 {
        PmemState::NoFreeCapacity
    } else {
        PmemState::PartialFreeCapacity
    }
}

/// State of a set of regions.
///
/// Regions are visited in ascending socket order and the first offending
/// region decides the result. Otherwise the result is `FreeCapacity` if any
/// region has free capacity, `NoFreeCapacity` if none do. The socket id is
/// reported for offending states and whenever there is exactly one region.
pub fn get_pmem_state(regions: &[Region]) -> Result<SocketState> {
    if regions.is_empty() {
        return Ok(SocketState::new(PmemState::NoRegions, None));
    }

    let by_socket = map_regions_to_socket(regions)?;
    let single_socket = match regions {
        [only] => Some(only.socket_id),
        _ => None,
    };

    let mut any_free = false;
    for (socket_id, region) in &by_socket {
        let state = get_region_state(region);
        if state.is_offending() {
            return Ok(SocketState::new(state, Some(*socket_id)));
        }
        if state == PmemState::FreeCapacity {
            any_free = true;
        }
    }

    let state = if any_free {
        PmemState::FreeCapacity
    } else {
        PmemState::NoFreeCapacity
    };
    Ok(SocketState::new(state, single_socket))
}
