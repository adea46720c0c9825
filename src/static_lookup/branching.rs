//! Branch and trunk classification of route ids.
//!
//! Most routes map straight onto themselves. The exceptions are route
//! families: light rail branches that carry their branch in the route id
//! already, and the heavy rail trunk whose branches share one route id and
//! can only be told apart by which stations a trip actually visits.

use ahash::AHashSet;
use lazy_static::lazy_static;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteFamily {
    /// None when a trunk trip visits no branch-specific station, so the
    /// branch cannot be determined from its observed stops.
    pub branch_route_id: Option<String>,
    pub trunk_route_id: String,
}

struct TrunkBranches {
    trunk_route_id: &'static str,
    branches: &'static [(&'static str, &'static [&'static str])],
}

lazy_static! {
    /// Trunk routes whose branches share a single static route_id. Each
    /// branch is identified by the stations only that branch serves.
    static ref AMBIGUOUS_TRUNKS: Vec<TrunkBranches> = vec![TrunkBranches {
        trunk_route_id: "Red",
        branches: &[
            (
                "Red-A",
                &["place-shmnl", "place-fldcr", "place-smmnl", "place-asmnl"],
            ),
            (
                "Red-B",
                &[
                    "place-nqncy",
                    "place-wlsta",
                    "place-qnctr",
                    "place-qamnl",
                    "place-brntn",
                ],
            ),
        ],
    }];
}

/// Route families that carry the branch in the route id itself,
/// e.g. Green-B through Green-E.
const ID_SUFFIX_TRUNKS: [&str; 1] = ["Green"];

/// Classify a route id alone, without stop information. Returns None for
/// trunks that need station membership to resolve.
pub fn classify_route(route_id: &str) -> Option<RouteFamily> {
    if AMBIGUOUS_TRUNKS
        .iter()
        .any(|trunk| trunk.trunk_route_id == route_id)
    {
        return None;
    }

    for trunk in ID_SUFFIX_TRUNKS {
        if route_id
            .strip_prefix(trunk)
            .is_some_and(|rest| rest.starts_with('-'))
        {
            return Some(RouteFamily {
                branch_route_id: Some(route_id.to_string()),
                trunk_route_id: trunk.to_string(),
            });
        }
    }

    Some(RouteFamily {
        branch_route_id: Some(route_id.to_string()),
        trunk_route_id: route_id.to_string(),
    })
}

/// Classify a route id given the parent stations a trip visits. Falls back
/// to a branchless trunk classification when no branch-specific station
/// appears among the visited stations.
pub fn classify_route_with_stations(
    route_id: &str,
    visited_stations: &AHashSet<String>,
) -> RouteFamily {
    if let Some(family) = classify_route(route_id) {
        return family;
    }

    let trunk = AMBIGUOUS_TRUNKS
        .iter()
        .find(|trunk| trunk.trunk_route_id == route_id)
        .expect("classify_route only defers for configured trunks");

    for (branch_route_id, stations) in trunk.branches {
        if stations
            .iter()
            .any(|station| visited_stations.contains(*station))
        {
            return RouteFamily {
                branch_route_id: Some(branch_route_id.to_string()),
                trunk_route_id: route_id.to_string(),
            };
        }
    }

    RouteFamily {
        branch_route_id: None,
        trunk_route_id: route_id.to_string(),
    }
}
