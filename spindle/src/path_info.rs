// Spindle: Protected Path Forwarding with Hierarchical SDN Controllers
// Copyright (C) 2022  Spindle Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Per-pair forwarding plan store
//!
//! A [`PathInfo`] records everything the local controller installed on the
//! switches for one host pair: the pair's group/VLAN identifier, the ingress
//! and egress of the path segment it owns, the fast-failover group table per
//! switch, the splice mid-node special flows, the ingress-change detector
//! ports, and the traffic counters sampled from the ingress rule.
//!
//! A record is created on first computation, mutated on topology change, on
//! group-port inversion by the TE layer, and on ingress/egress change
//! notifications, and destroyed when either endpoint host disappears or the
//! endpoints collapse onto a single switch.

use crate::gid::Gid;
use crate::topo::{Dpid, NodeId, PortNo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Ordered host pair `(source, destination)` keying a forwarding plan
pub type PairKey = (String, String);

/// Map from switch to the ordered port list of its fast-failover group.
/// Position 0 is the active port; later positions are failover alternates.
pub type GroupTable = BTreeMap<NodeId, Vec<PortNo>>;

/// Map from switch to the `(in_port, out_port)` rules installed on splice
/// mid-nodes which cannot be expressed as part of a group.
pub type SpecialFlows = BTreeMap<NodeId, Vec<(PortNo, PortNo)>>;

/// Ingress or egress of a path segment: a plain switch for an intra-domain
/// endpoint, or a `(switch, port)` boundary for an inter-domain segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    /// Intra-domain endpoint, the switch a host attaches to
    Local(Dpid),
    /// Inter-domain segment boundary
    Boundary(Dpid, PortNo),
}

impl Endpoint {
    /// The switch of the endpoint, regardless of kind.
    pub fn dpid(&self) -> Dpid {
        match self {
            Self::Local(dpid) => *dpid,
            Self::Boundary(dpid, _) => *dpid,
        }
    }

    /// Returns true if and only if this is an inter-domain boundary.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::Boundary(_, _))
    }

    /// The boundary `(switch, port)` tuple, if this is a boundary.
    pub fn boundary(&self) -> Option<(Dpid, PortNo)> {
        match self {
            Self::Boundary(dpid, port) => Some((*dpid, *port)),
            Self::Local(_) => None,
        }
    }
}

/// Traffic counters of one pair, derived from its ingress flow rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathStats {
    /// Packets in the last poll interval
    pub pkts: u64,
    /// Bytes in the last poll interval
    pub bytes: u64,
    /// Packets since the rule was installed
    pub total_pkts: u64,
    /// Bytes since the rule was installed
    pub total_bytes: u64,
    /// Packet rate over the last poll interval
    pub pkts_persec: f64,
    /// Byte rate over the last poll interval
    pub bytes_persec: f64,
    /// Packet rate since the rule was installed
    pub total_pkts_persec: f64,
    /// Byte rate since the rule was installed
    pub total_bytes_persec: f64,
    /// Seconds the rule has been installed
    pub total_time: u64,
}

/// Everything installed on the switches for one host pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathInfo {
    /// Group and VLAN identifier of the pair
    pub gid: Gid,
    /// First switch of the owned segment
    pub ingress: Option<Endpoint>,
    /// Last switch of the owned segment
    pub egress: Option<Endpoint>,
    /// Physical port traffic enters the segment on
    pub in_port: Option<PortNo>,
    /// Physical port traffic leaves the segment on
    pub out_port: Option<PortNo>,
    /// Destination IPv4 address matched by the ingress rule
    pub address: Option<Ipv4Addr>,
    /// Destination MAC written by the egress rule
    pub eth: Option<String>,
    /// Fast-failover group table per switch
    pub groups: GroupTable,
    /// Splice mid-node rules per switch
    pub special_flows: SpecialFlows,
    /// Ports carrying an ingress-change detection rule
    pub ingress_change_detect: Vec<(Dpid, PortNo)>,
    /// Counters sampled from the ingress rule
    pub stats: Option<PathStats>,
}

impl PathInfo {
    /// A skeleton record carrying only the identifier, used while state is
    /// being rebuilt from switch descriptions.
    pub fn skeleton(gid: Gid) -> Self {
        Self { gid, ..Default::default() }
    }
}

/// The per-pair plan store of one local controller
pub type PathStore = BTreeMap<PairKey, PathInfo>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint_accessors() {
        let local = Endpoint::Local(3);
        let boundary = Endpoint::Boundary(7, 2);
        assert_eq!(local.dpid(), 3);
        assert_eq!(boundary.dpid(), 7);
        assert!(!local.is_boundary());
        assert!(boundary.is_boundary());
        assert_eq!(boundary.boundary(), Some((7, 2)));
        assert_eq!(local.boundary(), None);
    }
}
