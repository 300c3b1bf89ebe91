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

//! Type definitions for the topology graph

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Datapath identifier of a switch
pub type Dpid = u64;
/// Identifier of a local controller (and of its virtual domain node)
pub type Cid = u64;
/// Port number. `-1` is reserved for host-side links, numbers below `-1`
/// for virtual ports attached to domain nodes.
pub type PortNo = i32;
/// Link cost used by the shortest-path engine
pub type LinkWeight = u64;

/// Default cost of a link
pub const DEFAULT_COST: LinkWeight = 100;
/// Cost assigned to links that should lose every comparison but still keep
/// the fallback graph connected (used paths, TE-blocked links)
pub const BLOCKED_COST: LinkWeight = 100_000;
/// Port number of the host side of a host link
pub const HOST_PORT: PortNo = -1;

/// Identifier of a node in the topology.
///
/// The graph freely mixes four kinds: switches (numeric datapath id), domain
/// nodes (one per local controller, root side only), hosts, and the virtual
/// target/indirection nodes that path-segment computation injects
/// temporarily. The derived total order — switches, then domains, then
/// hosts, then virtuals, each kind by value — doubles as the Dijkstra
/// tie-break key, so it must be identical on every controller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// A switch, identified by its datapath id
    Switch(Dpid),
    /// A whole domain, identified by its controller id
    Domain(Cid),
    /// A host, identified by name
    Host(String),
    /// A synthetic node injected for segment or CSPF computation
    Virtual(String),
}

impl NodeId {
    /// Returns the datapath id if this is a switch node.
    pub fn switch(&self) -> Option<Dpid> {
        match self {
            Self::Switch(dpid) => Some(*dpid),
            _ => None,
        }
    }

    /// Returns true if and only if this is a host node.
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }

    /// Returns true if and only if this is a virtual node.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// Returns true if and only if this is a domain node.
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch(dpid) => write!(f, "s{}", dpid),
            Self::Domain(cid) => write!(f, "c{}", cid),
            Self::Host(name) => write!(f, "{}", name),
            Self::Virtual(name) => write!(f, "{}", name),
        }
    }
}

/// One directed half of a link, stored per `(node, port)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    /// The far end of the link, if known
    pub dest: Option<(NodeId, PortNo)>,
    /// Link cost
    pub cost: LinkWeight,
    /// Nominal speed in bits per second; 0 means unknown
    pub speed: u64,
    /// IPv4 address of the attached host, if this is a host link
    pub addr: Option<Ipv4Addr>,
    /// MAC address of the attached host, if this is a host link
    pub eth: Option<String>,
    /// Counters since switch boot
    pub total: Option<PortCounters>,
    /// Counter deltas for the last poll interval
    pub poll: Option<PortCounters>,
}

impl PortInfo {
    pub(crate) fn new(speed: u64) -> Self {
        Self {
            dest: None,
            cost: DEFAULT_COST,
            speed,
            addr: None,
            eth: None,
            total: None,
            poll: None,
        }
    }
}

/// Packet, byte and error counters of one port, with derived utilisation
/// ratios when the port speed is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortCounters {
    /// Received packets
    pub rx_packets: u64,
    /// Received bytes
    pub rx_bytes: u64,
    /// Receive errors
    pub rx_errors: u64,
    /// Transmitted packets
    pub tx_packets: u64,
    /// Transmitted bytes
    pub tx_bytes: u64,
    /// Transmit errors
    pub tx_errors: u64,
    /// Receive utilisation as a fraction of port speed
    pub rx_rate: Option<f64>,
    /// Transmit utilisation as a fraction of port speed
    pub tx_rate: Option<f64>,
}

/// Optional counter fields of a single telemetry update. Fields left `None`
/// keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct CounterUpdate {
    /// Received packets
    pub rx_packets: Option<u64>,
    /// Received bytes
    pub rx_bytes: Option<u64>,
    /// Receive errors
    pub rx_errors: Option<u64>,
    /// Transmitted packets
    pub tx_packets: Option<u64>,
    /// Transmitted bytes
    pub tx_bytes: Option<u64>,
    /// Transmit errors
    pub tx_errors: Option<u64>,
    /// Receive utilisation ratio
    pub rx_rate: Option<f64>,
    /// Transmit utilisation ratio
    pub tx_rate: Option<f64>,
}

/// A single port-info update. Any field left `None` is not touched.
#[derive(Debug, Clone, Default)]
pub struct PortUpdate {
    /// New nominal speed in bits per second
    pub speed: Option<u64>,
    /// Host IPv4 address
    pub addr: Option<Ipv4Addr>,
    /// Host MAC address
    pub eth: Option<String>,
    /// Counter updates
    pub counters: Option<CounterUpdate>,
    /// Apply counters to the totals bucket (true) or the poll bucket (false)
    pub is_total: bool,
}

/// One entry of the port-triple translation of a path: the switch, the port
/// the traffic enters on (`-1` at the start of a path), and the port it
/// leaves on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    /// Switch the triple applies to
    pub node: NodeId,
    /// Input port, `-1` if the path starts here
    pub in_port: PortNo,
    /// Output port
    pub out_port: PortNo,
}

impl Hop {
    /// Shorthand constructor.
    pub fn new(node: NodeId, in_port: PortNo, out_port: PortNo) -> Self {
        Self { node, in_port, out_port }
    }

    /// The directed link this hop forwards onto, as `(node, out_port)`.
    pub fn link(&self) -> (NodeId, PortNo) {
        (self.node.clone(), self.out_port)
    }
}

/// Topology errors
#[derive(Debug, Error, PartialEq)]
pub enum TopoError {
    /// Two adjacent path nodes have no port pair linking them; the caller
    /// must abandon the path and treat it as empty.
    #[error("Invalid path, can't find correct ports for {0} {1}")]
    InvalidPath(NodeId, NodeId),
    /// Two domain nodes may never be linked directly; the path composer
    /// assumes this never happens, so it is rejected at add time.
    #[error("Refusing to link domain {0} directly to domain {1}")]
    DomainAdjacency(Cid, Cid),
}
