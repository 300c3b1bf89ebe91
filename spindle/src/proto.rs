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

//! # Inter-controller messages
//!
//! The payloads exchanged between local controllers and the root controller
//! over the topic-routed pub/sub transport, together with the topic names.
//! Every local-to-root payload carries the sender's controller id.

use crate::path_info::PairKey;
use crate::topo::{Cid, Dpid, PortNo};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Topic names of the pub/sub transport.
pub mod topics {
    use crate::topo::Cid;

    /// LC → RC: controller discovery
    pub const DISCOVER: &str = "root.c.discover";
    /// LC → RC: domain topology
    pub const TOPO: &str = "root.c.topo";
    /// LC → RC: unknown inter-domain switch resolution request
    pub const UNKNOWN_SW: &str = "root.c.inter_domain.unknown_sw";
    /// LC → RC: inter-domain port went down
    pub const DEAD_PORT: &str = "root.c.inter_domain.dead_port";
    /// LC → RC: inter-domain link traffic sample
    pub const LINK_TRAFFIC: &str = "root.c.inter_domain.link_traffic";
    /// LC → RC: unresolvable inter-domain congestion
    pub const CONGESTION: &str = "root.c.inter_domain.congestion";
    /// LC → RC: egress of an inter-domain path changed
    pub const EGRESS_CHANGE: &str = "root.c.inter_domain.egress_change";
    /// LC → RC: ingress of an inter-domain path changed
    pub const INGRESS_CHANGE: &str = "root.c.inter_domain.ingress_change";
    /// RC → all LCs
    pub const LC_ALL: &str = "c.all";
    /// RC → RC: keep-alive heartbeat
    pub const ROOT_KEEP_ALIVE: &str = "root.keep_alive";

    /// RC → one LC
    pub fn lc(cid: Cid) -> String {
        format!("c.{}", cid)
    }
}

/// Identifier the root controller announces in its keep-alive heartbeat
pub const ROOT_ID: &str = "ROOT_ID";

/// One end of an inter-domain path segment: `-1` on the wire when the
/// segment starts or ends at a host, a `(switch, port)` tuple otherwise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SegmentEnd {
    /// The segment starts or ends at a host of this domain
    Host,
    /// The segment crosses the domain boundary on this switch port
    Link(Dpid, PortNo),
}

impl SegmentEnd {
    /// The boundary tuple, if this end is a boundary.
    pub fn link(&self) -> Option<(Dpid, PortNo)> {
        match self {
            Self::Link(sw, port) => Some((*sw, *port)),
            Self::Host => None,
        }
    }
}

/// Whether an instruction installs or withdraws its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrAction {
    /// Install the segment
    Add,
    /// Withdraw the segment
    Delete,
}

/// One root-controller directive describing a path segment a local
/// controller must install or withdraw. A start-of-path instruction carries
/// the destination address for the ingress rewrite, an end-of-path
/// instruction the destination MAC for the egress rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Install or withdraw
    pub action: InstrAction,
    /// Where traffic enters the segment
    #[serde(rename = "in")]
    pub input: SegmentEnd,
    /// Where traffic leaves the segment
    #[serde(rename = "out")]
    pub output: SegmentEnd,
    /// Destination IPv4 address, present on start segments
    pub out_addr: Option<Ipv4Addr>,
    /// Destination MAC address, present on end segments
    pub out_eth: Option<String>,
}

/// A host as reported in a domain topology: name, MAC and IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRec {
    /// Host name
    pub name: String,
    /// MAC address
    pub eth: String,
    /// IPv4 address
    pub addr: Ipv4Addr,
}

/// One possibly-unresolved inter-domain link of a domain topology report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownLinkRec {
    /// Local switch
    pub sw: Dpid,
    /// Local port
    pub port: PortNo,
    /// Foreign switch at the far end
    pub dest_sw: Dpid,
    /// Nominal link speed in bits per second
    pub speed: u64,
    /// Owning controller of the far end, when already resolved
    pub cid: Option<Cid>,
}

/// Instruction lists keyed by host pair, as carried on the wire
pub type PairInstructions = Vec<(PairKey, Vec<Instruction>)>;

/// Messages a local controller publishes towards the root controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LcToRoot {
    /// Controller discovery announcement
    Discover {
        /// Sender
        cid: Cid,
        /// The sender's TE utilisation threshold
        te_thresh: f64,
    },
    /// Domain topology report
    Topo {
        /// Sender
        cid: Cid,
        /// Hosts of the domain
        hosts: Vec<HostRec>,
        /// Switches of the domain
        switches: Vec<Dpid>,
        /// Links leaving the domain
        unknown_links: Vec<UnknownLinkRec>,
        /// The sender's TE utilisation threshold
        te_thresh: f64,
        /// The inter-domain instructions currently installed, letting the
        /// root restore its emission state after a restart
        paths: PairInstructions,
    },
    /// Ask the root which controller owns the far end of a new link
    UnknownSw {
        /// Sender
        cid: Cid,
        /// Local switch
        sw: Dpid,
        /// Local port
        port: PortNo,
        /// Foreign switch at the far end
        dest_sw: Dpid,
        /// Nominal link speed in bits per second
        speed: u64,
    },
    /// An inter-domain port died
    DeadPort {
        /// Sender
        cid: Cid,
        /// Local switch
        sw: Dpid,
        /// Local port
        port: PortNo,
    },
    /// Traffic sample of an inter-domain link
    LinkTraffic {
        /// Sender
        cid: Cid,
        /// Local switch
        sw: Dpid,
        /// Local port
        port: PortNo,
        /// Transmit rate in bits per second
        traff_bps: f64,
    },
    /// Congestion on an inter-domain link the sender could not resolve
    Congestion {
        /// Sender
        cid: Cid,
        /// Local switch
        sw: Dpid,
        /// Local port
        port: PortNo,
        /// Traffic on the congested port in bits per second
        traff_bps: f64,
        /// The sender's TE utilisation threshold
        te_thresh: f64,
        /// Host pairs using the port, with their rates
        paths: Vec<(PairKey, f64)>,
    },
    /// The egress of an inter-domain path changed
    EgressChange {
        /// Sender
        cid: Cid,
        /// Affected pair
        hkey: PairKey,
        /// The updated instruction list for the pair
        new_paths: Vec<Instruction>,
    },
    /// The ingress of an inter-domain path changed
    IngressChange {
        /// Sender
        cid: Cid,
        /// Affected pair
        hkey: PairKey,
        /// The updated instruction list for the pair
        new_paths: Vec<Instruction>,
    },
}

impl LcToRoot {
    /// The sending controller.
    pub fn cid(&self) -> Cid {
        match self {
            Self::Discover { cid, .. }
            | Self::Topo { cid, .. }
            | Self::UnknownSw { cid, .. }
            | Self::DeadPort { cid, .. }
            | Self::LinkTraffic { cid, .. }
            | Self::Congestion { cid, .. }
            | Self::EgressChange { cid, .. }
            | Self::IngressChange { cid, .. } => *cid,
        }
    }

    /// The topic this message is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Discover { .. } => topics::DISCOVER,
            Self::Topo { .. } => topics::TOPO,
            Self::UnknownSw { .. } => topics::UNKNOWN_SW,
            Self::DeadPort { .. } => topics::DEAD_PORT,
            Self::LinkTraffic { .. } => topics::LINK_TRAFFIC,
            Self::Congestion { .. } => topics::CONGESTION,
            Self::EgressChange { .. } => topics::EGRESS_CHANGE,
            Self::IngressChange { .. } => topics::INGRESS_CHANGE,
        }
    }
}

/// Messages the root controller publishes towards local controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CtrlMsg {
    /// Ask the controller to (re)send its domain topology
    GetTopo,
    /// Answer to an unknown-switch resolution request
    UnknownSw {
        /// Controller owning the far end
        cid: Cid,
        /// Local switch of the asking controller
        sw: Dpid,
        /// Local port of the asking controller
        port: PortNo,
        /// The resolved foreign switch
        dest_sw: Dpid,
    },
    /// Install or withdraw inter-domain path segments
    ComputePaths {
        /// Instruction lists per pair
        paths: PairInstructions,
    },
    /// The root finished processing a congestion escalation
    ProcessedCon {
        /// Switch of the escalated port
        sw: Dpid,
        /// Port number of the escalated port
        port: PortNo,
    },
    /// A controller died; drop any state referencing it
    CtrlDead {
        /// The dead controller
        cid: Cid,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_instruction_wire_names() {
        let instr = Instruction {
            action: InstrAction::Add,
            input: SegmentEnd::Host,
            output: SegmentEnd::Link(3, 2),
            out_addr: Some("10.0.0.2".parse().unwrap()),
            out_eth: None,
        };
        let json = serde_json::to_string(&instr).unwrap();
        assert!(json.contains("\"in\""));
        assert!(json.contains("\"out\""));
        let back: Instruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instr);
    }

    #[test]
    fn test_topic_mapping() {
        let msg = LcToRoot::Discover { cid: 3, te_thresh: 0.9 };
        assert_eq!(msg.topic(), topics::DISCOVER);
        assert_eq!(msg.cid(), 3);
        assert_eq!(topics::lc(3), "c.3");
    }
}
