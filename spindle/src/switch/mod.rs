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

//! # Switch programming surface
//!
//! The abstract capability the core requires from the switch-protocol
//! collaborator, in the idiom of OpenFlow 1.3 semantics: flow rules with
//! matches, apply-actions/goto-table/meter instructions, fast-failover
//! groups, single-band drop meters, role signalling with generation ids, and
//! the stats/description requests used for state recovery. The wire-level
//! encoding of these operations lives outside this crate; the core only
//! emits [`SwitchOp`] values through a [`SwitchCtl`] implementation and
//! parses the reply shapes defined here.

pub mod rules;

use crate::gid::Gid;
use crate::topo::{Dpid, PortNo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Ethernet types the core matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EthType {
    /// IPv4
    Ip,
    /// ARP
    Arp,
    /// LLDP
    Lldp,
}

/// An OpenFlow match over the keys the core uses. Omitted fields wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
    /// Input port
    pub in_port: Option<PortNo>,
    /// VLAN VID, with the present bit implied
    pub vlan: Option<Gid>,
    /// Ethernet type
    pub eth_type: Option<EthType>,
    /// Destination MAC
    pub eth_dst: Option<String>,
    /// Destination IPv4 address (implies `eth_type = Ip`)
    pub ipv4_dst: Option<Ipv4Addr>,
}

/// Header fields addressable by the register-move pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OxmField {
    /// Source MAC
    EthSrc,
    /// Destination MAC
    EthDst,
    /// ARP sender hardware address
    ArpSha,
    /// ARP target hardware address
    ArpTha,
    /// ARP sender protocol address
    ArpSpa,
    /// ARP target protocol address
    ArpTpa,
    /// Scratch register 0
    Reg0,
}

/// Packet actions the core emits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Pop the outer VLAN tag
    PopVlan,
    /// Push a 0x8100 VLAN tag and set its VID
    PushVlan(Gid),
    /// Rewrite the destination MAC
    SetEthDst(String),
    /// Rewrite the source MAC
    SetEthSrc(String),
    /// Set the ARP opcode
    SetArpOp(u16),
    /// Set the ARP sender hardware address
    SetArpSha(String),
    /// Copy one header field onto another
    RegMove {
        /// Source field
        src: OxmField,
        /// Destination field
        dst: OxmField,
        /// Number of bits to copy
        n_bits: u8,
    },
    /// Output on a port
    Output(PortNo),
    /// Output on the port the packet arrived on
    OutputInPort,
    /// Send to the controller, truncated to this many bytes
    OutputController(u16),
    /// Hand the packet to a group
    Group(Gid),
}

/// Flow-rule instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instr {
    /// Apply-actions
    Apply(Vec<Action>),
    /// Continue processing in another table
    GotoTable(u8),
    /// Subject matching packets to a meter
    Meter(u32),
}

/// One bucket of a fast-failover group: used while its watch port is live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    /// Port whose liveness gates the bucket
    pub watch_port: PortNo,
    /// Actions of the bucket
    pub actions: Vec<Action>,
}

/// Controller role towards a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full control, receives all events
    Master,
    /// Read-only standby
    Slave,
    /// Shared control
    Equal,
    /// Query the current role without changing it
    NoChange,
}

/// One program command against a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SwitchOp {
    /// Install a flow rule
    FlowAdd {
        /// Table to install into
        table_id: u8,
        /// Rule priority
        priority: u16,
        /// Match of the rule
        match_: Match,
        /// Instructions of the rule
        instructions: Vec<Instr>,
    },
    /// Delete flow rules. `None` fields widen the deletion (any table, any
    /// match, any output port or group).
    FlowDel {
        /// Restrict to one table
        table_id: Option<u8>,
        /// Restrict to rules with this match
        match_: Option<Match>,
        /// Restrict to rules outputting on this port
        out_port: Option<PortNo>,
        /// Restrict to rules handing off to this group
        out_group: Option<Gid>,
    },
    /// Install or modify a fast-failover group
    GroupAdd {
        /// Group identifier
        gid: Gid,
        /// Buckets, in failover order
        buckets: Vec<Bucket>,
        /// Modify an existing group in place instead of adding
        modify: bool,
    },
    /// Delete a group, or all groups when `None`
    GroupDel {
        /// Group identifier
        gid: Option<Gid>,
    },
    /// Install a single-band drop meter limiting to `pps` packets per second
    MeterAdd {
        /// Meter identifier
        mid: u32,
        /// Packet-per-second band
        pps: u32,
    },
    /// Delete a meter, or all meters when `None`
    MeterDel {
        /// Meter identifier
        mid: Option<u32>,
    },
    /// Order the switch to finish all preceding commands first
    Barrier,
    /// Announce the controller role
    RoleRequest {
        /// Requested role
        role: Role,
        /// Monotonic generation id enforcing request order
        generation_id: u64,
    },
    /// Request flow statistics over all tables
    FlowStatsRequest,
    /// Request group descriptions
    GroupDescRequest,
    /// Request port counters
    PortStatsRequest,
    /// Request port descriptions
    PortDescRequest,
}

/// One flow entry of a flow-stats reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    /// Table the rule lives in
    pub table_id: u8,
    /// Match of the rule
    pub match_: Match,
    /// Instructions of the rule
    pub instructions: Vec<Instr>,
    /// Packets accounted to the rule
    pub packet_count: u64,
    /// Bytes accounted to the rule
    pub byte_count: u64,
    /// Seconds the rule has been installed
    pub duration_sec: u64,
}

/// One group of a group-description reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDescEntry {
    /// Group identifier
    pub gid: Gid,
    /// True for fast-failover groups
    pub fast_failover: bool,
    /// Buckets of the group
    pub buckets: Vec<Bucket>,
}

/// One port of a port-stats reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortStatEntry {
    /// Port number
    pub port: PortNo,
    /// Received packets since boot
    pub rx_packets: u64,
    /// Received bytes since boot
    pub rx_bytes: u64,
    /// Receive errors since boot
    pub rx_errors: u64,
    /// Transmitted packets since boot
    pub tx_packets: u64,
    /// Transmitted bytes since boot
    pub tx_bytes: u64,
    /// Transmit errors since boot
    pub tx_errors: u64,
}

/// One port of a port-description reply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortDescEntry {
    /// Port number
    pub port: PortNo,
    /// Current speed in kilobits per second
    pub curr_speed: u64,
}

/// Events the switch-protocol collaborator feeds into the controller core.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchEvent {
    /// A switch connected or reconnected
    SwitchEnter {
        /// The switch
        dpid: Dpid,
    },
    /// Discovery found a new intra-domain link
    LinkAdd {
        /// Source switch
        src_sw: Dpid,
        /// Destination switch
        dst_sw: Dpid,
        /// Source port
        src_port: PortNo,
        /// Destination port
        dst_port: PortNo,
    },
    /// Discovery lost an intra-domain link
    LinkDelete {
        /// Source switch
        src_sw: Dpid,
        /// Destination switch
        dst_sw: Dpid,
        /// Source port
        src_port: PortNo,
        /// Destination port
        dst_port: PortNo,
    },
    /// Discovery found a host
    HostAdd {
        /// Host name
        name: String,
        /// Switch it attaches to
        sw: Dpid,
        /// Port it attaches on
        port: PortNo,
        /// Its IPv4 address
        addr: Ipv4Addr,
        /// Its MAC address
        eth: String,
    },
    /// Discovery lost a host
    HostDelete {
        /// Switch it attached to
        sw: Dpid,
        /// Port it attached on
        port: PortNo,
    },
    /// Discovery found a link leaving the domain
    InterDomainLinkAdd {
        /// Local switch
        src_sw: Dpid,
        /// Local port
        src_port: PortNo,
        /// Foreign switch at the far end
        dest_sw: Dpid,
    },
    /// Discovery lost a link leaving the domain
    InterDomainLinkDelete {
        /// Local switch
        src_sw: Dpid,
        /// Local port
        src_port: PortNo,
        /// Foreign switch at the far end
        dest_sw: Dpid,
    },
    /// A port came up, reporting its current speed
    PortUp {
        /// The switch
        dpid: Dpid,
        /// The port description
        desc: PortDescEntry,
    },
    /// Flow statistics arrived
    FlowStats {
        /// The switch
        dpid: Dpid,
        /// The entries of the reply
        entries: Vec<FlowEntry>,
    },
    /// Port counters arrived
    PortStats {
        /// The switch
        dpid: Dpid,
        /// The entries of the reply
        entries: Vec<PortStatEntry>,
    },
    /// Port descriptions arrived
    PortDesc {
        /// The switch
        dpid: Dpid,
        /// The entries of the reply
        entries: Vec<PortDescEntry>,
    },
    /// Group descriptions arrived
    GroupDesc {
        /// The switch
        dpid: Dpid,
        /// The entries of the reply
        entries: Vec<GroupDescEntry>,
    },
    /// The switch confirmed a role change
    RoleReply {
        /// The switch
        dpid: Dpid,
        /// Confirmed role
        role: Role,
        /// Generation id of the confirmed request
        generation_id: u64,
    },
    /// A VLAN-tagged packet-in, fired by an ingress-change detection rule
    PacketInVlan {
        /// The switch
        dpid: Dpid,
        /// Port the packet arrived on
        in_port: PortNo,
        /// VID of the packet, resolving to the host pair
        vid: Gid,
    },
}

/// The "program switch" capability the core consumes.
///
/// Implementations own switch connectivity. Sending to a disconnected switch
/// is a transient condition: the caller checks [`SwitchCtl::connected`]
/// first, logs and skips the operation, and relies on the next
/// topology-change cycle to retry.
pub trait SwitchCtl {
    /// Returns true if the switch is currently connected.
    fn connected(&self, dpid: Dpid) -> bool;

    /// All currently connected switches, in ascending dpid order.
    fn switches(&self) -> Vec<Dpid>;

    /// Emit one program command towards a switch.
    fn send(&mut self, dpid: Dpid, op: SwitchOp);
}

/// A [`SwitchCtl`] that records every emitted command. Used by the test
/// suites of this crate and of downstream crates.
#[derive(Debug, Clone, Default)]
pub struct RecordingSwitch {
    connected: BTreeSet<Dpid>,
    /// Every command sent so far, in emission order
    pub ops: Vec<(Dpid, SwitchOp)>,
}

impl RecordingSwitch {
    /// A recorder with the given switches connected.
    pub fn with_switches<I: IntoIterator<Item = Dpid>>(dpids: I) -> Self {
        Self { connected: dpids.into_iter().collect(), ops: Vec::new() }
    }

    /// Mark a switch connected.
    pub fn connect(&mut self, dpid: Dpid) {
        self.connected.insert(dpid);
    }

    /// Mark a switch disconnected.
    pub fn disconnect(&mut self, dpid: Dpid) {
        self.connected.remove(&dpid);
    }

    /// Drain and return the recorded commands.
    pub fn take_ops(&mut self) -> Vec<(Dpid, SwitchOp)> {
        std::mem::take(&mut self.ops)
    }

    /// The recorded commands for one switch.
    pub fn ops_for(&self, dpid: Dpid) -> Vec<SwitchOp> {
        self.ops.iter().filter(|(d, _)| *d == dpid).map(|(_, op)| op.clone()).collect()
    }
}

impl SwitchCtl for RecordingSwitch {
    fn connected(&self, dpid: Dpid) -> bool {
        self.connected.contains(&dpid)
    }

    fn switches(&self) -> Vec<Dpid> {
        self.connected.iter().copied().collect()
    }

    fn send(&mut self, dpid: Dpid, op: SwitchOp) {
        self.ops.push((dpid, op));
    }
}
