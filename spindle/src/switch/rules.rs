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

//! Factories for the flow rules, groups and meters the controllers install.

use super::{Action, Bucket, EthType, Instr, Match, OxmField, SwitchOp};
use crate::gid::Gid;
use crate::topo::PortNo;
use std::net::Ipv4Addr;

/// Maximum packet-in length asking for the whole, unbuffered packet
pub const CONTROLLER_NO_BUFFER: u16 = 0xffff;
/// Source MAC sentinel written into switch-generated ARP replies
pub const ARP_SENTINEL_MAC: &str = "fb:ff:ff:ff:ff:ff";
/// Nearest-bridge multicast MAC the discovery rule matches
pub const LLDP_NEAREST_BRIDGE: &str = "01:80:c2:00:00:0e";
/// Priority of the always-present LLDP discovery rule
pub const LLDP_PRIORITY: u16 = 0xffff;

/// Build a flow-add from a match, apply-actions and extra instructions.
pub fn flow_add(
    table_id: u8,
    priority: u16,
    match_: Match,
    actions: Vec<Action>,
    extra: Vec<Instr>,
) -> SwitchOp {
    let mut instructions = vec![Instr::Apply(actions)];
    instructions.extend(extra);
    SwitchOp::FlowAdd { table_id, priority, match_, instructions }
}

/// The ingress rule of a pair: tag traffic for the destination with the
/// pair's VID and hand it to the fast-failover group.
pub fn ingress(gid: Gid, in_port: PortNo, addr: Option<Ipv4Addr>) -> (Match, Vec<Action>, u16) {
    let match_ = Match {
        in_port: Some(in_port),
        eth_type: addr.map(|_| EthType::Ip),
        ipv4_dst: addr,
        ..Default::default()
    };
    (match_, vec![Action::PushVlan(gid), Action::Group(gid)], 0)
}

/// The egress rule of a pair: strip the tag, restore the destination MAC and
/// hand the packet to the group that outputs towards the host.
pub fn egress(gid: Gid, eth_dst: Option<&str>) -> (Match, Vec<Action>, u16) {
    let match_ = Match { vlan: Some(gid), ..Default::default() };
    let mut actions = vec![Action::PopVlan];
    if let Some(eth) = eth_dst {
        actions.push(Action::SetEthDst(eth.to_string()));
    }
    actions.push(Action::Group(gid));
    (match_, actions, 1)
}

/// The transit rule redirecting tagged traffic into a pair's group.
pub fn group_redirect(gid: Gid) -> (Match, Vec<Action>, u16) {
    (Match { vlan: Some(gid), ..Default::default() }, vec![Action::Group(gid)], 0)
}

/// A splice mid-node rule that cannot be expressed as part of a group.
pub fn special_flow(gid: Gid, in_port: PortNo, out_port: PortNo) -> (Match, Vec<Action>, u16) {
    (
        Match { vlan: Some(gid), in_port: Some(in_port), ..Default::default() },
        vec![Action::Output(out_port)],
        0,
    )
}

/// The single-switch shortcut rule used when both hosts of a pair attach to
/// the same switch: rewrite the MAC and output directly, no VLAN involved.
pub fn same_switch(
    addr: Option<Ipv4Addr>,
    eth_dst: Option<&str>,
    in_port: PortNo,
    out_port: PortNo,
) -> (Match, Vec<Action>, u16) {
    let match_ = Match {
        in_port: Some(in_port),
        eth_type: addr.map(|_| EthType::Ip),
        ipv4_dst: addr,
        ..Default::default()
    };
    let mut actions = Vec::new();
    if let Some(eth) = eth_dst {
        actions.push(Action::SetEthDst(eth.to_string()));
    }
    actions.push(Action::Output(out_port));
    (match_, actions, 0)
}

/// The ARP responder rewrite: turn a who-has request into a reply in place,
/// swapping the sender and target address fields through a scratch register
/// and answering on the port the request came in on. The switch thereby
/// replies locally without the controller or the destination participating.
pub fn arp_fix() -> (Match, Vec<Action>, u16) {
    let match_ = Match { eth_type: Some(EthType::Arp), ..Default::default() };
    let actions = vec![
        Action::RegMove { src: OxmField::EthSrc, dst: OxmField::EthDst, n_bits: 48 },
        Action::SetEthSrc(ARP_SENTINEL_MAC.to_string()),
        Action::SetArpOp(2),
        Action::RegMove { src: OxmField::ArpSha, dst: OxmField::ArpTha, n_bits: 48 },
        Action::SetArpSha(ARP_SENTINEL_MAC.to_string()),
        Action::RegMove { src: OxmField::ArpTpa, dst: OxmField::Reg0, n_bits: 32 },
        Action::RegMove { src: OxmField::ArpSpa, dst: OxmField::ArpTpa, n_bits: 32 },
        Action::RegMove { src: OxmField::Reg0, dst: OxmField::ArpSpa, n_bits: 32 },
        Action::OutputInPort,
    ];
    (match_, actions, 0)
}

/// The LLDP discovery rule, always installed at top priority on every
/// switch: steer discovery frames to the controller, unbuffered.
pub fn lldp_discovery() -> (Match, Vec<Action>, u16) {
    let match_ = Match {
        eth_type: Some(EthType::Lldp),
        eth_dst: Some(LLDP_NEAREST_BRIDGE.to_string()),
        ..Default::default()
    };
    (match_, vec![Action::OutputController(CONTROLLER_NO_BUFFER)], LLDP_PRIORITY)
}

/// Fast-failover buckets for an ordered port list: each bucket watches its
/// own output port.
pub fn group_buckets(ports: &[PortNo]) -> Vec<Bucket> {
    ports.iter().map(|p| Bucket { watch_port: *p, actions: vec![Action::Output(*p)] }).collect()
}

/// Table-0 half of the ingress-change detector: forward the packet normally
/// and continue into table 1 for the rate-limited controller copy. On the
/// egress switch the normal forwarding includes the egress rewrite, with the
/// tag restored afterwards so the detector VID survives.
pub fn ingress_change_table0(
    gid: Gid,
    in_port: PortNo,
    on_egress: bool,
    eth_dst: Option<&str>,
) -> SwitchOp {
    let match_ = Match { in_port: Some(in_port), vlan: Some(gid), ..Default::default() };
    let mut actions = Vec::new();
    if on_egress {
        actions.push(Action::PopVlan);
        if let Some(eth) = eth_dst {
            actions.push(Action::SetEthDst(eth.to_string()));
        }
        actions.push(Action::Group(gid));
        actions.push(Action::PushVlan(gid));
    } else {
        actions.push(Action::Group(gid));
    }
    SwitchOp::FlowAdd {
        table_id: 0,
        priority: 2,
        match_,
        instructions: vec![Instr::Apply(actions), Instr::GotoTable(1)],
    }
}

/// Table-1 half of the ingress-change detector: send the (metered) copy to
/// the controller.
pub fn ingress_change_table1(gid: Gid) -> SwitchOp {
    SwitchOp::FlowAdd {
        table_id: 1,
        priority: 0,
        match_: Match { vlan: Some(gid), ..Default::default() },
        instructions: vec![
            Instr::Apply(vec![Action::OutputController(1)]),
            Instr::Meter(u32::from(gid)),
        ],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_group_buckets_watch_their_port() {
        let buckets = group_buckets(&[3, 1, 7]);
        assert_eq!(buckets.len(), 3);
        for (bucket, port) in buckets.iter().zip(&[3, 1, 7]) {
            assert_eq!(bucket.watch_port, *port);
            assert_eq!(bucket.actions, vec![Action::Output(*port)]);
        }
    }

    #[test]
    fn test_ingress_matches_port_and_destination() {
        let addr: Ipv4Addr = "10.0.0.2".parse().unwrap();
        let (m, actions, priority) = ingress(5, 3, Some(addr));
        assert_eq!(m.in_port, Some(3));
        assert_eq!(m.ipv4_dst, Some(addr));
        assert_eq!(m.eth_type, Some(EthType::Ip));
        assert_eq!(actions, vec![Action::PushVlan(5), Action::Group(5)]);
        assert_eq!(priority, 0);
    }

    #[test]
    fn test_egress_restores_mac() {
        let (m, actions, priority) = egress(5, Some("00:00:00:00:00:02"));
        assert_eq!(m.vlan, Some(5));
        assert_eq!(
            actions,
            vec![
                Action::PopVlan,
                Action::SetEthDst("00:00:00:00:00:02".to_string()),
                Action::Group(5)
            ]
        );
        assert_eq!(priority, 1);
    }

    #[test]
    fn test_lldp_discovery_is_top_priority() {
        let (_, _, priority) = lldp_discovery();
        assert_eq!(priority, LLDP_PRIORITY);
    }
}
