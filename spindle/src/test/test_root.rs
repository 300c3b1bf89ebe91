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

//! Root-coordinator scenarios: topology assembly, loop-free composition,
//! emission diffing, feedback absorption and controller death.

use crate::proto::{CtrlMsg, HostRec, Instruction, LcToRoot, SegmentEnd, UnknownLinkRec};
use crate::root::{RootConfig, RootController, RootOut};
use crate::topo::NodeId;

fn host_rec(name: &str, last_octet: u8) -> HostRec {
    HostRec {
        name: name.to_string(),
        eth: format!("00:00:00:00:00:{:02x}", last_octet),
        addr: format!("10.0.0.{}", last_octet).parse().unwrap(),
    }
}

fn topo_msg(
    cid: u64,
    hosts: Vec<HostRec>,
    switches: Vec<u64>,
    unknown_links: Vec<UnknownLinkRec>,
) -> LcToRoot {
    LcToRoot::Topo { cid, hosts, switches, unknown_links, te_thresh: 0.9, paths: vec![] }
}

fn ulink(sw: u64, port: i32, dest_sw: u64, cid: u64) -> UnknownLinkRec {
    UnknownLinkRec { sw, port, dest_sw, speed: 1_000_000_000, cid: Some(cid) }
}

/// Three fully meshed domains: c1 {s1, h1}, c2 {s2}, c3 {s3, h3}.
fn meshed_root() -> RootController {
    let mut root = RootController::new(RootConfig::default());
    root.handle_message(topo_msg(
        1,
        vec![host_rec("h1", 1)],
        vec![1],
        vec![ulink(1, 1, 2, 2), ulink(1, 2, 3, 3)],
    ));
    root.handle_message(topo_msg(
        2,
        vec![],
        vec![2],
        vec![ulink(2, 1, 1, 1), ulink(2, 2, 3, 3)],
    ));
    root.handle_message(topo_msg(
        3,
        vec![host_rec("h3", 3)],
        vec![3],
        vec![ulink(3, 1, 2, 2), ulink(3, 2, 1, 1)],
    ));
    root
}

fn compute_paths_for(outbox: &[RootOut], cid: u64) -> Vec<(crate::path_info::PairKey, Vec<Instruction>)> {
    outbox
        .iter()
        .filter_map(|out| match out {
            RootOut::ToLc(c, CtrlMsg::ComputePaths { paths }) if *c == cid => Some(paths.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Walk a composed path and collect the domain sequence. The fixtures give
/// switch `n` to domain `n`, so ownership is direct.
fn domain_sequence(path: &[NodeId]) -> Vec<u64> {
    let mut out: Vec<u64> = Vec::new();
    for node in path {
        let cid = match node {
            NodeId::Domain(cid) => Some(*cid),
            NodeId::Switch(dpid) => Some(*dpid),
            _ => None,
        };
        if let Some(cid) = cid {
            if out.last() != Some(&cid) {
                out.push(cid);
            }
        }
    }
    out
}

#[test]
fn test_direct_path_between_domains() {
    let mut root = meshed_root();
    root.compute_inter_domain_paths();

    let paths = root.old_paths.get(&("h1".to_string(), "h3".to_string())).expect("pair composed");
    // the primary goes straight from c1 to c3
    let seq = domain_sequence(&paths[0].0);
    assert_eq!(seq, vec![1, 3]);

    // c1 got a start instruction, c3 an end instruction
    let c1 = compute_paths_for(&root.outbox, 1);
    let (_, instrs) = c1
        .iter()
        .find(|(k, _)| *k == ("h1".to_string(), "h3".to_string()))
        .expect("instructions for the pair");
    assert_eq!(instrs[0].input, SegmentEnd::Host);
    assert!(matches!(instrs[0].output, SegmentEnd::Link(1, _)));
    assert_eq!(instrs[0].out_addr, Some("10.0.0.3".parse().unwrap()));

    let c3 = compute_paths_for(&root.outbox, 3);
    let (_, instrs) = c3
        .iter()
        .find(|(k, _)| *k == ("h1".to_string(), "h3".to_string()))
        .expect("instructions for the pair");
    assert_eq!(instrs[0].output, SegmentEnd::Host);
    assert_eq!(instrs[0].out_eth, Some("00:00:00:00:00:03".to_string()));
}

/// With the direct link gone, the path transits c2 exactly once and never
/// returns to a left domain.
#[test]
fn test_no_domain_revisit_via_transit() {
    let mut root = meshed_root();
    root.compute_inter_domain_paths();
    root.outbox.clear();

    // both halves of the c1-c3 link die
    root.handle_message(LcToRoot::DeadPort { cid: 1, sw: 1, port: 2 });
    root.handle_message(LcToRoot::DeadPort { cid: 3, sw: 3, port: 2 });
    root.compute_inter_domain_paths();

    let paths = root.old_paths.get(&("h1".to_string(), "h3".to_string())).expect("pair composed");
    let seq = domain_sequence(&paths[0].0);
    assert_eq!(seq, vec![1, 2, 3]);

    // the transit domain holds a boundary-to-boundary instruction (it was
    // already installed for the old secondary, so nothing is re-emitted)
    let hkey = ("h1".to_string(), "h3".to_string());
    let instrs = root.old_send.get(&2).and_then(|m| m.get(&hkey)).expect("transit instructions");
    assert!(matches!(instrs[0].input, SegmentEnd::Link(2, _)));
    assert!(matches!(instrs[0].output, SegmentEnd::Link(2, _)));
}

/// Recomputation without any change emits nothing: the diff against the
/// stored emission state is empty.
#[test]
fn test_emission_diff_is_quiescent() {
    let mut root = meshed_root();
    root.compute_inter_domain_paths();
    root.outbox.clear();

    root.compute_inter_domain_paths();
    for out in &root.outbox {
        assert!(
            !matches!(out, RootOut::ToLc(_, CtrlMsg::ComputePaths { .. })),
            "unchanged paths must not be re-emitted: {:?}",
            out
        );
    }
}

/// Absorbing an ingress change rewrites the stored emission record so that
/// the swapped instruction list counts as already installed.
#[test]
fn test_ingress_change_absorption() {
    let mut root = meshed_root();
    root.compute_inter_domain_paths();
    root.outbox.clear();

    let hkey = ("h1".to_string(), "h3".to_string());
    let installed = root
        .old_send
        .get(&3)
        .and_then(|m| m.get(&hkey))
        .expect("instructions for c3")
        .clone();

    // swap the primary ingress with an alternate end
    let mut new_paths = installed.clone();
    new_paths[0].input = SegmentEnd::Link(3, 99);
    root.handle_message(LcToRoot::IngressChange {
        cid: 3,
        hkey: hkey.clone(),
        new_paths: new_paths.clone(),
    });

    let stored = root
        .old_send
        .get(&3)
        .and_then(|m| m.get(&hkey))
        .expect("instructions for c3")
        .clone();
    assert_eq!(stored, new_paths);
}

/// A controller missing its keep-alives is removed exactly once: hosts and
/// exclusively owned switches vanish, every surviving controller hears one
/// `ctrl_dead`.
#[test]
fn test_lc_death() {
    let mut root = meshed_root();
    root.compute_inter_domain_paths();
    root.outbox.clear();

    // the default threshold declares death after one missed keep-alive
    assert!(root.keep_alive_expired(3));

    assert!(!root.graph.contains(&NodeId::Host("h3".to_string())));
    assert!(!root.graph.contains(&NodeId::Switch(3)));
    assert!(!root.graph.contains(&NodeId::Domain(3)));
    // the surviving domains stay
    assert!(root.graph.contains(&NodeId::Switch(1)));
    assert!(root.graph.contains(&NodeId::Switch(2)));

    let dead_msgs: Vec<_> = root
        .outbox
        .iter()
        .filter(|out| matches!(out, RootOut::Broadcast(CtrlMsg::CtrlDead { cid: 3 })))
        .collect();
    assert_eq!(dead_msgs.len(), 1);
    assert!(root.recomp_needed);
}

/// Below the miss threshold the controller survives and the timer restarts.
#[test]
fn test_keep_alive_miss_below_threshold() {
    let mut root = RootController::new(RootConfig { keep_alive_count: 2, ..Default::default() });
    root.handle_message(topo_msg(1, vec![host_rec("h1", 1)], vec![1], vec![]));
    assert!(!root.keep_alive_expired(1));
    // a message resets the miss count
    root.handle_message(LcToRoot::Discover { cid: 1, te_thresh: 0.9 });
    assert!(!root.keep_alive_expired(1));
    assert!(root.keep_alive_expired(1));
}

/// An unknown-switch query is answered once the owner is known, and the
/// adjacency becomes a real link when both halves agree.
#[test]
fn test_unknown_sw_resolution() {
    let mut root = RootController::new(RootConfig::default());
    root.handle_message(topo_msg(1, vec![host_rec("h1", 1)], vec![1], vec![]));
    root.handle_message(topo_msg(2, vec![host_rec("h2", 2)], vec![2], vec![]));

    root.handle_message(LcToRoot::UnknownSw { cid: 1, sw: 1, port: 1, dest_sw: 2, speed: 1_000_000_000 });
    // the owner of switch 2 is c2
    assert!(root.outbox.iter().any(|out| matches!(
        out,
        RootOut::ToLc(1, CtrlMsg::UnknownSw { cid: 2, sw: 1, port: 1, dest_sw: 2 })
    )));
    // only one half known: no real link yet
    assert!(root.graph.find_ports(&NodeId::Switch(1), &NodeId::Switch(2)).is_none());

    root.handle_message(LcToRoot::UnknownSw { cid: 2, sw: 2, port: 3, dest_sw: 1, speed: 1_000_000_000 });
    assert_eq!(root.graph.find_ports(&NodeId::Switch(1), &NodeId::Switch(2)), Some((1, 3)));
    // the staged speed was applied
    assert_eq!(
        root.graph.get_port_info(&NodeId::Switch(1), 1).unwrap().speed,
        1_000_000_000
    );
}
