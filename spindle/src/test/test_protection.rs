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

//! End-to-end protection scenarios on the local-controller core.

use crate::controller::{ProtectCfg, ProtectionController, RecomputeOutcome};
use crate::path_info::{Endpoint, PairKey};
use crate::proto::{Instruction, InstrAction, LcToRoot, SegmentEnd};
use crate::protect::build_plan;
use crate::switch::{RecordingSwitch, SwitchOp};
use crate::topo::{NodeId, PortNo, Topology};

fn sw(d: u64) -> NodeId {
    NodeId::Switch(d)
}

fn host(n: &str) -> NodeId {
    NodeId::Host(n.to_string())
}

fn link(t: &mut Topology, a: &NodeId, b: &NodeId, pa: PortNo, pb: PortNo) {
    t.add_link(a, b, pa, pb).unwrap();
    t.add_link(b, a, pb, pa).unwrap();
}

fn ctrl_with(
    topo: Topology,
    hosts: &[&str],
    switches: Vec<u64>,
) -> ProtectionController<RecordingSwitch> {
    let mut ctrl =
        ProtectionController::new(1, ProtectCfg::default(), RecordingSwitch::with_switches(switches));
    *ctrl.graph_mut() = topo;
    for h in hosts {
        ctrl.hosts_mut().push(h.to_string());
    }
    ctrl
}

/// Two switches in a row: a primary exists but no disjoint alternative, so
/// the secondary collapses onto the same links, the groups hold exactly the
/// forward ports, and no splice is generated.
#[test]
fn test_two_switch_pair() {
    let mut t = Topology::new();
    link(&mut t, &host("h1"), &sw(1), -1, 1);
    link(&mut t, &sw(1), &sw(2), 2, 1);
    link(&mut t, &sw(2), &host("h2"), 2, -1);

    let plan = build_plan(
        &mut t.clone(),
        None,
        &host("h1"),
        &host("h2"),
        None,
        None,
        1,
        true,
        true,
        false,
    )
    .unwrap();

    assert_eq!(plan.primary, vec![host("h1"), sw(1), sw(2), host("h2")]);
    // no alternate exists: the secondary adds nothing
    assert_eq!(plan.info.groups.get(&sw(1)), Some(&vec![2]));
    assert_eq!(plan.info.groups.get(&sw(2)), Some(&vec![2]));
    assert_eq!(plan.info.groups.len(), 2);
    assert!(plan.splices.is_empty());
    assert!(plan.info.special_flows.is_empty());
}

/// The diamond: minimally overlapping paths over the two arms, one splice
/// in each direction between the arms, and both fork ports in the group of
/// the fork switch.
#[test]
fn test_diamond_pair() {
    let mut t = Topology::new();
    link(&mut t, &host("h1"), &sw(1), -1, 1);
    link(&mut t, &sw(1), &sw(2), 2, 1);
    link(&mut t, &sw(1), &sw(3), 3, 1);
    link(&mut t, &sw(2), &sw(4), 2, 1);
    link(&mut t, &sw(3), &sw(4), 2, 2);
    link(&mut t, &sw(2), &sw(3), 3, 3);
    link(&mut t, &sw(4), &host("h2"), 3, -1);

    let plan = build_plan(
        &mut t.clone(),
        None,
        &host("h1"),
        &host("h2"),
        None,
        None,
        1,
        true,
        true,
        false,
    )
    .unwrap();

    assert_eq!(plan.primary, vec![host("h1"), sw(1), sw(2), sw(4), host("h2")]);
    assert_eq!(plan.secondary, vec![host("h1"), sw(1), sw(3), sw(4), host("h2")]);
    assert_eq!(plan.splices.get(&sw(2)), Some(&vec![sw(2), sw(3)]));
    assert_eq!(plan.splices.get(&sw(3)), Some(&vec![sw(3), sw(2)]));
    assert_eq!(plan.info.groups.get(&sw(1)), Some(&vec![2, 3]));
}

/// Group coverage: every switch of the primary port triples except ingress
/// and egress must own a group with at least one port (and here ingress and
/// egress do too, as they forward into the path).
#[test]
fn test_group_coverage() {
    let mut t = Topology::new();
    link(&mut t, &host("h1"), &sw(1), -1, 1);
    link(&mut t, &sw(1), &sw(2), 2, 1);
    link(&mut t, &sw(2), &sw(3), 2, 1);
    link(&mut t, &sw(3), &sw(4), 2, 1);
    link(&mut t, &sw(1), &sw(4), 3, 3);
    link(&mut t, &sw(4), &host("h2"), 2, -1);

    let mut g = t.clone();
    let plan =
        build_plan(&mut g, None, &host("h1"), &host("h2"), None, None, 1, true, true, false)
            .unwrap();
    let ports = t.flows_for_path(&plan.primary).unwrap();
    for hop in ports {
        let group = plan.info.groups.get(&hop.node);
        assert!(
            group.map_or(false, |g| !g.is_empty()),
            "switch {} of the primary path has no group",
            hop.node
        );
    }
}

/// A full recompute cycle on the controller: topology events populate the
/// graph, the debounce flag is raised, and the recompute installs both
/// directions of the pair.
#[test]
fn test_recompute_installs_both_directions() {
    let _ = pretty_env_logger::try_init();
    let mut ctrl = ctrl_with(Topology::new(), &[], vec![1, 2]);
    ctrl.promote_master();
    // drain the rebuild begun by promotion
    ctrl.process_flow_desc(1, &[]);
    ctrl.process_group_desc(1, vec![]);
    ctrl.process_flow_desc(2, &[]);
    ctrl.process_group_desc(2, vec![]);
    ctrl.rebuild_state_tick();
    ctrl.rebuild_state_tick();

    use crate::switch::SwitchEvent;
    ctrl.handle_switch_event(SwitchEvent::LinkAdd { src_sw: 1, dst_sw: 2, src_port: 2, dst_port: 1 });
    ctrl.handle_switch_event(SwitchEvent::HostAdd {
        name: "h1".to_string(),
        sw: 1,
        port: 1,
        addr: "10.0.0.1".parse().unwrap(),
        eth: "00:00:00:00:00:01".to_string(),
    });
    ctrl.handle_switch_event(SwitchEvent::HostAdd {
        name: "h2".to_string(),
        sw: 2,
        port: 2,
        addr: "10.0.0.2".parse().unwrap(),
        eth: "00:00:00:00:00:02".to_string(),
    });
    assert!(ctrl.topo_dirty);

    ctrl.switches.take_ops();
    assert_eq!(ctrl.recompute_paths(), RecomputeOutcome::Done);

    let forward: PairKey = ("h1".into(), "h2".into());
    let reverse: PairKey = ("h2".into(), "h1".into());
    assert!(ctrl.paths().contains_key(&forward));
    assert!(ctrl.paths().contains_key(&reverse));
    assert_ne!(ctrl.paths()[&forward].gid, ctrl.paths()[&reverse].gid);

    // the topology report went out
    assert!(ctrl.outbox.iter().any(|m| matches!(m, LcToRoot::Topo { .. })));
}

/// Recompute while not master computes nothing.
#[test]
fn test_recompute_requires_master() {
    let mut ctrl = ctrl_with(Topology::new(), &["h1", "h2"], vec![1]);
    assert_eq!(ctrl.recompute_paths(), RecomputeOutcome::NotMaster);
    assert!(ctrl.paths().is_empty());
}

fn end_segment_instructions() -> Vec<Instruction> {
    vec![
        Instruction {
            action: InstrAction::Add,
            input: SegmentEnd::Link(1, 4),
            output: SegmentEnd::Host,
            out_addr: None,
            out_eth: Some("00:00:00:00:00:02".to_string()),
        },
        Instruction {
            action: InstrAction::Add,
            input: SegmentEnd::Link(2, 4),
            output: SegmentEnd::Host,
            out_addr: None,
            out_eth: Some("00:00:00:00:00:02".to_string()),
        },
    ]
}

/// An end segment with an alternate ingress: the detector rules go onto the
/// alternate port, and a detection packet-in swaps the ingress, migrates
/// the detector, and notifies the root.
#[test]
fn test_ingress_change_round_trip() {
    // two boundary switches feeding the destination switch
    let mut t = Topology::new();
    link(&mut t, &sw(1), &sw(3), 1, 1);
    link(&mut t, &sw(2), &sw(3), 1, 2);
    link(&mut t, &sw(1), &sw(2), 2, 2);
    link(&mut t, &sw(3), &host("h2"), 3, -1);
    let mut ctrl = ctrl_with(t, &["h2"], vec![1, 2, 3]);
    ctrl.promote_master();
    for dpid in 1..=3 {
        ctrl.process_flow_desc(dpid, &[]);
        ctrl.process_group_desc(dpid, vec![]);
    }

    let hkey: PairKey = ("h1".to_string(), "h2".to_string());
    let instructions = end_segment_instructions();
    ctrl.handle_compute_paths(vec![(hkey.clone(), instructions)]);

    let info = ctrl.paths().get(&hkey).expect("segment installed").clone();
    assert_eq!(info.ingress, Some(Endpoint::Boundary(1, 4)));
    assert_eq!(info.ingress_change_detect, vec![(2, 4)]);
    // detector rules were emitted towards the alternate ingress
    assert!(ctrl
        .switches
        .ops_for(2)
        .iter()
        .any(|op| matches!(op, SwitchOp::MeterAdd { pps: 1, .. })));

    // in-flight packets must not flap the pair straight back
    let gid = info.gid;
    ctrl.ingress_changed(gid, 2, 4);
    assert_eq!(
        ctrl.paths().get(&hkey).unwrap().ingress,
        Some(Endpoint::Boundary(1, 4)),
        "swap during lockout must be ignored"
    );

    ctrl.expire_ing_change_wait(&hkey);
    ctrl.outbox.clear();
    ctrl.switches.take_ops();
    ctrl.ingress_changed(gid, 2, 4);

    let info = ctrl.paths().get(&hkey).unwrap();
    assert_eq!(info.ingress, Some(Endpoint::Boundary(2, 4)));
    // destination segment: the egress stays local
    assert_eq!(info.egress, Some(Endpoint::Local(3)));
    // the detector moved to the previous ingress
    assert_eq!(info.ingress_change_detect, vec![(1, 4)]);
    assert!(ctrl
        .switches
        .ops_for(1)
        .iter()
        .any(|op| matches!(op, SwitchOp::MeterAdd { pps: 1, .. })));

    // the root was told, with the primary instruction on the new ingress
    let notified = ctrl.outbox.iter().find_map(|m| match m {
        LcToRoot::IngressChange { hkey: k, new_paths, .. } if *k == hkey => Some(new_paths.clone()),
        _ => None,
    });
    let new_paths = notified.expect("ingress change notified");
    assert_eq!(new_paths[0].input, SegmentEnd::Link(2, 4));
    assert_eq!(new_paths[1].input, SegmentEnd::Link(1, 4));
}

/// Withdrawing an inter-domain segment removes its detectors and state.
#[test]
fn test_segment_delete_withdraws() {
    let mut t = Topology::new();
    link(&mut t, &sw(1), &sw(3), 1, 1);
    link(&mut t, &sw(2), &sw(3), 1, 2);
    link(&mut t, &sw(1), &sw(2), 2, 2);
    link(&mut t, &sw(3), &host("h2"), 3, -1);
    let mut ctrl = ctrl_with(t, &["h2"], vec![1, 2, 3]);
    ctrl.promote_master();
    for dpid in 1..=3 {
        ctrl.process_flow_desc(dpid, &[]);
        ctrl.process_group_desc(dpid, vec![]);
    }

    let hkey: PairKey = ("h1".to_string(), "h2".to_string());
    ctrl.handle_compute_paths(vec![(hkey.clone(), end_segment_instructions())]);
    assert!(ctrl.paths().contains_key(&hkey));

    let mut delete = end_segment_instructions();
    for instr in &mut delete {
        instr.action = InstrAction::Delete;
    }
    ctrl.handle_compute_paths(vec![(hkey.clone(), delete)]);
    assert!(!ctrl.paths().contains_key(&hkey));
    // the detector meter was removed
    assert!(ctrl
        .switches
        .ops_for(2)
        .iter()
        .any(|op| matches!(op, SwitchOp::MeterDel { .. })));
}
