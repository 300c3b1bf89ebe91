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

//! Traffic-engineering scenarios.

use crate::controller::{ProtectCfg, ProtectionController};
use crate::path_info::{PairKey, PathStats};
use crate::switch::{RecordingSwitch, SwitchOp};
use crate::te::{OptiMethod, TeConfig, TeOptimizer};
use crate::topo::{NodeId, PortNo, PortUpdate, Topology};

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

fn set_speed(t: &mut Topology, node: &NodeId, port: PortNo, speed: u64) {
    t.update_port_info(node, port, PortUpdate { speed: Some(speed), ..Default::default() });
}

const WEAK: u64 = 100_000_000;
const FAST: u64 = 1_000_000_000;

/// A fanout from s1 to s8 over six transit switches t1..t6 (dpids 2..7).
/// The link s1 -> t1 is the weak one; everything else is fast. Two pairs,
/// (h1,h2) and (h3,h4), both take the t1 arm.
fn fanout_ctrl(
    te_cfg: TeConfig,
    heavy_bytes: u64,
    light_bytes: u64,
) -> (ProtectionController<RecordingSwitch>, TeOptimizer) {
    let mut t = Topology::new();
    link(&mut t, &host("h1"), &sw(1), -1, 10);
    link(&mut t, &host("h3"), &sw(1), -1, 11);
    link(&mut t, &host("h2"), &sw(8), -1, 10);
    link(&mut t, &host("h4"), &sw(8), -1, 11);
    for i in 0..6u64 {
        let transit = sw(2 + i);
        let port = (1 + i) as PortNo;
        link(&mut t, &sw(1), &transit, port, 1);
        link(&mut t, &transit, &sw(8), 2, port);
        let speed = if i == 0 { WEAK } else { FAST };
        set_speed(&mut t, &sw(1), port, speed);
        set_speed(&mut t, &transit, 2, FAST);
    }
    set_speed(&mut t, &sw(8), 10, FAST);
    set_speed(&mut t, &sw(8), 11, FAST);

    // telemetry: the whole load currently leaves on the weak arm
    t.add_poll_tx_bytes(&sw(1), 1, heavy_bytes + light_bytes);
    t.add_poll_tx_bytes(&sw(2), 2, heavy_bytes + light_bytes);
    for i in 1..6u64 {
        t.add_poll_tx_bytes(&sw(1), (1 + i) as PortNo, 0);
        t.add_poll_tx_bytes(&sw(2 + i), 2, 0);
    }
    t.add_poll_tx_bytes(&sw(8), 10, heavy_bytes);
    t.add_poll_tx_bytes(&sw(8), 11, light_bytes);

    let mut ctrl = ProtectionController::new(
        1,
        ProtectCfg { poll_interval: 10.0, ..Default::default() },
        RecordingSwitch::with_switches(1..=8),
    );
    *ctrl.graph_mut() = t;
    ctrl.hosts_mut().extend(vec![
        "h1".to_string(),
        "h2".to_string(),
        "h3".to_string(),
        "h4".to_string(),
    ]);
    ctrl.promote_master();
    for dpid in 1..=8 {
        ctrl.process_flow_desc(dpid, &[]);
        ctrl.process_group_desc(dpid, vec![]);
    }
    ctrl.rebuild_state_tick();
    ctrl.rebuild_state_tick();
    ctrl.recompute_paths();
    ctrl.switches.take_ops();
    ctrl.outbox.clear();

    // pin the measured ingress counters of the two candidates
    let heavy: PairKey = ("h1".into(), "h2".into());
    let light: PairKey = ("h3".into(), "h4".into());
    ctrl.paths_mut().get_mut(&heavy).unwrap().stats =
        Some(PathStats { bytes: heavy_bytes, ..Default::default() });
    ctrl.paths_mut().get_mut(&light).unwrap().stats =
        Some(PathStats { bytes: light_bytes, ..Default::default() });
    // the remaining pairs carry nothing
    for (key, info) in ctrl.paths_mut().iter_mut() {
        if *key != heavy && *key != light {
            info.stats = None;
        }
    }

    (ctrl, TeOptimizer::new(te_cfg))
}

/// With ascending candidate order, moving the light pair off the congested
/// arm already resolves the congestion: it swaps onto the first alternate
/// and the heavy pair keeps its path.
#[test]
fn test_first_sol_resolves_with_one_swap() {
    // 55 Mb/s + 40 Mb/s offered on a 100 Mb/s arm (poll interval 10 s)
    let heavy_bytes = 68_750_000u64; // 55 Mb/s
    let light_bytes = 50_000_000u64; // 40 Mb/s
    let (mut ctrl, mut te) = fanout_ctrl(
        TeConfig { candidate_sort_rev: false, ..Default::default() },
        heavy_bytes,
        light_bytes,
    );

    // both pairs forward over the weak arm
    let heavy: PairKey = ("h1".into(), "h2".into());
    let light: PairKey = ("h3".into(), "h4".into());
    assert_eq!(ctrl.paths()[&heavy].groups[&sw(1)][0], 1);
    assert_eq!(ctrl.paths()[&light].groups[&sw(1)][0], 1);

    assert!(te.check_link_congested(1, 1, 0.95));
    te.optimise(&mut ctrl);

    // the light candidate moved to the first alternate, the heavy stayed
    assert_eq!(ctrl.paths()[&light].groups[&sw(1)][0], 2);
    assert_eq!(ctrl.paths()[&heavy].groups[&sw(1)][0], 1);

    // exactly one group modification went out, for the light pair
    let light_gid = ctrl.paths()[&light].gid;
    let mods: Vec<_> = ctrl
        .switches
        .ops
        .iter()
        .filter(|(_, op)| matches!(op, SwitchOp::GroupAdd { modify: true, .. }))
        .collect();
    assert_eq!(mods.len(), 1);
    assert!(matches!(&mods[0].1, SwitchOp::GroupAdd { gid, .. } if *gid == light_gid));

    // congestion monotone: the modelled load on the weak arm dropped to or
    // below threshold times speed
    let info = ctrl.graph().get_port_info(&sw(1), 1).unwrap();
    let load_bps = info.poll.as_ref().unwrap().tx_bytes as f64 * 8.0 / 10.0;
    assert!(load_bps <= 0.9 * WEAK as f64);
}

/// With descending candidate order the heavy hitter moves first; that alone
/// resolves the congestion here as well.
#[test]
fn test_candidate_order_descending_moves_heavy_first() {
    let heavy_bytes = 68_750_000u64;
    let light_bytes = 50_000_000u64;
    let (mut ctrl, mut te) = fanout_ctrl(
        TeConfig { candidate_sort_rev: true, ..Default::default() },
        heavy_bytes,
        light_bytes,
    );

    let heavy: PairKey = ("h1".into(), "h2".into());
    let light: PairKey = ("h3".into(), "h4".into());

    assert!(te.check_link_congested(1, 1, 0.95));
    te.optimise(&mut ctrl);

    assert_eq!(ctrl.paths()[&heavy].groups[&sw(1)][0], 2);
    assert_eq!(ctrl.paths()[&light].groups[&sw(1)][0], 1);
}

/// A second congestion report for the same port while one is pending does
/// not re-trigger, and suppressed inter-domain ports are skipped for two
/// polls.
#[test]
fn test_detection_bookkeeping() {
    let mut te = TeOptimizer::new(TeConfig::default());
    assert!(te.check_link_congested(1, 1, 0.95));
    assert!(!te.check_link_congested(1, 1, 0.97));
    // below threshold: never congested
    assert!(!te.check_link_congested(1, 2, 0.5));

    assert!(!te.suppression_tick(1, 1));
    te.clear_suppression(1, 1);
}

/// `FirstSol` must refuse the partial-accept flag.
#[test]
fn test_first_sol_forces_partial_accept_off() {
    let te = TeOptimizer::new(TeConfig {
        opti_method: OptiMethod::FirstSol,
        partial_accept: true,
        ..Default::default()
    });
    assert!(!te.cfg_partial_accept());
}

/// When no alternate can absorb the traffic the congested state stays and,
/// on an intra-domain link, nothing is escalated.
#[test]
fn test_unresolvable_congestion_leaves_paths_alone() {
    let heavy_bytes = 68_750_000u64;
    let light_bytes = 50_000_000u64;
    let (mut ctrl, mut te) = fanout_ctrl(
        TeConfig { candidate_sort_rev: false, ..Default::default() },
        heavy_bytes,
        light_bytes,
    );

    // cripple every alternate so no admissible swap exists
    let graph = ctrl.graph_mut();
    for i in 1..6u64 {
        set_speed(graph, &sw(1), (1 + i) as PortNo, 1);
        set_speed(graph, &sw(2 + i), 2, 1);
    }

    let heavy: PairKey = ("h1".into(), "h2".into());
    let light: PairKey = ("h3".into(), "h4".into());
    assert!(te.check_link_congested(1, 1, 0.95));
    te.optimise(&mut ctrl);

    assert_eq!(ctrl.paths()[&heavy].groups[&sw(1)][0], 1);
    assert_eq!(ctrl.paths()[&light].groups[&sw(1)][0], 1);
    // intra-domain: no escalation to the root
    assert!(ctrl.outbox.is_empty());
}

/// `BestSolUsage` picks the alternate with the most spare capacity.
#[test]
fn test_best_sol_usage_prefers_spare() {
    let heavy_bytes = 68_750_000u64;
    let light_bytes = 50_000_000u64;
    let (mut ctrl, mut te) = fanout_ctrl(
        TeConfig {
            opti_method: OptiMethod::BestSolUsage,
            candidate_sort_rev: false,
            ..Default::default()
        },
        heavy_bytes,
        light_bytes,
    );

    // preload the t2 arm so the splice alternate through it is less spare
    // than any other; the light pair's group holds ports [1, 2] so only
    // port 2 is an alternate, but the choice among equal candidates is by
    // maximum spare, which the background load breaks
    ctrl.graph_mut().add_poll_tx_bytes(&sw(1), 2, 100_000_000);

    let light: PairKey = ("h3".into(), "h4".into());
    assert!(te.check_link_congested(1, 1, 0.95));
    te.optimise(&mut ctrl);

    // still resolved through the only alternate; the background load is
    // simply accounted into the spare computation
    assert_eq!(ctrl.paths()[&light].groups[&sw(1)][0], 2);
}
