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

//! Constrained-shortest-path-first replanning and the traffic-model
//! helpers shared between the local and the root optimizer.

use super::TeOptimizer;
use crate::controller::ProtectionController;
use crate::path_info::{Endpoint, PairKey, PathInfo};
use crate::protect::{build_plan, group_table_to_path, Plan, TraceHop};
use crate::switch::SwitchCtl;
use crate::topo::{Dpid, Hop, NodeId, PortInfo, PortNo, Topology};
use log::*;

/// A directed link, identified by its source node and output port
pub type Link = (NodeId, PortNo);

/// The links of a reconstructed (group-walk) path.
pub fn links_of_trace(path: &[TraceHop]) -> Vec<Link> {
    path.iter().map(|h| h.link()).collect()
}

/// The links of a port-triple path.
pub fn links_of_hops(path: &[Hop]) -> Vec<Link> {
    path.iter().map(|h| h.link()).collect()
}

/// True if the path does not use the link.
pub fn path_avoids_link(path: &[Link], link: &Link) -> bool {
    !path.contains(link)
}

pub(crate) fn poll_tx_bytes(info: &PortInfo) -> u64 {
    info.poll.as_ref().map(|p| p.tx_bytes).unwrap_or(0)
}

/// A port participates in pruning and pricing only if it is physical and
/// its far end is known; with `check_virtual_dst` ports leading to hosts or
/// virtual ports are excluded as well.
fn is_port_valid(info: &PortInfo, port: PortNo, check_virtual_dst: bool) -> bool {
    if port < 0 {
        return false;
    }
    let dest = match &info.dest {
        Some(dest) => dest,
        None => return false,
    };
    if check_virtual_dst && dest.1 < 0 {
        return false;
    }
    true
}

/// Prune a scratch topology of the congested link and of every link that
/// cannot absorb the candidate's traffic without crossing the threshold
/// (or, with `paccept`, without loss). Links already on the candidate path
/// carry the traffic anyway and are kept. The per-link threshold comes from
/// the callback so the root can apply each domain's own setting.
pub fn cspf_prune(
    g: &mut Topology,
    con_link: (Dpid, PortNo),
    c_path: &[Link],
    c_bps: f64,
    thresh: &dyn Fn(&NodeId, PortNo) -> f64,
    poll_rate: f64,
    paccept: bool,
) {
    let con_node = NodeId::Switch(con_link.0);
    let con_dest = g.get_port_info(&con_node, con_link.1).and_then(|p| p.dest.clone());
    match con_dest {
        Some((dest, dest_port)) => {
            if !g.remove_port(&con_node, &dest, con_link.1, dest_port) {
                error!("\tCan't prune topo of con port {} {}", con_link.0, con_link.1);
            }
        }
        None => error!("\tCan't prune topo of con port {} {}", con_link.0, con_link.1),
    }

    for (node, port) in g.port_keys() {
        let info = match g.get_port_info(&node, port) {
            Some(info) => info.clone(),
            None => continue,
        };
        if !is_port_valid(&info, port, true) {
            continue;
        }

        let te_thresh = thresh(&node, port);
        let conv = 8.0 / poll_rate;
        let mut total_bps = poll_tx_bytes(&info) as f64 * conv;
        let max_link_traffic = if paccept {
            info.speed as f64
        } else {
            info.speed as f64 * te_thresh
        };

        if path_avoids_link(c_path, &(node.clone(), port)) {
            total_bps += c_bps;
        }

        if total_bps > max_link_traffic {
            info!("\tCan't use sw {} pn {}, pruning!", node, port);
            let (dest, dest_port) = info.dest.clone().expect("validated above");
            if !g.remove_port(&node, &dest, port, dest_port) {
                error!("\tCan't prune topo of link sw {} pn {}", node, port);
            }
        }
    }
}

/// Move `tx_bytes` of modelled traffic from `old_path` to `new_path` in the
/// topology's poll counters: links the paths share are untouched, links
/// only in the old path shed the bytes (clamped at zero), links only in the
/// new path gain them. Virtual ports are ignored.
pub fn update_link_traffic(g: &mut Topology, old_path: &[Link], new_path: &[Link], tx_bytes: u64) {
    info!("Update traffic ({:?}) -> ({:?})", old_path, new_path);

    for (node, port) in old_path {
        if new_path.contains(&(node.clone(), *port)) || *port < 0 {
            continue;
        }
        match g.get_port_info(node, *port) {
            Some(info) if is_port_valid(info, *port, false) => {}
            _ => continue,
        }
        g.sub_poll_tx_bytes(node, *port, tx_bytes);
    }

    for (node, port) in new_path {
        if old_path.contains(&(node.clone(), *port)) || *port < 0 {
            continue;
        }
        match g.get_port_info(node, *port) {
            Some(info) if is_port_valid(info, *port, false) => {}
            _ => continue,
        }
        g.add_poll_tx_bytes(node, *port, tx_bytes);
    }
}

/// The minimum spare capacity over every link newly occupied by a solution
/// set, on a topology that already carries the retargeted traffic. Returns
/// `(spare up to the threshold, spare up to the full speed)`; a negative
/// first component means the set pushes some link over the threshold.
pub fn find_solset_min_spare_capacity(
    g: &Topology,
    moves: &[(Vec<Link>, Vec<Link>)],
    thresh: &dyn Fn(&NodeId, PortNo) -> f64,
    poll_rate: f64,
) -> Option<(f64, f64)> {
    let mut min_spare: Option<(f64, f64)> = None;

    for (old_path, new_path) in moves {
        for (node, port) in new_path {
            if old_path.contains(&(node.clone(), *port)) {
                continue;
            }
            let info = match g.get_port_info(node, *port) {
                Some(info) if is_port_valid(info, *port, false) => info,
                _ => continue,
            };

            let te_thresh = thresh(node, *port);
            let conv = 8.0 / poll_rate;
            let total_bps = poll_tx_bytes(info) as f64 * conv;
            let max_link_traffic = info.speed as f64 * te_thresh;

            let spare_of_max_traff = max_link_traffic - total_bps;
            let spare_of_cap = info.speed as f64 - total_bps;

            match min_spare {
                Some((current, _)) if spare_of_max_traff >= current => {}
                _ => min_spare = Some((spare_of_max_traff, spare_of_cap)),
            }
        }
    }
    min_spare
}

impl TeOptimizer {
    /// The `CSPFRecomp` policy: prune the scratch graph, replan the whole
    /// candidate (primary, secondary and splices), and return the refreshed
    /// plan plus the path its group tables would forward on.
    ///
    /// Inter-domain candidates get one indirection node per possible egress
    /// so the shortest-path run cannot collapse distinct egress options, and
    /// inherit ingress, in-port and detection ports from the installed plan
    /// (a CSPF recomputation can never move the ingress).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_potential_cspf<S: SwitchCtl>(
        &self,
        ctrl: &ProtectionController<S>,
        g: &Topology,
        con_link: &(Dpid, PortNo),
        candidate: &PairKey,
        c_path: &[TraceHop],
        c_info: &PathInfo,
        c_usage: f64,
    ) -> Option<(Plan, Vec<TraceHop>)> {
        info!("CSPFRecomp | {}", self.cfg.pot_path_sort_rev);

        let pt_from = if ctrl.hosts().contains(&candidate.0) {
            NodeId::Host(candidate.0.clone())
        } else {
            NodeId::Switch(c_info.ingress.as_ref()?.dpid())
        };

        let mut g_tmp = g.clone();
        let pt_to = if ctrl.hosts().contains(&candidate.1) {
            NodeId::Host(candidate.1.clone())
        } else {
            let idp = ctrl.inter_dom_paths.get(candidate)?;
            let target = NodeId::Virtual("TARGET".to_string());
            for (index, instruction) in idp.iter().enumerate() {
                let (out_sw, out_port) = instruction.output.link()?;
                let indirect = NodeId::Virtual(format!("*INDIRECT_{}", index + 1));
                g_tmp.redirect_port_dest(&NodeId::Switch(out_sw), out_port, indirect.clone());
                g_tmp.add_link(&indirect, &target, -1, -1).ok()?;
                info!("Add indirect node {} to ({},{})", indirect, out_sw, out_port);
            }
            target
        };

        // the backup may reuse congested elements: price it on an unpruned
        // copy to keep protection coverage wide
        let mut g_tmp_sec = g_tmp.clone();

        let thresh = self.cfg.utilisation_threshold;
        cspf_prune(
            &mut g_tmp,
            *con_link,
            &links_of_trace(c_path),
            c_usage,
            &|_, _| thresh,
            ctrl.poll_rate(),
            self.cfg.partial_accept,
        );

        let mut plan = build_plan(
            &mut g_tmp,
            Some(&mut g_tmp_sec),
            &pt_from,
            &pt_to,
            None,
            None,
            c_info.gid,
            ctrl.hosts().contains(&candidate.0),
            matches!(&pt_to, NodeId::Host(_)),
            ctrl.loose_splice(),
        )?;
        info!("\tPath {:?} is okay", plan.primary);

        if plan.info.ingress.is_none() {
            plan.info.ingress = c_info.ingress.clone();
            plan.info.in_port = c_info.in_port;
        }
        if plan.info.egress.is_none() {
            let hops = g_tmp.flows_for_path(&plan.primary).ok()?;
            if hops.len() < 2 {
                return None;
            }
            let penultimate = &hops[hops.len() - 2];
            let dpid = penultimate.node.switch()?;
            plan.info.egress = Some(Endpoint::Boundary(dpid, penultimate.out_port));
            plan.info.out_port = Some(penultimate.out_port);
        }
        plan.info.ingress_change_detect = c_info.ingress_change_detect.clone();

        let ingress = plan.info.ingress.clone()?;
        let prim_path =
            match group_table_to_path(&plan.info, g, &ingress, None, None, candidate) {
                Ok(path) => path,
                Err(e) => {
                    info!("\tCan't walk recomputed plan: {}", e);
                    return None;
                }
            };

        info!("\tNew Path: {:?}", prim_path);
        Some((plan, prim_path))
    }
}
