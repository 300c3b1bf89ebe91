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

//! The group-port-swap search shared by the `FirstSol`, `BestSolUsage` and
//! `BestSolPLen` policies: at every hop of the candidate's path that owns a
//! fast-failover group, each alternate port is tried as the new active port
//! and the rerouted path is priced.

use super::cspf::{links_of_trace, path_avoids_link, poll_tx_bytes, Link};
use super::{OptiMethod, TeOptimizer};
use crate::controller::ProtectionController;
use crate::path_info::{PairKey, PathInfo};
use crate::protect::{group_table_to_path, TraceHop};
use crate::switch::SwitchCtl;
use crate::topo::{Dpid, NodeId, PortNo, Topology};
use log::*;

struct Solution {
    node: (Dpid, PortNo),
    path: Vec<TraceHop>,
    len: usize,
    spare: (f64, f64),
}

impl TeOptimizer {
    /// Try every group alternate along the candidate path. `FirstSol`
    /// returns the first admissible swap; the two best-solution policies
    /// collect every admissible swap (partial ones too, when allowed) and
    /// pick the best by their metric.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_potential_group_swap<S: SwitchCtl>(
        &self,
        g: &Topology,
        ctrl: &ProtectionController<S>,
        con_link: &(Dpid, PortNo),
        candidate: &PairKey,
        c_path: &[TraceHop],
        c_info: &PathInfo,
        c_usage: f64,
    ) -> Option<((Dpid, PortNo), Vec<TraceHop>)> {
        info!(
            "{:?} | {} | {} | {}",
            self.cfg.opti_method,
            self.cfg.candidate_sort_rev,
            self.cfg.pot_path_sort_rev,
            self.cfg.partial_accept
        );
        let c_ing = c_info.ingress.as_ref()?;
        let con_node = NodeId::Switch(con_link.0);
        let mut solution_set: Vec<Solution> = Vec::new();

        for (i, hop) in c_path.iter().enumerate() {
            // beyond the congested link a swap cannot help any more
            if i > 0 && c_path[i - 1].from == con_node {
                info!("\tPassed congested link in candidate path, stopping check!");
                break;
            }

            let node = &hop.from;
            let group = match c_info.groups.get(node) {
                Some(group) => group,
                None => continue,
            };
            // drop ports whose link has disappeared
            let gp: Vec<PortNo> = group
                .iter()
                .filter(|p| g.get_port_info(node, **p).is_some())
                .copied()
                .collect();
            if gp.len() <= 1 {
                continue;
            }
            let node_dpid = match node.switch() {
                Some(dpid) => dpid,
                None => continue,
            };

            for alt_port in &gp[1..] {
                let pot_path = match group_table_to_path(
                    c_info,
                    g,
                    c_ing,
                    Some(c_path),
                    Some((node, gp[0], *alt_port)),
                    candidate,
                ) {
                    Ok(path) => path,
                    Err(_) => {
                        info!("\tCan't swap group at ({}, {}), invalid path", node, alt_port);
                        continue;
                    }
                };

                if !path_avoids_link(&links_of_trace(&pot_path), &(con_node.clone(), con_link.1)) {
                    info!("\tSwapping group at ({}, {}) doesn't avoid link", node, alt_port);
                    continue;
                }
                info!("\tSwapping group at ({}, {}) avoids link", node, alt_port);

                let min_spare = self.swap_utilisation(g, c_path, &pot_path, c_usage, ctrl.poll_rate());
                let spare = min_spare.unwrap_or((f64::MAX, f64::MAX));

                if spare.0 < 0.0 {
                    info!("\tSwap group at ({}, {}) causes new congestion", node, alt_port);
                    // over threshold but lossless counts as a partial
                    if !(self.cfg.partial_accept && spare.1 >= 0.0) {
                        continue;
                    }
                    if self.cfg.opti_method == OptiMethod::FirstSol {
                        error!("\tERROR: FirstSol should not allow partials!");
                        continue;
                    }
                    info!("\tSwap group is a partial solution");
                } else {
                    info!("\tSwapping group at ({}, {}) ok", node, alt_port);
                    if self.cfg.opti_method == OptiMethod::FirstSol {
                        info!("\tFirstSol, return the first result!");
                        return Some(((node_dpid, *alt_port), pot_path));
                    }
                }

                let len = pot_path.len();
                solution_set.push(Solution { node: (node_dpid, *alt_port), path: pot_path, len, spare });
            }
        }

        if solution_set.is_empty() {
            return None;
        }

        // the sort direction is inverted: the default (not reversed) prefers
        // the largest spare capacity, i.e. the least-loaded reroute
        match self.cfg.opti_method {
            OptiMethod::BestSolUsage => {
                solution_set.sort_by(|a, b| {
                    let ord = a.spare.0.partial_cmp(&b.spare.0).unwrap_or(std::cmp::Ordering::Equal);
                    if self.cfg.pot_path_sort_rev {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
            }
            OptiMethod::BestSolPLen => {
                solution_set.sort_by(|a, b| {
                    let ord = a.spare.0.partial_cmp(&b.spare.0).unwrap_or(std::cmp::Ordering::Equal);
                    if self.cfg.pot_path_sort_rev {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                // stable: spare capacity survives as the tie break
                solution_set.sort_by_key(|s| s.len);
            }
            _ => {
                error!("ERROR: FirstSol should not have an entry in solution set!");
                return None;
            }
        }

        let best = solution_set.remove(0);
        Some((best.node, best.path))
    }

    /// The minimum spare capacity (up to the TE threshold, and up to the
    /// full link speed) over the links the candidate would newly occupy if
    /// `tx_bps` moved from `old_path` to `new_path`. `None` when the new
    /// path introduces no priceable link.
    pub(crate) fn swap_utilisation(
        &self,
        g: &Topology,
        old_path: &[TraceHop],
        new_path: &[TraceHop],
        tx_bps: f64,
        poll_rate: f64,
    ) -> Option<(f64, f64)> {
        let old_links: Vec<Link> = links_of_trace(old_path);
        let mut min_spare: Option<(f64, f64)> = None;

        for hop in new_path {
            let info = match g.get_port_info(&hop.from, hop.out_port) {
                Some(info) if info.poll.is_some() => info,
                _ => {
                    info!("Port {} sw {} doesn't have required fields", hop.out_port, hop.from);
                    continue;
                }
            };

            // links shared with the old path see no traffic change
            if old_links.contains(&hop.link()) {
                continue;
            }

            let speed = info.speed as f64;
            let conv = 8.0 / poll_rate;
            let total_bps = poll_tx_bytes(info) as f64 * conv + tx_bps;
            let max_link_traffic = speed * self.cfg.utilisation_threshold;

            let spare_of_max_traff = max_link_traffic - total_bps;
            let spare_of_cap = speed - total_bps;

            match min_spare {
                Some((current, _)) if spare_of_max_traff >= current => {}
                _ => min_spare = Some((spare_of_max_traff, spare_of_cap)),
            }
        }
        min_spare
    }
}
