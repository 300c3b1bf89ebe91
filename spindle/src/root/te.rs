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

//! Root-side traffic engineering: the local controllers' CSPF recomputation
//! applied at domain granularity when a local controller escalates
//! congestion it cannot resolve. Accepted modifications re-emit instructions to every
//! controller whose segment changed; the displaced primary becomes the new
//! secondary, trading path quality for a backup that is already installed.

use super::RootController;
use crate::path_info::PairKey;
use crate::te::{
    cspf_prune, find_solset_min_spare_capacity, links_of_hops, update_link_traffic, Link,
};
use crate::topo::{Dpid, Hop, NodeId, PortNo};
use log::*;
use std::collections::{BTreeMap, BTreeSet};

struct RootMod {
    candidate: PairKey,
    c_path: Vec<NodeId>,
    c_ports: Vec<Hop>,
    pot_path: Vec<NodeId>,
    pot_ports: Vec<Hop>,
    tx_bytes: u64,
}

impl RootController {
    /// Resolve an escalated inter-domain congestion: for each candidate
    /// pair crossing the congested link, prune the domain graph of
    /// insufficient links and recompute a loop-free path. The solution set
    /// is validated (and possibly partially accepted) exactly like the
    /// local optimizer's.
    pub(crate) fn te_optimisation(
        &mut self,
        sw: Dpid,
        port: PortNo,
        traff_bps: f64,
        te_thresh: f64,
        paths: &[(PairKey, f64)],
    ) {
        info!("Root TE Optimisation Called");
        info!("\tCandidate Sort Rev: {}", self.cfg.te_candidate_sort_rev);
        info!("\tPartial Accept: {}", self.cfg.te_partial_accept);

        let mut g = self.graph.clone();
        let con_node = NodeId::Switch(sw);
        let con_capacity = match g.get_port_info(&con_node, port) {
            Some(info) => info.speed as f64,
            None => {
                error!("Congested port {} ({}) doesn't exist!", sw, port);
                return;
            }
        };
        let mut con_usage_bps = traff_bps;
        let con_max_traff = con_capacity * te_thresh;
        let con_spare_of_cap = con_capacity - con_usage_bps;

        // keep only candidates we computed a path for which actually uses
        // the congested port; everything else reduces the modelled load
        let mut candidates: Vec<(PairKey, f64)> = Vec::new();
        for (candidate, usage) in paths {
            let old_ports = match self.old_paths.get(candidate) {
                Some(stored) if !stored.is_empty() => &stored[0].1,
                _ => {
                    error!("Can't find candidate {}-{} path", candidate.0, candidate.1);
                    con_usage_bps -= usage;
                    continue;
                }
            };
            if !old_ports.iter().any(|hop| hop.node == con_node && hop.out_port == port) {
                error!("Candidate {}-{} doesn't use con port", candidate.0, candidate.1);
                con_usage_bps -= usage;
                continue;
            }
            candidates.push((candidate.clone(), *usage));
        }

        candidates.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if self.cfg.te_candidate_sort_rev { ord.reverse() } else { ord };
            ord.then_with(|| a.0.cmp(&b.0))
        });

        let mut mods: Vec<RootMod> = Vec::new();
        for (candidate, usage) in candidates {
            if con_usage_bps <= con_max_traff {
                info!("Port is no longer congested!");
                break;
            }

            let (c_path, c_ports) = match self.old_paths.get(&candidate) {
                Some(stored) if !stored.is_empty() => stored[0].clone(),
                _ => continue,
            };
            let tx_bytes = (usage / 8.0) as u64;
            info!("Pair {:?} | TX bps {}", candidate, usage);

            let mut g_tmp = g.clone();
            let default_thresh = te_thresh;
            cspf_prune(
                &mut g_tmp,
                (sw, port),
                &links_of_hops(&c_ports),
                usage,
                &|node, _| self.cid_te_thresh(node, default_thresh),
                1.0,
                self.cfg.te_partial_accept,
            );

            let src = NodeId::Host(candidate.0.clone());
            let dst = NodeId::Host(candidate.1.clone());
            let (pot_path, pot_ports) = self.find_path_loopfree(&g_tmp, &src, &dst);
            if pot_path.is_empty() {
                continue;
            }

            info!("Found a valid potential path for candidate {}-{}", candidate.0, candidate.1);
            con_usage_bps -= usage;
            info!("Reduces con to {} ({})", con_usage_bps, con_max_traff);

            update_link_traffic(&mut g, &links_of_hops(&c_ports), &links_of_hops(&pot_ports), tx_bytes);
            mods.push(RootMod { candidate, c_path, c_ports, pot_path, pot_ports, tx_bytes });
        }

        // -------- check the solution set and apply if ok --------

        let mut found_valid_partial = false;
        let mut invalid_solution_set = false;
        if !mods.is_empty() && self.cfg.te_partial_accept {
            let moves: Vec<(Vec<Link>, Vec<Link>)> = mods
                .iter()
                .map(|m| (links_of_hops(&m.c_ports), links_of_hops(&m.pot_ports)))
                .collect();
            let default_thresh = te_thresh;
            let min_spare = find_solset_min_spare_capacity(
                &g,
                &moves,
                &|node, _| self.cid_te_thresh(node, default_thresh),
                1.0,
            );
            info!("CON PORT INIT SPARE: {} | NEW SPARE: {:?}", con_spare_of_cap, min_spare);

            if let Some((spare_thresh, spare_cap)) = min_spare {
                if spare_thresh < 0.0 && spare_cap <= con_spare_of_cap {
                    info!("Solset introduces more congestion. Invalidating solution set!");
                    invalid_solution_set = true;
                }
            }
            if !invalid_solution_set
                && con_usage_bps > con_max_traff
                && con_usage_bps <= con_capacity
            {
                info!("\tValid partial solution!");
                found_valid_partial = true;
            }
        }

        if mods.is_empty()
            || invalid_solution_set
            || (con_usage_bps > con_max_traff && !found_valid_partial)
        {
            info!("Could not resolve con for sw {} port {}", sw, port);
            return;
        }
        info!("Found a fix for the congested sw {} port {}", sw, port);

        // the old primary becomes the secondary: it may be long, but it is
        // already installed and only carries traffic during failover
        let mut send: BTreeMap<_, BTreeMap<PairKey, Vec<_>>> = BTreeMap::new();
        let mut scope: BTreeSet<PairKey> = BTreeSet::new();
        for m in &mods {
            let fh = self.host_record_of(&m.pot_path, true);
            let sh = self.host_record_of(&m.pot_path, false);
            let (fh, sh) = match (fh, sh) {
                (Some(fh), Some(sh)) => (fh, sh),
                _ => {
                    warn!("Can't locate host records for {:?}", m.candidate);
                    continue;
                }
            };

            self.old_paths.insert(
                m.candidate.clone(),
                vec![
                    (m.pot_path.clone(), m.pot_ports.clone()),
                    (m.c_path.clone(), m.c_ports.clone()),
                ],
            );
            scope.insert(m.candidate.clone());
            self.path_to_instructions(&fh, &sh, &[m.pot_ports.clone(), m.c_ports.clone()], &mut send);
        }

        self.emit_instruction_diff(send, Some(&scope));

        // commit the retargeted traffic to the global model
        for m in &mods {
            update_link_traffic(
                &mut self.graph,
                &links_of_hops(&m.c_ports),
                &links_of_hops(&m.pot_ports),
                m.tx_bytes,
            );
        }

        self.write_controller_state();
    }

    /// Locate the host record at one end of a composed path (the node next
    /// to the end is the owning domain node).
    fn host_record_of(&self, path: &[NodeId], start: bool) -> Option<crate::proto::HostRec> {
        let (host_node, domain_node) = if start {
            (path.first()?, path.get(1)?)
        } else {
            (path.last()?, path.get(path.len().checked_sub(2)?)?)
        };
        let name = match host_node {
            NodeId::Host(name) => name,
            _ => return None,
        };
        let cid = match domain_node {
            NodeId::Domain(cid) => *cid,
            // the path may skip the domain node; fall back to ownership
            _ => self.belongs_to_cid(host_node).first().copied()?,
        };
        self.topo.get(&cid)?.hosts.iter().find(|h| h.name == *name).cloned()
    }
}
