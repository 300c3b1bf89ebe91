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

//! # Traffic-engineering optimizer
//!
//! Detects over-utilised links from the per-poll port telemetry and
//! resolves congestion by moving host pairs (candidates) off the congested
//! port, under one of four pluggable policies:
//!
//! - **`FirstSol`**: walk the candidate's path, try every fast-failover
//!   alternate, accept the first one that avoids the congested port without
//!   pushing another link over threshold.
//! - **`BestSolUsage`**: enumerate every alternate and pick the one
//!   maximising (or, reversed, minimising) the minimum spare capacity along
//!   the rerouted path.
//! - **`BestSolPLen`**: enumerate every alternate, shortest rerouted path
//!   wins, spare capacity breaks ties.
//! - **`CspfRecomp`**: prune the congested and insufficiently spare links
//!   from a scratch graph and recompute the candidate's whole plan.
//!
//! The first three apply their fix by inverting group ports; the last
//! reinstalls the recomputed plan through the normal diff engine.
//! Congestion on inter-domain links that cannot be resolved locally is
//! escalated to the root controller and suppressed for two polls.

mod cspf;
mod group_swap;

pub use cspf::{
    cspf_prune, find_solset_min_spare_capacity, links_of_hops, links_of_trace, path_avoids_link,
    update_link_traffic, Link,
};

use crate::controller::ProtectionController;
use crate::path_info::{Endpoint, PairKey};
use crate::proto::LcToRoot;
use crate::protect::{group_table_to_path, Plan, TraceHop};
use crate::switch::SwitchCtl;
use crate::topo::{Dpid, NodeId, PortNo, Topology, HOST_PORT};
use log::*;
use std::collections::BTreeMap;
use std::str::FromStr;

/// The congestion resolution policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptiMethod {
    /// First admissible group swap wins
    FirstSol,
    /// Group swap maximising spare capacity
    BestSolUsage,
    /// Group swap with the shortest rerouted path
    BestSolPLen,
    /// Constrained-shortest-path-first replan
    CspfRecomp,
}

impl FromStr for OptiMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FirstSol" => Ok(Self::FirstSol),
            "BestSolUsage" => Ok(Self::BestSolUsage),
            "BestSolPLen" => Ok(Self::BestSolPLen),
            "CSPFRecomp" => Ok(Self::CspfRecomp),
            other => Err(format!("unknown TE optimisation method {}", other)),
        }
    }
}

/// Configuration of the optimizer
#[derive(Debug, Clone)]
pub struct TeConfig {
    /// A port is congested above this fraction of its speed
    pub utilisation_threshold: f64,
    /// Seconds to consolidate congested ports before optimising
    pub consolidate_time: f64,
    /// Resolution policy
    pub opti_method: OptiMethod,
    /// Consider heavy-hitter candidates first (descending by usage)
    pub candidate_sort_rev: bool,
    /// Reverse the potential-path metric sort
    pub pot_path_sort_rev: bool,
    /// Accept sets that leave the port over threshold but lossless
    pub partial_accept: bool,
}

impl Default for TeConfig {
    fn default() -> Self {
        Self {
            utilisation_threshold: 0.90,
            consolidate_time: 1.0,
            opti_method: OptiMethod::FirstSol,
            candidate_sort_rev: true,
            pot_path_sort_rev: false,
            partial_accept: false,
        }
    }
}

/// A nominated path change for one candidate.
#[derive(Debug, Clone)]
pub(crate) enum PathMod {
    /// Promote this `(switch, port)` to the active position of its group
    SwapGroup((Dpid, PortNo)),
    /// Reinstall this recomputed plan
    Reinstall(Box<Plan>),
}

pub(crate) struct Fix {
    pub(crate) candidate: PairKey,
    pub(crate) old_path: Vec<TraceHop>,
    pub(crate) new_path: Vec<TraceHop>,
    pub(crate) change: PathMod,
    pub(crate) tx_bytes: u64,
}

struct ConLinkData {
    traffic_bps: f64,
    capacity: f64,
    max_traffic: f64,
    start_traffic: f64,
    paths: Vec<(PairKey, f64)>,
}

/// The TE optimisation engine of one controller.
#[derive(Debug)]
pub struct TeOptimizer {
    pub(crate) cfg: TeConfig,
    over_utilised: BTreeMap<(Dpid, PortNo), f64>,
    inter_domain_over_util: BTreeMap<(Dpid, PortNo), u32>,
    in_progress: bool,
}

impl TeOptimizer {
    /// Create an optimizer. `FirstSol` cannot honour partial acceptance;
    /// the flag is forced off with a warning, as documented.
    pub fn new(mut cfg: TeConfig) -> Self {
        if cfg.opti_method == OptiMethod::FirstSol && cfg.partial_accept {
            warn!("FirstSol TE optimisation method does not support partial accepts!");
            cfg.partial_accept = false;
        }
        Self {
            cfg,
            over_utilised: BTreeMap::new(),
            inter_domain_over_util: BTreeMap::new(),
            in_progress: false,
        }
    }

    /// The configured consolidation window in seconds.
    pub fn consolidate_time(&self) -> f64 {
        self.cfg.consolidate_time
    }

    /// Whether partial solutions are accepted.
    pub fn cfg_partial_accept(&self) -> bool {
        self.cfg.partial_accept
    }

    /// Check one port's transmit rate against the threshold. Newly
    /// congested ports join the consolidation set; the caller (re)arms the
    /// consolidation timer whenever this returns true.
    pub fn check_link_congested(&mut self, dpid: Dpid, port: PortNo, tx_rate: f64) -> bool {
        if self.in_progress {
            return false;
        }
        if tx_rate > self.cfg.utilisation_threshold {
            let key = (dpid, port);
            if !self.over_utilised.contains_key(&key) {
                self.over_utilised.insert(key, tx_rate);
                return true;
            }
        }
        false
    }

    /// Consume one poll tick of an escalated port's suppression counter.
    /// Returns true while the congestion check must stay suppressed.
    pub fn suppression_tick(&mut self, dpid: Dpid, port: PortNo) -> bool {
        let key = (dpid, port);
        let value = match self.inter_domain_over_util.get(&key) {
            Some(value) => *value,
            None => return false,
        };
        info!("Inter-domain link opti request still outstanding (count {})", value);
        if value == 0 {
            self.inter_domain_over_util.remove(&key);
            return false;
        }
        self.inter_domain_over_util.insert(key, value - 1);
        true
    }

    /// The root finished a congestion escalation: resume normal checking.
    pub fn clear_suppression(&mut self, dpid: Dpid, port: PortNo) {
        self.inter_domain_over_util.remove(&(dpid, port));
    }

    /// Run the optimisation pass over every consolidated congested port.
    /// Called by the runtime when the consolidation timer expires.
    pub fn optimise<S: SwitchCtl>(&mut self, ctrl: &mut ProtectionController<S>) {
        self.in_progress = true;

        let poll_rate = ctrl.poll_rate();
        let conv = 8.0 / poll_rate;

        // collect the congested ports; egress ports towards hosts are never
        // optimisation targets and stay listed so they are not re-added
        let mut over_util: BTreeMap<(Dpid, PortNo), ConLinkData> = BTreeMap::new();
        for key in self.over_utilised.keys().cloned().collect::<Vec<_>>() {
            let info = match ctrl.graph().get_port_info(&NodeId::Switch(key.0), key.1) {
                Some(info) => info,
                None => continue,
            };
            if matches!(&info.dest, Some((_, HOST_PORT))) {
                continue;
            }
            over_util.insert(
                key,
                ConLinkData {
                    traffic_bps: 0.0,
                    capacity: info.speed as f64,
                    max_traffic: info.speed as f64 * self.cfg.utilisation_threshold,
                    start_traffic: 0.0,
                    paths: Vec::new(),
                },
            );
        }

        // attribute candidate traffic to the congested ports by walking the
        // installed group tables
        for (key, data) in ctrl.paths().iter() {
            let bytes = match &data.stats {
                Some(stats) if stats.bytes > 0 => stats.bytes,
                _ => continue,
            };
            let ingress = match &data.ingress {
                Some(ingress) => ingress,
                None => continue,
            };
            let path = match group_table_to_path(data, ctrl.graph(), ingress, None, None, key) {
                Ok(path) => path,
                Err(e) => {
                    error!("Can't reconstruct path {}-{}: {}", key.0, key.1, e);
                    continue;
                }
            };
            for hop in &path {
                let dpid = match hop.from.switch() {
                    Some(dpid) => dpid,
                    None => continue,
                };
                if let Some(entry) = over_util.get_mut(&(dpid, hop.out_port)) {
                    let path_bps = bytes as f64 * conv;
                    entry.traffic_bps += path_bps;
                    entry.paths.push((key.clone(), path_bps));
                }
            }
        }

        info!(
            "Over-utilised: {:?}",
            over_util.iter().map(|(k, v)| (*k, v.traffic_bps)).collect::<Vec<_>>()
        );

        for (con_link, mut data) in over_util {
            info!("Trying to fix congestion on SW {} port {}", con_link.0, con_link.1);
            let mut con_fix: Vec<Fix> = Vec::new();
            let mut found_valid_partial = false;
            let mut invalid_solution_set = false;
            let mut g = ctrl.graph().clone();
            let is_inter_domain_link = ctrl.is_inter_domain_link(con_link.0, con_link.1);

            // a previous modification may already have shifted candidates
            // off this port
            self.check_already_avoids_link(&g, ctrl, &con_link, &mut data);

            // drop the port from the global list even when unresolved, so
            // the next poll interval re-evaluates it
            self.over_utilised.remove(&con_link);

            data.paths.sort_by(|a, b| {
                let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
                let ord = if self.cfg.candidate_sort_rev { ord.reverse() } else { ord };
                ord.then_with(|| a.0.cmp(&b.0))
            });
            info!("\tCandidates: {:?}", data.paths);

            if data.paths.is_empty() {
                info!(
                    "\tCan't fix congestion on SW {} Port {}, no candidates found!",
                    con_link.0, con_link.1
                );
                continue;
            }

            data.start_traffic = data.traffic_bps;

            for (candidate, candidate_usage) in data.paths.clone() {
                if data.traffic_bps <= data.max_traffic {
                    break;
                }

                let candidate_info = match ctrl.paths().get(&candidate) {
                    Some(info) => info.clone(),
                    None => continue,
                };
                let candidate_tx_bytes = candidate_info.stats.as_ref().map(|s| s.bytes).unwrap_or(0);
                let ingress = match &candidate_info.ingress {
                    Some(ingress) => ingress.clone(),
                    None => continue,
                };
                let candidate_path = match group_table_to_path(
                    &candidate_info,
                    &g,
                    &ingress,
                    None,
                    None,
                    &candidate,
                ) {
                    Ok(path) => path,
                    Err(e) => {
                        error!("\tCan't reconstruct candidate path: {}", e);
                        continue;
                    }
                };
                info!("\tCandidate {} - {}", candidate.0, candidate.1);
                info!("\tCurrent Path: {:?}", candidate_path);

                let candidate_mod = self.find_potential_path(
                    &g,
                    ctrl,
                    &con_link,
                    &candidate,
                    &candidate_path,
                    &candidate_info,
                    candidate_usage,
                );

                let (change, new_path) = match candidate_mod {
                    Some(found) => found,
                    None => {
                        info!(
                            "\tCan't use candidate ({}-{}) to reduce usage",
                            candidate.0, candidate.1
                        );
                        continue;
                    }
                };

                data.traffic_bps -= candidate_usage;
                update_link_traffic(
                    &mut g,
                    &links_of_trace(&candidate_path),
                    &links_of_trace(&new_path),
                    candidate_tx_bytes,
                );
                con_fix.push(Fix {
                    candidate,
                    old_path: candidate_path,
                    new_path,
                    change,
                    tx_bytes: candidate_tx_bytes,
                });
            }

            // -------- check the solution set and apply if ok --------

            let con_spare_of_cap = data.capacity - data.start_traffic;
            if !con_fix.is_empty() && self.cfg.partial_accept {
                let moves: Vec<(Vec<Link>, Vec<Link>)> = con_fix
                    .iter()
                    .map(|f| (links_of_trace(&f.old_path), links_of_trace(&f.new_path)))
                    .collect();
                let thresh = self.cfg.utilisation_threshold;
                let min_spare =
                    find_solset_min_spare_capacity(&g, &moves, &|_, _| thresh, poll_rate);
                info!("CON PORT INIT SPARE: {} | NEW SPARE: {:?}", con_spare_of_cap, min_spare);

                if let Some((spare_thresh, spare_cap)) = min_spare {
                    // never trade one congestion for a worse one
                    if spare_thresh < 0.0 && spare_cap <= con_spare_of_cap {
                        info!("Solset introduces more congestion. Invalidating solution set!");
                        invalid_solution_set = true;
                    }
                }
                if !invalid_solution_set
                    && data.traffic_bps > data.max_traffic
                    && data.traffic_bps <= data.capacity
                {
                    info!("\tValid partial solution!");
                    found_valid_partial = true;
                }
            }

            if !con_fix.is_empty()
                && !invalid_solution_set
                && (data.traffic_bps <= data.max_traffic || found_valid_partial)
            {
                info!("\tFound congestion fix for sw {} pn {}", con_link.0, con_link.1);
                for fix in con_fix {
                    self.apply_fix(ctrl, fix);
                }
            } else {
                info!("\tCan't fix congestion on SW {} PN {}", con_link.0, con_link.1);
                if is_inter_domain_link {
                    info!("\tThis is an inter-domain link!");
                    let te_thresh = self.cfg.utilisation_threshold;
                    let msg = LcToRoot::Congestion {
                        cid: ctrl.cid(),
                        sw: con_link.0,
                        port: con_link.1,
                        traff_bps: data.start_traffic,
                        te_thresh,
                        paths: data.paths.clone(),
                    };
                    ctrl.outbox.push(msg);
                    self.inter_domain_over_util.insert(con_link, 2);
                }
            }
        }

        self.in_progress = false;
    }

    fn find_potential_path<S: SwitchCtl>(
        &self,
        g: &Topology,
        ctrl: &ProtectionController<S>,
        con_link: &(Dpid, PortNo),
        candidate: &PairKey,
        candidate_path: &[TraceHop],
        candidate_info: &crate::path_info::PathInfo,
        candidate_usage: f64,
    ) -> Option<(PathMod, Vec<TraceHop>)> {
        match self.cfg.opti_method {
            OptiMethod::CspfRecomp => self
                .find_potential_cspf(ctrl, g, con_link, candidate, candidate_path, candidate_info, candidate_usage)
                .map(|(plan, path)| (PathMod::Reinstall(Box::new(plan)), path)),
            _ => self
                .find_potential_group_swap(g, ctrl, con_link, candidate, candidate_path, candidate_info, candidate_usage)
                .map(|(node, path)| (PathMod::SwapGroup(node), path)),
        }
    }

    /// Apply one accepted modification: either invert the nominated group
    /// port, or reinstall the recomputed plan. Inter-domain candidates
    /// additionally propagate their egress change to the root.
    fn apply_fix<S: SwitchCtl>(&mut self, ctrl: &mut ProtectionController<S>, fix: Fix) {
        match fix.change {
            PathMod::SwapGroup(node) => {
                let gid = match ctrl.paths().get(&fix.candidate) {
                    Some(info) => info.gid,
                    None => return,
                };
                ctrl.invert_group_ports(&fix.candidate, Some(node), gid);
                update_link_traffic(
                    ctrl.graph_mut(),
                    &links_of_trace(&fix.old_path),
                    &links_of_trace(&fix.new_path),
                    fix.tx_bytes,
                );

                if ctrl.inter_dom_paths.contains_key(&fix.candidate) {
                    let last = match fix.new_path.last() {
                        Some(last) => last.clone(),
                        None => return,
                    };
                    let new_egress = match last.from.switch() {
                        Some(dpid) => Endpoint::Boundary(dpid, last.out_port),
                        None => return,
                    };
                    if let Some(entry) = ctrl.paths_mut().get_mut(&fix.candidate) {
                        entry.egress = Some(new_egress.clone());
                    }
                    ctrl.notify_egress_change(&fix.candidate, &new_egress);
                }
            }
            PathMod::Reinstall(plan) => {
                let mut plan = *plan;
                // strip the synthetic indirection entries before install
                plan.info.groups.retain(|k, _| !k.is_virtual());
                plan.info.special_flows.retain(|k, _| !k.is_virtual());
                let mut new_path = fix.new_path.clone();
                if matches!(new_path.last(), Some(hop) if hop.to.is_virtual()) {
                    new_path.pop();
                }

                let mut gp = crate::path_info::GroupTable::new();
                let mut special = crate::path_info::SpecialFlows::new();
                if let Some(idp) = ctrl.inter_dom_paths.get(&fix.candidate).cloned() {
                    // the egress notification rewrites the instruction list,
                    // so it must precede the backup-segment recomputation
                    if !ctrl.hosts().contains(&fix.candidate.1) {
                        if let Some(egress) = plan.info.egress.clone() {
                            ctrl.notify_egress_change(&fix.candidate, &egress);
                        }
                    }
                    let mut g = ctrl.graph().clone();
                    let targets = ctrl.add_dummy_destination(&fix.candidate, &idp, &mut g);
                    let (seg_gp, seg_sf, _) =
                        ctrl.segment_secondary_paths(&fix.candidate, &idp, &targets, &g);
                    gp = seg_gp;
                    special = seg_sf;
                }

                // carry the counters and addressing over so the next port's
                // optimisation still sees this candidate
                if let Some(old) = ctrl.paths().get(&fix.candidate) {
                    plan.info.stats = old.stats.clone();
                    plan.info.address = old.address;
                    plan.info.eth = old.eth.clone();
                }
                ctrl.install_path_dict(fix.candidate.clone(), Some(plan), gp, special);
                update_link_traffic(
                    ctrl.graph_mut(),
                    &links_of_trace(&fix.old_path),
                    &links_of_trace(&new_path),
                    fix.tx_bytes,
                );
            }
        }
    }

    /// Remove candidates whose current path already avoids the congested
    /// port, reducing the modelled congestion accordingly.
    fn check_already_avoids_link<S: SwitchCtl>(
        &self,
        g: &Topology,
        ctrl: &ProtectionController<S>,
        con_link: &(Dpid, PortNo),
        data: &mut ConLinkData,
    ) {
        let link = (NodeId::Switch(con_link.0), con_link.1);
        let mut new_candidates = Vec::new();
        for (candidate, usage) in data.paths.clone() {
            let info = match ctrl.paths().get(&candidate) {
                Some(info) => info,
                None => continue,
            };
            let ingress = match &info.ingress {
                Some(ingress) => ingress,
                None => continue,
            };
            let path = match group_table_to_path(info, g, ingress, None, None, &candidate) {
                Ok(path) => path,
                Err(_) => continue,
            };
            if path_avoids_link(&links_of_trace(&path), &link) {
                info!(
                    "\tPath {}-{} already avoids congested port (sw: {}, pn: {})!",
                    candidate.0, candidate.1, con_link.0, con_link.1
                );
                data.traffic_bps -= usage;
            } else {
                new_candidates.push((candidate, usage));
            }
        }
        data.paths = new_candidates;
    }
}
