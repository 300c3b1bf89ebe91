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

//! Inter-domain path segments, installed from root-controller instruction
//! lists. The first instruction of a list is the primary path; subsequent
//! ones are backups whose group and special-flow entries are merged into the
//! primary install so the fast-failover state covers them too.

use super::ProtectionController;
use crate::path_info::{Endpoint, GroupTable, PairKey, SpecialFlows};
use crate::proto::{Instruction, InstrAction, SegmentEnd};
use crate::protect::build_plan;
use crate::switch::SwitchCtl;
use crate::topo::{Dpid, NodeId, PortNo, Topology};
use log::*;
use std::collections::BTreeMap;

fn endpoint_of(end: &SegmentEnd) -> Option<Endpoint> {
    end.link().map(|(sw, port)| Endpoint::Boundary(sw, port))
}

impl<S: SwitchCtl> ProtectionController<S> {
    /// Process a `compute_paths` message: store or drop the instruction
    /// lists and install or withdraw each addressed segment.
    pub fn handle_compute_paths(&mut self, paths: Vec<(PairKey, Vec<Instruction>)>) {
        for (hkey, instructions) in paths {
            if instructions.is_empty() {
                continue;
            }
            if instructions[0].action == InstrAction::Delete {
                self.inter_dom_paths.remove(&hkey);
            } else {
                self.inter_dom_paths.insert(hkey.clone(), instructions.clone());
            }
            self.apply_instructions(&hkey, &instructions);
        }
    }

    /// Inject one dummy destination per instruction so path computation is
    /// forced through the instruction's egress port. Instructions sharing an
    /// egress link share their dummy node. On the destination segment the
    /// target is the destination host itself.
    pub(crate) fn add_dummy_destination(
        &self,
        hkey: &PairKey,
        info: &[Instruction],
        graph: &mut Topology,
    ) -> Vec<NodeId> {
        let (host_1, host_2) = hkey;
        let mut targets = Vec::new();

        if self.hosts.contains(host_2) && !self.hosts.contains(host_1) {
            for _ in info {
                targets.push(NodeId::Host(host_2.clone()));
            }
            return targets;
        }

        let mut rewrote: BTreeMap<(Dpid, PortNo), NodeId> = BTreeMap::new();
        for (i, instruction) in info.iter().enumerate() {
            let (out_sw, out_port) = match instruction.output.link() {
                Some(link) => link,
                None => {
                    error!("Instruction for {:?} is missing its egress tuple", hkey);
                    targets.push(NodeId::Virtual(format!("TARGET{}", i)));
                    continue;
                }
            };
            if let Some(existing) = rewrote.get(&(out_sw, out_port)) {
                targets.push(existing.clone());
                continue;
            }
            let fake = NodeId::Virtual(format!("TARGET{}", i));
            rewrote.insert((out_sw, out_port), fake.clone());
            graph.redirect_port_dest(&NodeId::Switch(out_sw), out_port, fake.clone());
            targets.push(fake);
        }
        targets
    }

    /// Compute the group-table and special-flow contributions of the backup
    /// instructions of a segment, together with the ports that need an
    /// ingress-change detection rule.
    pub(crate) fn segment_secondary_paths(
        &mut self,
        hkey: &PairKey,
        info: &[Instruction],
        targets: &[NodeId],
        graph: &Topology,
    ) -> (GroupTable, SpecialFlows, Vec<(Dpid, PortNo)>) {
        let mut gp = GroupTable::new();
        let mut special = SpecialFlows::new();
        let mut ingress_change_ports: Vec<(Dpid, PortNo)> = Vec::new();

        if info[0].action == InstrAction::Delete {
            return (gp, special, ingress_change_ports);
        }

        let h1_local = self.hosts.contains(&hkey.0);
        let h2_local = self.hosts.contains(&hkey.1);
        let gid = self.get_gid(hkey);

        for i in 1..info.len() {
            let (src, target, src_is_host, dest_is_host) = if h1_local {
                (NodeId::Host(hkey.0.clone()), targets[i].clone(), true, false)
            } else if h2_local {
                let (in_sw, _) = match info[i].input.link() {
                    Some(link) => link,
                    None => {
                        error!("Backup instruction for {:?} lacks an ingress tuple", hkey);
                        continue;
                    }
                };
                (NodeId::Switch(in_sw), NodeId::Host(hkey.1.clone()), false, true)
            } else {
                if info[0].input.link().is_none() || info[0].output.link().is_none() {
                    error!("Intermediate path doesn't contain tuple in and/or out values!");
                    continue;
                }
                let (in_sw, _) = match info[i].input.link() {
                    Some(link) => link,
                    None => {
                        error!("Backup instruction for {:?} lacks an ingress tuple", hkey);
                        continue;
                    }
                };
                (NodeId::Switch(in_sw), targets[i].clone(), false, false)
            };

            let mut g = graph.clone();
            if let Some(plan) = build_plan(
                &mut g,
                None,
                &src,
                &target,
                None,
                None,
                gid,
                src_is_host,
                dest_is_host,
                self.cfg.loose_splice,
            ) {
                super::paths::combine_table(&mut gp, &plan.info.groups);
                super::paths::combine_table(&mut special, &plan.info.special_flows);
            }

            // ports differing from the primary ingress detect migrations
            if !h1_local {
                if let Some(link) = info[i].input.link() {
                    if info[i].input != info[0].input && !ingress_change_ports.contains(&link) {
                        ingress_change_ports.push(link);
                    }
                }
            }
        }

        (gp, special, ingress_change_ports)
    }

    /// Compute and install one inter-domain path segment from a root
    /// instruction list. A leading delete withdraws the segment along with
    /// its ingress-change detectors.
    pub fn apply_instructions(&mut self, hkey: &PairKey, info: &[Instruction]) {
        if !self.is_master() {
            info!("Controller is not a master, do not compute anything");
            return;
        }
        if info.is_empty() {
            return;
        }

        let host_1 = hkey.0.clone();
        let host_2 = hkey.1.clone();
        let mut graph = self.graph.clone();
        let pinfo = self.paths.get(hkey).cloned();

        if info[0].action == InstrAction::Delete {
            if let Some(pinfo) = &pinfo {
                for (dpid, port) in pinfo.ingress_change_detect.clone() {
                    self.delete_ingress_change_detect(port, pinfo.gid, dpid);
                }
            }
            self.uninstall_pair(hkey);
            return;
        }

        let targets = self.add_dummy_destination(hkey, info, &mut graph);
        let (gp, special, ingress_change_ports) =
            self.segment_secondary_paths(hkey, info, &targets, &graph);

        let h1_local = self.hosts.contains(&host_1);
        let h2_local = self.hosts.contains(&host_2);

        if h1_local {
            // start segment: from the source host to the instructed egress
            let target = targets[0].clone();
            self.compute_and_install(
                &mut graph.clone(),
                &NodeId::Host(host_1),
                &target,
                info[0].out_addr,
                None,
                endpoint_of(&info[0].input),
                endpoint_of(&info[0].output),
                hkey.clone(),
                gp,
                special,
            );
        } else if h2_local {
            // end segment: from the instructed ingress to the destination
            let (in_sw, _) = match info[0].input.link() {
                Some(link) => link,
                None => {
                    error!("End segment for {:?} lacks an ingress tuple", hkey);
                    return;
                }
            };
            self.compute_and_install(
                &mut graph.clone(),
                &NodeId::Switch(in_sw),
                &NodeId::Host(host_2),
                None,
                info[0].out_eth.clone(),
                endpoint_of(&info[0].input),
                endpoint_of(&info[0].output),
                hkey.clone(),
                gp,
                special,
            );
        } else {
            // transit segment: boundary to boundary
            if info[0].input.link().is_none() || info[0].output.link().is_none() {
                error!("Intermediate path doesn't contain tuple in and/or out values!");
                return;
            }
            let (in_sw, _) = info[0].input.link().expect("checked above");
            let target = targets[0].clone();
            self.compute_and_install(
                &mut graph.clone(),
                &NodeId::Switch(in_sw),
                &target,
                None,
                None,
                endpoint_of(&info[0].input),
                endpoint_of(&info[0].output),
                hkey.clone(),
                gp,
                special,
            );
        }

        // detector management: drop everything when the path has no
        // alternates, otherwise migrate the rule set to the new port list
        if info.len() == 1 {
            if let Some(pinfo) = &pinfo {
                if !pinfo.ingress_change_detect.is_empty() {
                    info!(
                        "Path {}-{} has no alternative, rem old ingress change rules",
                        hkey.0, hkey.1
                    );
                    for (dpid, port) in pinfo.ingress_change_detect.clone() {
                        self.delete_ingress_change_detect(port, pinfo.gid, dpid);
                    }
                }
            }
            if let Some(entry) = self.paths.get_mut(hkey) {
                entry.ingress_change_detect.clear();
            }
        } else {
            if let Some(pinfo) = &pinfo {
                for entry in pinfo.ingress_change_detect.clone() {
                    if !ingress_change_ports.contains(&entry) {
                        self.delete_ingress_change_detect(entry.1, pinfo.gid, entry.0);
                    }
                }
            }
            if self.paths.contains_key(hkey) {
                for (dpid, port) in ingress_change_ports.clone() {
                    let already = pinfo
                        .as_ref()
                        .map_or(false, |p| p.ingress_change_detect.contains(&(dpid, port)));
                    if already {
                        continue;
                    }
                    self.install_ingress_change_detect(port, hkey, dpid);
                }
                if let Some(entry) = self.paths.get_mut(hkey) {
                    entry.ingress_change_detect = ingress_change_ports;
                }
            }
        }
    }

    /// Rewrite the stored instruction list of a pair after its egress moved:
    /// the primary takes the new egress and the alternate that previously
    /// held it inherits the old one, keeping the list a valid
    /// primary-plus-alternates set. Notifies the root.
    pub fn notify_egress_change(&mut self, hkey: &PairKey, new_egress: &Endpoint) {
        let new_link = match new_egress {
            Endpoint::Boundary(sw, port) => SegmentEnd::Link(*sw, *port),
            Endpoint::Local(_) => return,
        };
        let instructions = match self.inter_dom_paths.get_mut(hkey) {
            Some(instructions) if !instructions.is_empty() => instructions,
            _ => return,
        };
        let old_out = instructions[0].output.clone();
        if old_out == new_link {
            return;
        }
        for instruction in instructions.iter_mut() {
            if instruction.output == new_link {
                instruction.output = old_out.clone();
            } else if instruction.output == old_out {
                instruction.output = new_link.clone();
            }
        }
        let new_paths = instructions.clone();
        self.outbox.push(crate::proto::LcToRoot::EgressChange {
            cid: self.cid,
            hkey: hkey.clone(),
            new_paths,
        });
    }
}
