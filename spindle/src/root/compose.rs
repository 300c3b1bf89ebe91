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

//! Loop-free inter-domain path composition and instruction emission.

use super::{RootController, RootOut};
use crate::path_info::PairKey;
use crate::proto::{CtrlMsg, HostRec, Instruction, InstrAction, SegmentEnd};
use crate::topo::{Cid, Hop, NodeId, Topology, BLOCKED_COST};
use log::*;
use std::collections::{BTreeMap, BTreeSet};

impl RootController {
    /// Compute a shortest path that visits every domain at most once.
    ///
    /// A shortest path is computed and walked; if it re-enters a domain it
    /// already left, the offending inter-domain link is removed from a
    /// working copy and the computation repeats until the path is loop-free
    /// or empty.
    pub(crate) fn find_path_loopfree(
        &self,
        graph: &Topology,
        src: &NodeId,
        dst: &NodeId,
    ) -> (Vec<NodeId>, Vec<Hop>) {
        let mut g = graph.clone();

        loop {
            let path = g.shortest_path(src, dst);
            if path.is_empty() {
                return (Vec::new(), Vec::new());
            }
            let ports = match g.flows_for_path(&path) {
                Ok(ports) => ports,
                Err(e) => {
                    warn!("{}", e);
                    return (Vec::new(), Vec::new());
                }
            };

            let mut found = true;
            let mut visited_cids: Vec<Cid> = Vec::new();
            let mut last_cid: Option<Cid> = None;
            for i in 0..ports.len().saturating_sub(1) {
                let node = &ports[i + 1];
                let cid = match self.belongs_to_cid(&node.node).first().copied() {
                    Some(cid) => cid,
                    None => continue,
                };
                if last_cid.is_none() {
                    last_cid = Some(cid);
                }
                if last_cid != Some(cid) {
                    if visited_cids.contains(&cid) {
                        found = false;
                        let node_prev = &ports[i];
                        info!(
                            "Path goes back to visited domain {} | {}-{}",
                            cid, node_prev.node, node.node
                        );
                        if !g.remove_port(
                            &node_prev.node,
                            &node.node,
                            node_prev.out_port,
                            node.in_port,
                        ) {
                            error!("Can't remove link (fix domain revisit)!");
                            return (Vec::new(), Vec::new());
                        }
                        break;
                    }
                    visited_cids.push(last_cid.expect("set above"));
                    last_cid = Some(cid);
                }
            }

            if found {
                return (path, ports);
            }
        }
    }

    /// Recompute every inter-domain path, derive per-domain instruction
    /// lists, and emit only the differences against what each controller
    /// already installed. Called by the runtime when the composition
    /// consolidation timer expires.
    pub fn compute_inter_domain_paths(&mut self) {
        // restarted controllers may linger under a stale identifier
        let g = self.prune_topo_inactive_cids(&self.graph);
        self.old_paths.clear();

        info!("Computing inter domain paths");
        let mut send: BTreeMap<Cid, BTreeMap<PairKey, Vec<Instruction>>> = BTreeMap::new();

        let domains: Vec<(Cid, Vec<HostRec>)> =
            self.topo.iter().map(|(cid, d)| (*cid, d.hosts.clone())).collect();

        for (fcid, fhosts) in &domains {
            for (scid, shosts) in &domains {
                if fcid == scid {
                    continue;
                }
                for fh in fhosts {
                    for sh in shosts {
                        if fh == sh {
                            continue;
                        }

                        let mut gn = g.clone();
                        let src = NodeId::Host(fh.name.clone());
                        let dst = NodeId::Host(sh.name.clone());
                        let (path, ports) = self.find_path_loopfree(&gn, &src, &dst);
                        if path.is_empty() {
                            continue;
                        }

                        let mut res_path = vec![(path.clone(), ports.clone())];
                        let mut ports_list = vec![ports.clone()];

                        // a minimally overlapping secondary
                        for pair in ports.windows(2) {
                            gn.change_cost(
                                &pair[0].node,
                                &pair[1].node,
                                pair[0].out_port,
                                pair[1].in_port,
                                BLOCKED_COST,
                            );
                        }
                        let (path_sec, ports_sec) = self.find_path_loopfree(&gn, &src, &dst);
                        if !path_sec.is_empty() {
                            res_path.push((path_sec, ports_sec.clone()));
                            ports_list.push(ports_sec);
                        }

                        self.old_paths.insert((fh.name.clone(), sh.name.clone()), res_path);
                        self.path_to_instructions(fh, sh, &ports_list, &mut send);
                    }
                }
            }
        }

        self.emit_instruction_diff(send, None);
        self.write_controller_state();
    }

    /// Translate the path port lists of one pair into per-domain
    /// instructions, accumulated into `send`. The first ports list is the
    /// primary path; the instruction of each domain carries the boundary
    /// ports on both sides, with the destination address on the start
    /// segment and the destination MAC on the end segment.
    pub(crate) fn path_to_instructions(
        &self,
        fh: &HostRec,
        sh: &HostRec,
        ports_list: &[Vec<Hop>],
        send: &mut BTreeMap<Cid, BTreeMap<PairKey, Vec<Instruction>>>,
    ) {
        let hkey: PairKey = (fh.name.clone(), sh.name.clone());

        let push = |send: &mut BTreeMap<Cid, BTreeMap<PairKey, Vec<Instruction>>>,
                    cid: Cid,
                    instruction: Instruction| {
            let entry = send.entry(cid).or_default().entry(hkey.clone()).or_default();
            if !entry.contains(&instruction) {
                entry.push(instruction);
            }
        };

        for ports in ports_list {
            let mut in_end = SegmentEnd::Host;
            let mut cid: Option<Cid> = None;
            let mut is_ingress = false;

            for i in 0..ports.len() {
                let current_cids = self.belongs_to_cid(&ports[i].node);
                if i == 0 {
                    in_end = SegmentEnd::Host;
                    cid = current_cids.first().copied();
                    is_ingress = true;
                }

                if let NodeId::Domain(dcid) = &ports[i].node {
                    // passing through a domain node just pins the owner;
                    // domain nodes never link to each other directly
                    cid = Some(*dcid);
                } else if cid.map_or(false, |c| !current_cids.contains(&c)) {
                    // domain boundary: close off the previous domain
                    let out_sw = match ports[i - 1].node.switch() {
                        Some(sw) => sw,
                        None => continue,
                    };
                    let mut instruction = Instruction {
                        action: InstrAction::Add,
                        input: in_end.clone(),
                        output: SegmentEnd::Link(out_sw, ports[i - 1].out_port),
                        out_addr: None,
                        out_eth: None,
                    };
                    if is_ingress {
                        is_ingress = false;
                        instruction.out_addr = Some(sh.addr);
                    }
                    if let Some(prev_cid) = cid {
                        push(send, prev_cid, instruction);
                    }

                    let in_sw = match ports[i].node.switch() {
                        Some(sw) => sw,
                        None => continue,
                    };
                    in_end = SegmentEnd::Link(in_sw, ports[i].in_port);
                    cid = current_cids.first().copied();
                }
            }

            // the final domain terminates at the destination host
            let mut instruction = Instruction {
                action: InstrAction::Add,
                input: in_end,
                output: SegmentEnd::Host,
                out_addr: None,
                out_eth: Some(sh.eth.clone()),
            };
            if is_ingress {
                is_ingress = false;
                instruction.out_addr = Some(sh.addr);
            }
            if let Some(cid) = cid {
                push(send, cid, instruction);
            }
            let _ = is_ingress;
        }
    }

    /// True when the instruction list for a pair matches what was last sent
    /// to the controller.
    fn path_already_installed(&self, cid: Cid, hkey: &PairKey, paths: &[Instruction]) -> bool {
        let old = match self.old_send.get(&cid).and_then(|m| m.get(hkey)) {
            Some(old) => old,
            None => return false,
        };
        if old.len() != paths.len() {
            return false;
        }
        old.iter().zip(paths.iter()).all(|(a, b)| {
            a.input == b.input
                && a.output == b.output
                && a.out_addr == b.out_addr
                && a.out_eth == b.out_eth
        })
    }

    /// Diff freshly computed instructions against the last emission and
    /// send only the changes: unchanged pairs are dropped, vanished pairs
    /// are re-emitted as deletes, new controllers receive their whole set.
    /// With a `scope`, removal handling only touches the listed pairs (the
    /// TE path recomputation must not withdraw unrelated state).
    pub(crate) fn emit_instruction_diff(
        &mut self,
        send: BTreeMap<Cid, BTreeMap<PairKey, Vec<Instruction>>>,
        scope: Option<&BTreeSet<PairKey>>,
    ) {
        let send_cids: BTreeSet<Cid> = send.keys().copied().collect();

        for (cid, cid_paths) in send {
            info!("Sending path request to {}", cid);

            let to_send: BTreeMap<PairKey, Vec<Instruction>> =
                if !self.old_send.contains_key(&cid) {
                    debug!("New CID, installing unconditionally");
                    self.old_send.insert(cid, cid_paths.clone());
                    cid_paths
                } else {
                    let mut keep: BTreeMap<PairKey, Vec<Instruction>> = BTreeMap::new();
                    for (hkey, paths) in &cid_paths {
                        if self.path_already_installed(cid, hkey, paths) {
                            debug!("Path already installed, not re-sending!");
                        } else {
                            debug!("Path changed, sending details");
                            keep.insert(hkey.clone(), paths.clone());
                        }
                    }
                    let old_entry = self.old_send.get_mut(&cid).expect("checked above");
                    for (hkey, paths) in keep.iter() {
                        old_entry.insert(hkey.clone(), paths.clone());
                    }

                    // previously installed pairs that vanished become deletes
                    let mut old_remove = Vec::new();
                    for (hkey, paths) in old_entry.iter() {
                        if let Some(scope) = scope {
                            if !scope.contains(hkey) {
                                continue;
                            }
                        }
                        if !cid_paths.contains_key(hkey) {
                            debug!("Removing path that no longer exists");
                            let mut del = paths.clone();
                            for p in &mut del {
                                p.action = InstrAction::Delete;
                            }
                            keep.insert(hkey.clone(), del);
                            old_remove.push(hkey.clone());
                        }
                    }
                    for hkey in old_remove {
                        old_entry.remove(&hkey);
                    }
                    keep
                };

            if !to_send.is_empty() {
                self.outbox.push(RootOut::ToLc(
                    cid,
                    CtrlMsg::ComputePaths { paths: to_send.into_iter().collect() },
                ));
            }
        }

        // controllers whose entire set vanished get a bulk delete
        let mut pending: Vec<(Cid, BTreeMap<PairKey, Vec<Instruction>>)> = Vec::new();
        let mut drop_cids: Vec<Cid> = Vec::new();
        for (cid, old_paths_map) in self.old_send.iter_mut() {
            if send_cids.contains(cid) {
                continue;
            }
            let mut rem_send: BTreeMap<PairKey, Vec<Instruction>> = BTreeMap::new();
            let mut rem_keys = Vec::new();
            for (hkey, paths) in old_paths_map.iter() {
                if let Some(scope) = scope {
                    if !scope.contains(hkey) {
                        continue;
                    }
                }
                let mut del = paths.clone();
                for p in &mut del {
                    p.action = InstrAction::Delete;
                }
                rem_send.insert(hkey.clone(), del);
                rem_keys.push(hkey.clone());
            }
            for hkey in rem_keys {
                old_paths_map.remove(&hkey);
            }
            if !rem_send.is_empty() {
                info!("CID {} no longer has paths, removing previously installed paths", cid);
                pending.push((*cid, rem_send));
            }
            match scope {
                None => drop_cids.push(*cid),
                Some(_) => {
                    if old_paths_map.is_empty() {
                        drop_cids.push(*cid);
                    }
                }
            }
        }
        for (cid, rem_send) in pending {
            self.outbox.push(RootOut::ToLc(
                cid,
                CtrlMsg::ComputePaths { paths: rem_send.into_iter().collect() },
            ));
        }
        for cid in drop_cids {
            self.old_send.remove(&cid);
        }
    }

    /// Absorb an ingress or egress change reported by a local controller:
    /// replace the pair's emission record and rewrite the stored node and
    /// port paths so a subsequent composition produces an identical diff.
    pub(crate) fn path_info_changed(
        &mut self,
        cid: Cid,
        hkey: &PairKey,
        new_paths: Vec<Instruction>,
    ) {
        let old_info = match self.old_send.get(&cid).and_then(|m| m.get(hkey)) {
            Some(old) => old.clone(),
            None => {
                warn!("No recorded instructions for {:?} at cid {}", hkey, cid);
                return;
            }
        };
        if self.old_paths.get(hkey).is_none() {
            warn!("No recorded paths for {:?}", hkey);
            return;
        }

        // segment kind decides which side of the record may move
        let is_start = old_info[0].input == SegmentEnd::Host;
        let is_end = old_info[0].output == SegmentEnd::Host;

        if let Some(entry) = self.old_send.get_mut(&cid) {
            entry.insert(hkey.clone(), new_paths.clone());
        }

        let stored = self.old_paths.get_mut(hkey).expect("checked above");
        let count = new_paths.len().min(old_info.len()).min(stored.len());
        for i in 0..count {
            let old_instr = &old_info[i];
            let new_instr = &new_paths[i];

            if !is_start {
                if let (Some((old_sw, old_pn)), Some((new_sw, new_pn))) =
                    (old_instr.input.link(), new_instr.input.link())
                {
                    for node in stored[i].0.iter_mut() {
                        if *node == NodeId::Switch(old_sw) {
                            *node = NodeId::Switch(new_sw);
                        }
                    }
                    for hop in stored[i].1.iter_mut() {
                        if hop.node == NodeId::Switch(old_sw) && hop.in_port == old_pn {
                            hop.node = NodeId::Switch(new_sw);
                            hop.in_port = new_pn;
                        }
                    }
                }
            }
            if !is_end {
                if let (Some((old_sw, old_pn)), Some((new_sw, new_pn))) =
                    (old_instr.output.link(), new_instr.output.link())
                {
                    for node in stored[i].0.iter_mut() {
                        if *node == NodeId::Switch(old_sw) {
                            *node = NodeId::Switch(new_sw);
                        }
                    }
                    for hop in stored[i].1.iter_mut() {
                        if hop.node == NodeId::Switch(old_sw) && hop.out_port == old_pn {
                            hop.node = NodeId::Switch(new_sw);
                            hop.out_port = new_pn;
                        }
                    }
                }
            }
        }

        self.write_controller_state();
    }
}
