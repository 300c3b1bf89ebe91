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

//! Inter-domain topology assembly.
//!
//! Each local controller reports its hosts, switches and the links leaving
//! its domain. Hosts are attached to their controller's virtual domain node
//! by fresh negative virtual ports. Inter-domain adjacencies arrive in two
//! halves; the real link joins the graph only when both controllers have
//! named each other's switch, until then it stays pending in the
//! per-domain neighbour tables.

use super::{NeighbourRec, RootController, RootOut};
use crate::proto::{CtrlMsg, HostRec, Instruction, UnknownLinkRec};
use crate::path_info::PairKey;
use crate::topo::{Cid, Dpid, NodeId, PortNo, PortUpdate, Topology, HOST_PORT};
use log::*;

impl RootController {
    /// Absorb a domain topology report. Returns true when inter-domain
    /// paths must be recomputed.
    pub(crate) fn action_topo(
        &mut self,
        cid: Cid,
        hosts: Vec<HostRec>,
        switches: Vec<Dpid>,
        unknown_links: Vec<UnknownLinkRec>,
        te_thresh: f64,
        paths: Vec<(PairKey, Vec<Instruction>)>,
    ) -> bool {
        let mut recomp_path = false;

        // new hosts attach to the domain node via fresh virtual ports
        let known_hosts: Vec<HostRec> =
            self.topo.get(&cid).map(|d| d.hosts.clone()).unwrap_or_default();
        for host in &hosts {
            if !known_hosts.contains(host) {
                recomp_path = true;
                if let Some(dominfo) = self.topo.get_mut(&cid) {
                    dominfo.hosts.push(host.clone());
                }
                let virtual_pn = self.gen_dom_virt_port(cid);
                let domain = NodeId::Domain(cid);
                let host_node = NodeId::Host(host.name.clone());
                let _ = self.graph.add_link(&domain, &host_node, virtual_pn, HOST_PORT);
                let _ = self.graph.add_link(&host_node, &domain, HOST_PORT, virtual_pn);
                self.graph.update_port_info(
                    &host_node,
                    HOST_PORT,
                    PortUpdate {
                        addr: Some(host.addr),
                        eth: Some(host.eth.clone()),
                        ..Default::default()
                    },
                );
            }
        }

        // hosts that vanished from the report leave the graph
        for host in &known_hosts {
            if !hosts.contains(host) {
                recomp_path = true;
                if let Some(dominfo) = self.topo.get_mut(&cid) {
                    dominfo.hosts.retain(|h| h != host);
                }
                self.graph.remove_host(&NodeId::Host(host.name.clone()));
                info!("Deleted host {} from cid {}", host.name, cid);
            }
        }

        let known_switches: Vec<Dpid> =
            self.topo.get(&cid).map(|d| d.switches.clone()).unwrap_or_default();
        for sw in &switches {
            if !known_switches.contains(sw) {
                recomp_path = true;
                if let Some(dominfo) = self.topo.get_mut(&cid) {
                    dominfo.switches.push(*sw);
                }
            }
        }
        for sw in &known_switches {
            if !switches.contains(sw) {
                if let Some(dominfo) = self.topo.get_mut(&cid) {
                    dominfo.switches.retain(|s| s != sw);
                }
                info!("Deleted switch {} from cid {}", sw, cid);
            }
        }

        // dead links are advertised explicitly, only additions matter here
        for link in &unknown_links {
            self.temp_speed.insert((link.sw, link.port), link.speed);
            let n_cid = match link.cid {
                Some(n_cid) => n_cid,
                None => continue,
            };
            if self.add_cid_neighbour(cid, n_cid, link.sw, link.port, link.dest_sw) {
                recomp_path = true;
            }
        }

        if let Some(dominfo) = self.topo.get_mut(&cid) {
            dominfo.te_thresh = te_thresh;
        }
        if !paths.is_empty() {
            self.old_send.insert(cid, paths.into_iter().collect());
        }

        recomp_path
    }

    /// Resolve which controller owns the far end of a new inter-domain
    /// link, answer the asking controller, and stage the adjacency.
    pub(crate) fn action_unknown_sw(
        &mut self,
        cid: Cid,
        sw: Dpid,
        port: PortNo,
        dest_sw: Dpid,
        speed: u64,
    ) -> bool {
        info!("Received unknown switch message from {}", cid);
        self.temp_speed.insert((sw, port), speed);

        let n_cid = match self.find_sw_cid(dest_sw) {
            Some(n_cid) => n_cid,
            None => return false,
        };
        info!("Switch belongs to CID {}", n_cid);
        self.outbox.push(RootOut::ToLc(cid, CtrlMsg::UnknownSw { cid: n_cid, sw, port, dest_sw }));
        self.add_cid_neighbour(cid, n_cid, sw, port, dest_sw)
    }

    /// An inter-domain port died; assume bidirectional failure, drop both
    /// neighbour entries and both graph ports.
    pub(crate) fn action_dead_port(&mut self, cid: Cid, sw: Dpid, port: PortNo) -> bool {
        info!("Received dead inter-domain port message from {}", cid);

        let mut found: Option<(Cid, Dpid, Option<PortNo>)> = None;
        if let Some(dominfo) = self.topo.get_mut(&cid) {
            let key = dominfo
                .neighbours
                .iter()
                .find(|(k, _)| k.1 == sw && k.2 == port)
                .map(|(k, v)| (*k, v.clone()));
            if let Some((key, rec)) = key {
                dominfo.neighbours.remove(&key);
                found = Some((key.0, rec.switch, rec.port));
            }
        }

        let (dst_cid, dst_sw, dst_pn) = match found {
            Some(found) => found,
            None => {
                info!("Could not find neighbour for CID!");
                return false;
            }
        };
        if let Some(dominfo) = self.topo.get_mut(&dst_cid) {
            match dst_pn {
                Some(dst_pn) => {
                    dominfo.neighbours.remove(&(cid, dst_sw, dst_pn));
                }
                None => dominfo.neighbours.retain(|key, _| !(key.0 == cid && key.1 == dst_sw)),
            }
        }

        if !self.graph.remove_port_any(&NodeId::Switch(sw), port) {
            info!("Could not find src {} ({}) in graph topology to remove", sw, port);
        }
        match dst_pn {
            Some(dst_pn) => {
                if !self.graph.remove_port_any(&NodeId::Switch(dst_sw), dst_pn) {
                    info!(
                        "Could not find dst {} ({}) in graph topology to remove",
                        dst_sw, dst_pn
                    );
                }
                info!("Removed inter domain link {} ({}) -> {} ({})", sw, port, dst_sw, dst_pn);
            }
            None => info!("Removed half-resolved inter domain link {} ({})", sw, port),
        }

        self.graph.mark_stale();
        true
    }

    /// Allocate a fresh virtual port on a domain node by scanning downwards
    /// from `-1`.
    pub(crate) fn gen_dom_virt_port(&self, cid: Cid) -> PortNo {
        let node = NodeId::Domain(cid);
        let mut port = -1;
        loop {
            if !self.graph.contains(&node) || self.graph.get_port_info(&node, port).is_none() {
                return port;
            }
            port -= 1;
        }
    }

    /// Allocate a fresh virtual port on a switch, for its attachment link to
    /// the domain node.
    pub(crate) fn gen_sw_virt_port(&self, sw: Dpid) -> PortNo {
        let node = NodeId::Switch(sw);
        let mut port = -1;
        loop {
            if !self.graph.contains(&node) || self.graph.get_port_info(&node, port).is_none() {
                return port;
            }
            port -= 1;
        }
    }

    /// Every active controller a node belongs to. A domain node resolves to
    /// its own controller; inactive controllers are invisible, which lets a
    /// restarted controller take over under a fresh identifier.
    pub(crate) fn belongs_to_cid(&self, node: &NodeId) -> Vec<Cid> {
        let mut cids = Vec::new();
        for (cid, dominfo) in &self.topo {
            if let NodeId::Domain(dcid) = node {
                if dcid == cid {
                    return vec![*cid];
                }
            }
            if !self.ctrl_is_active(*cid) {
                continue;
            }
            match node {
                NodeId::Host(name) => {
                    if dominfo.hosts.iter().any(|h| h.name == *name) {
                        cids.push(*cid);
                    }
                }
                NodeId::Switch(dpid) => {
                    if dominfo.switches.contains(dpid) {
                        cids.push(*cid);
                    }
                }
                _ => {}
            }
        }
        cids
    }

    /// The active controller managing a switch.
    pub(crate) fn find_sw_cid(&self, sw: Dpid) -> Option<Cid> {
        self.topo
            .iter()
            .find(|(cid, dominfo)| self.ctrl_is_active(**cid) && dominfo.switches.contains(&sw))
            .map(|(cid, _)| *cid)
    }

    /// The TE threshold of the controller managing a node. Falls back to
    /// the given default for unowned nodes.
    pub(crate) fn cid_te_thresh(&self, node: &NodeId, default: f64) -> f64 {
        for (cid, dominfo) in &self.topo {
            match node {
                NodeId::Domain(dcid) if dcid == cid => return dominfo.te_thresh,
                NodeId::Switch(dpid) if dominfo.switches.contains(dpid) => {
                    return dominfo.te_thresh
                }
                _ => {}
            }
        }
        default
    }

    fn find_neighbour(
        &self,
        from_cid: Cid,
        find: Cid,
        from_sw: Dpid,
        dest_sw: Dpid,
    ) -> Option<(Cid, Dpid, PortNo)> {
        let dominfo = self.topo.get(&from_cid)?;
        dominfo
            .neighbours
            .iter()
            .find(|(key, rec)| key.0 == find && key.1 == from_sw && rec.switch == dest_sw)
            .map(|(key, _)| *key)
    }

    /// Stage one half of an inter-domain adjacency. When the reverse half
    /// is already known the real link joins the graph (with its staged
    /// speed) and paths must be recomputed.
    pub(crate) fn add_cid_neighbour(
        &mut self,
        cid: Cid,
        n_cid: Cid,
        src_sw: Dpid,
        src_port: PortNo,
        dst_sw: Dpid,
    ) -> bool {
        let n_key = (n_cid, src_sw, src_port);
        match self.topo.get(&cid) {
            Some(dominfo) if !dominfo.neighbours.contains_key(&n_key) => {}
            _ => return false,
        }
        if let Some(dominfo) = self.topo.get_mut(&cid) {
            dominfo.neighbours.insert(n_key, NeighbourRec { switch: dst_sw, port: None });
        }

        // attach the boundary switch to its domain node
        let domain = NodeId::Domain(cid);
        let switch = NodeId::Switch(src_sw);
        if self.graph.find_ports(&domain, &switch).is_none() {
            let cid_vpn = self.gen_dom_virt_port(cid);
            let sw_vpn = self.gen_sw_virt_port(src_sw);
            let _ = self.graph.add_link(&domain, &switch, cid_vpn, sw_vpn);
            let _ = self.graph.add_link(&switch, &domain, sw_vpn, cid_vpn);
        }

        // the link becomes real once the other half is known
        let reverse = match self.find_neighbour(n_cid, cid, dst_sw, src_sw) {
            Some(reverse) => reverse,
            None => return false,
        };
        let dst_port = reverse.2;
        if let Some(dominfo) = self.topo.get_mut(&cid) {
            if let Some(rec) = dominfo.neighbours.get_mut(&n_key) {
                rec.port = Some(dst_port);
            }
        }
        if let Some(dominfo) = self.topo.get_mut(&n_cid) {
            if let Some(rec) = dominfo.neighbours.get_mut(&reverse) {
                rec.port = Some(src_port);
            }
        }

        let src_node = NodeId::Switch(src_sw);
        let dst_node = NodeId::Switch(dst_sw);
        if self.graph.get_port_info(&src_node, src_port).is_none() {
            let _ = self.graph.add_link(&src_node, &dst_node, src_port, dst_port);
            if let Some(speed) = self.temp_speed.get(&(src_sw, src_port)).copied() {
                self.graph.update_port_info(
                    &src_node,
                    src_port,
                    PortUpdate { speed: Some(speed), ..Default::default() },
                );
            }
        } else {
            self.graph.set_port_dest(&src_node, src_port, (dst_node.clone(), dst_port));
        }
        if self.graph.get_port_info(&dst_node, dst_port).is_none() {
            let _ = self.graph.add_link(&dst_node, &src_node, dst_port, src_port);
            if let Some(speed) = self.temp_speed.get(&(dst_sw, dst_port)).copied() {
                self.graph.update_port_info(
                    &dst_node,
                    dst_port,
                    PortUpdate { speed: Some(speed), ..Default::default() },
                );
            }
        } else {
            self.graph.set_port_dest(&dst_node, dst_port, (src_node, src_port));
        }

        true
    }

    /// A copy of the graph without the domains of inactive controllers,
    /// used for path composition. Tolerates controllers restarting under a
    /// fresh identifier while their old one lingers.
    pub(crate) fn prune_topo_inactive_cids(&self, graph: &Topology) -> Topology {
        let mut g = graph.clone();
        let inactive: Vec<Cid> = self
            .topo
            .keys()
            .filter(|cid| !self.ctrl_is_active(**cid))
            .copied()
            .collect();
        for cid in inactive {
            g.remove_switch(&NodeId::Domain(cid));
        }
        g.mark_stale();
        g
    }
}
