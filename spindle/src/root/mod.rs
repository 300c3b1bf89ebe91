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

//! # Root coordinator
//!
//! The single root controller assembles the inter-domain topology from the
//! local controllers' reports, composes loop-free paths between hosts of
//! different domains, and emits per-domain instruction lists describing the
//! segments each local controller must install. It tracks controller
//! liveness through keep-alives, absorbs ingress/egress-change feedback into
//! its stored plans, and resolves escalated inter-domain congestion with a
//! CSPF recomputation over the domain-level graph.
//!
//! Like the local-controller core, the root core is synchronous: inbound
//! messages are handed to [`RootController::handle_message`], outbound
//! messages accumulate in the outbox, and the runtime owns every timer.

mod compose;
mod te;
mod topo;

use crate::path_info::PairKey;
use crate::printer;
use crate::proto::{CtrlMsg, HostRec, Instruction, LcToRoot};
use crate::topo::{Cid, Dpid, Hop, NodeId, PortNo, PortUpdate, Topology};
use log::*;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration of the root controller
#[derive(Debug, Clone)]
pub struct RootConfig {
    /// Consider heavy-hitter candidates first during TE
    pub te_candidate_sort_rev: bool,
    /// Accept partial TE solutions (over threshold, no loss)
    pub te_partial_accept: bool,
    /// Seconds without a message before a controller misses a keep-alive
    pub keep_alive_time: f64,
    /// Missed keep-alives before a controller is declared dead
    pub keep_alive_count: u32,
    /// Seconds to consolidate graph mutations before path composition
    pub path_comp_time: f64,
    /// Period of the root's own heartbeat
    pub root_keep_alive_time: f64,
    /// Directory for the human-readable state dumps, if any
    pub dump_dir: Option<PathBuf>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            te_candidate_sort_rev: true,
            te_partial_accept: false,
            keep_alive_time: 6.0,
            keep_alive_count: 1,
            path_comp_time: 1.0,
            root_keep_alive_time: 30.0,
            dump_dir: None,
        }
    }
}

/// An outbound root-controller message with its addressing
#[derive(Debug, Clone, PartialEq)]
pub enum RootOut {
    /// To one local controller
    ToLc(Cid, CtrlMsg),
    /// To every local controller
    Broadcast(CtrlMsg),
    /// The root's own heartbeat
    KeepAlive,
}

/// Liveness record of one local controller
#[derive(Debug, Clone, Default)]
pub struct CtrlRecord {
    /// Keep-alive intervals missed in a row
    pub missed: u32,
}

/// The far end of a pending or resolved inter-domain adjacency
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NeighbourRec {
    pub(crate) switch: Dpid,
    pub(crate) port: Option<PortNo>,
}

/// Everything one local controller reported about its domain
#[derive(Debug, Clone, Default)]
pub(crate) struct DomainInfo {
    pub(crate) hosts: Vec<HostRec>,
    pub(crate) switches: Vec<Dpid>,
    pub(crate) neighbours: BTreeMap<(Cid, Dpid, PortNo), NeighbourRec>,
    pub(crate) te_thresh: f64,
}

/// The stored node paths of one pair: primary first, then the secondary if
/// one exists, each with its port triples.
pub(crate) type StoredPaths = Vec<(Vec<NodeId>, Vec<Hop>)>;

/// The root-controller core.
pub struct RootController {
    pub(crate) cfg: RootConfig,
    pub(crate) ctrls: BTreeMap<Cid, CtrlRecord>,
    pub(crate) topo: BTreeMap<Cid, DomainInfo>,
    pub(crate) graph: Topology,
    pub(crate) old_paths: BTreeMap<PairKey, StoredPaths>,
    pub(crate) old_send: BTreeMap<Cid, BTreeMap<PairKey, Vec<Instruction>>>,
    pub(crate) temp_speed: BTreeMap<(Dpid, PortNo), u64>,
    /// Outbound messages, drained by the runtime
    pub outbox: Vec<RootOut>,
    /// Set when the graph changed and the path-comp timer must be (re)armed
    pub recomp_needed: bool,
}

impl RootController {
    /// Create a root controller core.
    pub fn new(cfg: RootConfig) -> Self {
        Self {
            cfg,
            ctrls: BTreeMap::new(),
            topo: BTreeMap::new(),
            graph: Topology::new(),
            old_paths: BTreeMap::new(),
            old_send: BTreeMap::new(),
            temp_speed: BTreeMap::new(),
            outbox: Vec::new(),
            recomp_needed: false,
        }
    }

    /// On startup: ask every controller for its topology. The runtime also
    /// starts the root keep-alive timer.
    pub fn start(&mut self) {
        self.outbox.push(RootOut::Broadcast(CtrlMsg::GetTopo));
        info!("Started root controller");
    }

    /// Emit the root heartbeat; the runtime re-arms the 30-second timer.
    pub fn send_root_keep_alive(&mut self) {
        self.outbox.push(RootOut::KeepAlive);
    }

    /// The configured liveness window in seconds.
    pub fn keep_alive_time(&self) -> f64 {
        self.cfg.keep_alive_time
    }

    /// The configured composition consolidation window in seconds.
    pub fn path_comp_time(&self) -> f64 {
        self.cfg.path_comp_time
    }

    /// The configured heartbeat period in seconds.
    pub fn root_keep_alive_time(&self) -> f64 {
        self.cfg.root_keep_alive_time
    }

    /// Handle one message from a local controller. The caller resets the
    /// sender's liveness timer (the miss counter is reset here).
    pub fn handle_message(&mut self, msg: LcToRoot) {
        let cid = msg.cid();

        if !self.ctrls.contains_key(&cid) {
            // defer path recomputation until the new controller's links are
            // advertised; we do not yet know how it connects
            info!("Discovered a new controller with ID: {}", cid);
            self.topo.insert(cid, DomainInfo::default());
        }
        self.ctrls.insert(cid, CtrlRecord { missed: 0 });

        let recomp_path = match msg {
            LcToRoot::Topo { cid, hosts, switches, unknown_links, te_thresh, paths } => {
                self.action_topo(cid, hosts, switches, unknown_links, te_thresh, paths)
            }
            LcToRoot::Discover { cid, te_thresh } => {
                debug!("Received controller discovery message from {}", cid);
                if let Some(info) = self.topo.get_mut(&cid) {
                    info.te_thresh = te_thresh;
                }
                false
            }
            LcToRoot::UnknownSw { cid, sw, port, dest_sw, speed } => {
                self.action_unknown_sw(cid, sw, port, dest_sw, speed)
            }
            LcToRoot::DeadPort { cid, sw, port } => self.action_dead_port(cid, sw, port),
            LcToRoot::LinkTraffic { cid, sw, port, traff_bps } => {
                debug!("Got IDL traff from {} (traff_bps: {})", cid, traff_bps);
                self.update_link_rate(sw, port, traff_bps);
                false
            }
            LcToRoot::Congestion { cid, sw, port, traff_bps, te_thresh, paths } => {
                info!("Received inter domain link congestion message from {}", cid);
                if self.graph.get_port_info(&NodeId::Switch(sw), port).is_some() {
                    self.update_link_rate(sw, port, traff_bps);
                    self.te_optimisation(sw, port, traff_bps, te_thresh, &paths);
                    self.outbox.push(RootOut::ToLc(cid, CtrlMsg::ProcessedCon { sw, port }));
                } else {
                    error!("Congested port {} ({}) doesn't exist!", sw, port);
                }
                false
            }
            LcToRoot::EgressChange { cid, hkey, new_paths } => {
                info!("Received inter domain path egress change notification {}", cid);
                self.path_info_changed(cid, &hkey, new_paths);
                false
            }
            LcToRoot::IngressChange { cid, hkey, new_paths } => {
                info!("Received inter domain path ingress change notification {}", cid);
                self.path_info_changed(cid, &hkey, new_paths);
                false
            }
        };

        if recomp_path {
            info!("Data associated with controller changed, recomputing paths");
            self.recomp_needed = true;
        }
    }

    fn update_link_rate(&mut self, sw: Dpid, port: PortNo, traff_bps: f64) {
        let node = NodeId::Switch(sw);
        if self.graph.get_port_info(&node, port).is_none() {
            return;
        }
        self.graph.update_port_info(
            &node,
            port,
            PortUpdate {
                counters: Some(crate::topo::CounterUpdate {
                    tx_bytes: Some((traff_bps / 8.0) as u64),
                    ..Default::default()
                }),
                is_total: false,
                ..Default::default()
            },
        );
    }

    /// A controller's liveness timer expired. Increments the miss count;
    /// past the threshold the controller is declared dead: its hosts, its
    /// exclusively owned switches and every neighbour entry referencing it
    /// leave the graph, and every surviving controller is told exactly
    /// once. Returns true when the controller was removed (the runtime
    /// drops its timer) and false when the timer must restart.
    pub fn keep_alive_expired(&mut self, cid: Cid) -> bool {
        let missed = match self.ctrls.get_mut(&cid) {
            Some(record) => {
                record.missed += 1;
                record.missed
            }
            None => return true,
        };
        if missed < self.cfg.keep_alive_count {
            info!("Did not receive keep alive from CID {} (count {})", cid, missed);
            return false;
        }

        info!("Controller with ID {} timed-out!", cid);
        let dominfo = match self.topo.remove(&cid) {
            Some(dominfo) => dominfo,
            None => {
                self.ctrls.remove(&cid);
                return true;
            }
        };
        self.ctrls.remove(&cid);

        // hosts hang off the domain node only
        for host in &dominfo.hosts {
            self.graph.remove_host(&NodeId::Host(host.name.clone()));
        }

        // switches survive only when another live controller claims them
        for sw in &dominfo.switches {
            let node = NodeId::Switch(*sw);
            if !self.graph.contains(&node) {
                continue;
            }
            let claimed = self
                .topo
                .iter()
                .any(|(ocid, oinfo)| self.ctrl_is_active(*ocid) && oinfo.switches.contains(sw));
            if claimed {
                // keep the switch, drop only its attachment to the dead
                // domain node
                let attach: Vec<(PortNo, (NodeId, PortNo))> = self
                    .graph
                    .ports_of(&node)
                    .into_iter()
                    .filter_map(|(port, info)| info.dest.map(|dest| (port, dest)))
                    .filter(|(_, (dest, _))| *dest == NodeId::Domain(cid))
                    .collect();
                for (port, (dest, dest_port)) in attach {
                    self.graph.remove_port_any(&dest, dest_port);
                    self.graph.remove_port_any(&node, port);
                }
            } else {
                self.graph.remove_switch(&node);
            }
        }

        self.graph.remove_switch(&NodeId::Domain(cid));

        for dominfo in self.topo.values_mut() {
            dominfo.neighbours.retain(|key, _| key.0 != cid);
        }

        self.graph.mark_stale();
        self.recomp_needed = true;
        self.outbox.push(RootOut::Broadcast(CtrlMsg::CtrlDead { cid }));
        true
    }

    /// True while the controller has not missed a keep-alive. Controllers
    /// the root has never heard of count as active, which tolerates
    /// restarts under a fresh identifier.
    pub(crate) fn ctrl_is_active(&self, cid: Cid) -> bool {
        self.ctrls.get(&cid).map(|record| record.missed == 0).unwrap_or(true)
    }

    /// Write the four human-readable state dumps for operator inspection.
    /// Best effort only; failures are logged and ignored.
    pub(crate) fn write_controller_state(&self) {
        let dir = match &self.cfg.dump_dir {
            Some(dir) => dir,
            None => return,
        };
        let dumps: Vec<(&str, String)> = vec![
            ("old_send.tmp", printer::render_old_send(&self.old_send)),
            ("paths.tmp", printer::render_old_paths(&self.old_paths)),
            ("topo.tmp", self.render_topo()),
            ("graph.tmp", printer::render_graph(&self.graph)),
        ];
        for (name, content) in dumps {
            if let Err(e) = std::fs::write(dir.join(name), content) {
                warn!("Could not write state dump {}: {}", name, e);
            }
        }
        info!("Wrote controller state");
    }

    fn render_topo(&self) -> String {
        let mut out = String::new();
        for (cid, dominfo) in &self.topo {
            out.push_str(&format!(
                "cid {}: te_thresh {}\n  hosts: {:?}\n  switches: {:?}\n",
                cid,
                dominfo.te_thresh,
                dominfo.hosts.iter().map(|h| &h.name).collect::<Vec<_>>(),
                dominfo.switches,
            ));
            for (key, rec) in &dominfo.neighbours {
                out.push_str(&format!(
                    "  neighbour {:?} -> switch {} port {:?}\n",
                    key, rec.switch, rec.port
                ));
            }
        }
        out
    }
}
