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

//! # Protection controller (local-controller core)
//!
//! For each host pair touching its domain, the controller pre-installs a
//! primary path, a minimally overlapping secondary path, and the splices
//! between them as fast-failover groups, so switches recover from failures
//! without controller involvement. Topology changes are debounced (the
//! runtime owns the timer); on expiry every pair is recomputed and the
//! minimal set of switch edits is derived by diffing against the installed
//! state. For inter-domain pairs the controller installs the path segments
//! the root controller instructs, detects data-plane ingress migrations via
//! packet-in rules, and reports ingress/egress changes back up.
//!
//! The core is synchronous and timer-free. Side effects are collected in an
//! outbox (`outbox`, `topo_dirty`, `lockout_requests`) which the runtime
//! drains after every call: messages go to the pub/sub transport, the dirty
//! flag re-arms the 2-second debounce, and lockout requests arm the per-pair
//! ingress-change wait.

mod ingress;
mod paths;
mod rebuild;
mod segment;
mod stats;

pub use paths::RecomputeOutcome;
pub use stats::RateSample;

use crate::gid::{self, Gid, GidMap, GID_HOSTS};
use crate::path_info::{PairKey, PathStore};
use crate::proto::{HostRec, Instruction, LcToRoot, UnknownLinkRec};
use crate::switch::{rules, Role, SwitchCtl, SwitchEvent, SwitchOp};
use crate::topo::{Cid, Dpid, NodeId, PortNo, PortUpdate, Topology, HOST_PORT};
use log::*;
use std::collections::{BTreeMap, BTreeSet};

/// Configuration of the protection controller core
#[derive(Debug, Clone)]
pub struct ProtectCfg {
    /// Compute loose instead of strict path splices
    pub loose_splice: bool,
    /// Recompute protection paths when failures mutate the topology
    pub optimise_protection: bool,
    /// Stats poll interval in seconds
    pub poll_interval: f64,
    /// TE utilisation threshold, repeated here for topology reports
    pub te_thresh: f64,
    /// Nominal fleet size of the GID scheme
    pub gid_hosts: u32,
}

impl Default for ProtectCfg {
    fn default() -> Self {
        Self {
            loose_splice: false,
            optimise_protection: true,
            poll_interval: 10.0,
            te_thresh: 0.90,
            gid_hosts: GID_HOSTS,
        }
    }
}

/// Controller role towards its switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlRole {
    /// Role not yet assigned
    Unknown,
    /// Active controller of the domain
    Master,
    /// Standby
    Slave,
}

/// Resolution state of a link leaving the domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownLink {
    /// Owner not known yet; the standown counter paces re-asking the root
    Unresolved {
        /// Ticks since the last resolution request
        standown: u32,
    },
    /// The far end belongs to this controller
    Resolved {
        /// Owning controller
        cid: Cid,
    },
}

pub(crate) struct RebuildPending {
    pub(crate) flow: bool,
    pub(crate) group: bool,
}

/// The local-controller core. Generic over the switch-programming capability
/// so tests can record emitted commands.
pub struct ProtectionController<S: SwitchCtl> {
    pub(crate) cfg: ProtectCfg,
    pub(crate) cid: Cid,
    pub(crate) graph: Topology,
    pub(crate) hosts: Vec<String>,
    pub(crate) paths: PathStore,
    pub(crate) switches: S,
    pub(crate) role: CtrlRole,
    generation_id: u64,
    pub(crate) rebuild_timeout: u32,
    pub(crate) rebuild_sw: BTreeMap<Dpid, RebuildPending>,
    pub(crate) unknown_links: BTreeMap<(Dpid, PortNo, Dpid), UnknownLink>,
    pub(crate) inter_dom_paths: BTreeMap<PairKey, Vec<Instruction>>,
    pub(crate) gid_map: GidMap,
    pub(crate) ing_change_wait: BTreeSet<PairKey>,
    /// Messages for the root controller, drained by the runtime
    pub outbox: Vec<LcToRoot>,
    /// Set when a mutation should re-arm the topology debounce timer
    pub topo_dirty: bool,
    /// Pairs whose ingress-change lockout timer must be (re)armed
    pub lockout_requests: Vec<PairKey>,
}

impl<S: SwitchCtl> ProtectionController<S> {
    /// Create a controller core for the given domain.
    pub fn new(cid: Cid, cfg: ProtectCfg, switches: S) -> Self {
        info!("optimise_protection: {}", cfg.optimise_protection);
        Self {
            cfg,
            cid,
            graph: Topology::new(),
            hosts: Vec::new(),
            paths: PathStore::new(),
            switches,
            role: CtrlRole::Unknown,
            generation_id: 0,
            rebuild_timeout: 0,
            rebuild_sw: BTreeMap::new(),
            unknown_links: BTreeMap::new(),
            inter_dom_paths: BTreeMap::new(),
            gid_map: GidMap::new(),
            ing_change_wait: BTreeSet::new(),
            outbox: Vec::new(),
            topo_dirty: false,
            lockout_requests: Vec::new(),
        }
    }

    /// The controller identifier of this domain.
    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// The topology graph of the domain.
    pub fn graph(&self) -> &Topology {
        &self.graph
    }

    /// Mutable access to the topology graph (TE traffic retargeting).
    pub fn graph_mut(&mut self) -> &mut Topology {
        &mut self.graph
    }

    /// The installed per-pair plans.
    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    /// Mutable access to the installed per-pair plans.
    pub fn paths_mut(&mut self) -> &mut PathStore {
        &mut self.paths
    }

    /// The hosts attached to this domain.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Mutable access to the host list (test topology setup).
    pub fn hosts_mut(&mut self) -> &mut Vec<String> {
        &mut self.hosts
    }

    /// The stats poll interval in seconds.
    pub fn poll_rate(&self) -> f64 {
        self.cfg.poll_interval
    }

    /// Whether loose path splices are computed.
    pub fn loose_splice(&self) -> bool {
        self.cfg.loose_splice
    }

    /// True once the controller holds the master role.
    pub fn is_master(&self) -> bool {
        self.role == CtrlRole::Master
    }

    pub(crate) fn get_gid(&self, pair: &PairKey) -> Gid {
        gid::gid(&pair.0, &pair.1, self.cfg.gid_hosts).unwrap_or(0)
    }

    /// Dispatch one event from the switch-protocol collaborator.
    pub fn handle_switch_event(&mut self, event: SwitchEvent) {
        match event {
            SwitchEvent::SwitchEnter { dpid } => self.switch_enter(dpid),
            SwitchEvent::LinkAdd { src_sw, dst_sw, src_port, dst_port } => {
                self.link_add(src_sw, dst_sw, src_port, dst_port)
            }
            SwitchEvent::LinkDelete { src_sw, dst_sw, src_port, dst_port } => {
                self.link_delete(src_sw, dst_sw, src_port, dst_port)
            }
            SwitchEvent::HostAdd { name, sw, port, addr, eth } => {
                self.host_add(name, sw, port, addr, eth)
            }
            SwitchEvent::HostDelete { sw, port } => self.host_delete(sw, port),
            SwitchEvent::InterDomainLinkAdd { src_sw, src_port, dest_sw } => {
                self.inter_domain_link_add(src_sw, src_port, dest_sw)
            }
            SwitchEvent::InterDomainLinkDelete { src_sw, src_port, dest_sw } => {
                self.inter_domain_link_delete(src_sw, src_port, dest_sw)
            }
            SwitchEvent::PortUp { dpid, desc } => self.save_port_speed(dpid, desc),
            SwitchEvent::PortDesc { dpid, entries } => {
                for desc in entries {
                    self.save_port_speed(dpid, desc);
                }
            }
            SwitchEvent::FlowStats { dpid, entries } => {
                self.process_flow_stats(dpid, entries);
            }
            SwitchEvent::PortStats { .. } => {
                // handled by the runtime via process_port_stats so the TE
                // congestion check can interpose
                warn!("PortStats must be fed through process_port_stats");
            }
            SwitchEvent::GroupDesc { dpid, entries } => self.process_group_desc(dpid, entries),
            SwitchEvent::RoleReply { dpid, role, generation_id } => {
                self.role_reply(dpid, role, generation_id)
            }
            SwitchEvent::PacketInVlan { dpid, in_port, vid } => {
                self.ingress_changed(vid, dpid, in_port)
            }
        }
    }

    // ------------------------- topology events -------------------------

    fn switch_enter(&mut self, dpid: Dpid) {
        info!("SW {} has entered the topology", dpid);
        self.switches.send(dpid, SwitchOp::PortDescRequest);
        if self.role != CtrlRole::Unknown {
            let role = match self.role {
                CtrlRole::Master => Role::Master,
                CtrlRole::Slave => Role::Slave,
                CtrlRole::Unknown => Role::NoChange,
            };
            self.send_role(dpid, role);
            self.switches.send(dpid, SwitchOp::Barrier);
        }
    }

    fn send_role(&mut self, dpid: Dpid, role: Role) {
        self.generation_id += 1;
        self.switches.send(dpid, SwitchOp::RoleRequest { role, generation_id: self.generation_id });
    }

    fn link_add(&mut self, src_sw: Dpid, dst_sw: Dpid, src_port: PortNo, dst_port: PortNo) {
        info!("Link added {}({}) to {}({})", src_sw, src_port, dst_sw, dst_port);
        let a = NodeId::Switch(src_sw);
        let b = NodeId::Switch(dst_sw);
        let mut modified = false;
        if self.graph.add_link(&a, &b, src_port, dst_port).unwrap_or(false) {
            modified = true;
        }
        if self.graph.add_link(&b, &a, dst_port, src_port).unwrap_or(false) {
            modified = true;
        }
        if modified {
            self.topo_changed();
        }
    }

    fn link_delete(&mut self, src_sw: Dpid, dst_sw: Dpid, src_port: PortNo, dst_port: PortNo) {
        info!("Link del {}({}) to {}({})", src_sw, src_port, dst_sw, dst_port);
        let a = NodeId::Switch(src_sw);
        let b = NodeId::Switch(dst_sw);
        let mut modified = false;
        if self.graph.remove_port(&a, &b, src_port, dst_port) {
            modified = true;
        }
        if self.graph.remove_port(&b, &a, dst_port, src_port) {
            modified = true;
        }

        if !self.cfg.optimise_protection {
            // protection stays on whatever failover state the groups provide
            return;
        }
        if modified {
            self.topo_changed();
        }
    }

    fn host_add(&mut self, name: String, sw: Dpid, port: PortNo, addr: std::net::Ipv4Addr, eth: String) {
        info!("Host link added {} to {}({})", name, sw, port);
        let host = NodeId::Host(name.clone());
        let swn = NodeId::Switch(sw);
        let mut modified = false;
        if self.graph.add_link(&host, &swn, HOST_PORT, port).unwrap_or(false) {
            modified = true;
        }
        if self.graph.add_link(&swn, &host, port, HOST_PORT).unwrap_or(false) {
            modified = true;
        }

        debug!("Host address is IP: {}, ETH: {}", addr, eth);
        self.graph.update_port_info(
            &host,
            HOST_PORT,
            PortUpdate { addr: Some(addr), eth: Some(eth), ..Default::default() },
        );

        if !self.hosts.contains(&name) {
            self.hosts.push(name);
        }
        if modified {
            self.topo_changed();
        }
    }

    fn host_delete(&mut self, sw: Dpid, port: PortNo) {
        info!("Host link deleted on {}({})", sw, port);
        if let Some(NodeId::Host(name)) = self.graph.remove_host_link(&NodeId::Switch(sw), port) {
            self.hosts.retain(|h| *h != name);
            self.topo_changed();
        }
    }

    fn save_port_speed(&mut self, dpid: Dpid, desc: crate::switch::PortDescEntry) {
        // reported in kbit/s; links claiming 10G or more are test-bench
        // links that misreport, clamp them to 1G
        let mut speed = desc.curr_speed * 1000;
        if speed >= 10_000_000_000 {
            speed = 1_000_000_000;
        }
        self.graph.update_port_info(
            &NodeId::Switch(dpid),
            desc.port,
            PortUpdate { speed: Some(speed), ..Default::default() },
        );
    }

    /// A topology mutation occurred: ask the runtime to (re)arm the
    /// 2-second debounce that consolidates recomputation.
    pub fn topo_changed(&mut self) {
        self.topo_dirty = true;
    }

    // ---------------------- inter-domain links ----------------------

    fn inter_domain_link_add(&mut self, src_sw: Dpid, src_port: PortNo, dest_sw: Dpid) {
        info!("Inter domain link added {}({}) to {}", src_sw, src_port, dest_sw);
        let key = (src_sw, src_port, dest_sw);
        if self.unknown_links.contains_key(&key) {
            return;
        }
        self.unknown_links.insert(key, UnknownLink::Unresolved { standown: 0 });

        if !self.is_master() {
            info!("Controller is not master, suppress unknown link");
            return;
        }

        let speed = match self.graph.get_port_info(&NodeId::Switch(src_sw), src_port) {
            Some(info) => info.speed,
            None => return,
        };
        self.outbox.push(LcToRoot::UnknownSw {
            cid: self.cid,
            sw: src_sw,
            port: src_port,
            dest_sw,
            speed,
        });
    }

    fn inter_domain_link_delete(&mut self, src_sw: Dpid, src_port: PortNo, dest_sw: Dpid) {
        info!("Inter domain link deleted {}({}) to {}", src_sw, src_port, dest_sw);
        if !self.unknown_links.contains_key(&(src_sw, src_port, dest_sw)) {
            return;
        }
        self.outbox.push(LcToRoot::DeadPort { cid: self.cid, sw: src_sw, port: src_port });
    }

    /// One tick of the 1-second unknown-link resolution loop: links past
    /// their standown period re-ask the root for the owning controller.
    /// Returns true while unresolved links remain (the runtime re-arms).
    pub fn unknown_links_tick(&mut self) -> bool {
        let mut in_progress = false;
        let keys: Vec<(Dpid, PortNo, Dpid)> = self.unknown_links.keys().cloned().collect();
        for key in keys {
            let standown = match self.unknown_links.get(&key) {
                Some(UnknownLink::Unresolved { standown }) => *standown,
                _ => continue,
            };
            in_progress = true;
            if standown < 10 {
                self.unknown_links
                    .insert(key, UnknownLink::Unresolved { standown: standown + 1 });
                continue;
            }
            self.unknown_links.insert(key, UnknownLink::Unresolved { standown: 0 });

            let (src_sw, src_port, dest_sw) = key;
            let speed = match self.graph.get_port_info(&NodeId::Switch(src_sw), src_port) {
                Some(info) => info.speed,
                None => {
                    error!("Inter-domain link {} {} has no speed!", src_sw, src_port);
                    continue;
                }
            };
            self.outbox.push(LcToRoot::UnknownSw {
                cid: self.cid,
                sw: src_sw,
                port: src_port,
                dest_sw,
                speed,
            });
        }
        in_progress
    }

    /// Record the root's answer to an unknown-switch resolution request.
    pub fn resolve_unknown_link(&mut self, sw: Dpid, port: PortNo, dest_sw: Dpid, cid: Cid) {
        self.unknown_links.insert((sw, port, dest_sw), UnknownLink::Resolved { cid });
    }

    /// A peer controller died: its link resolutions are stale, fall back to
    /// asking the root again.
    pub fn ctrl_dead(&mut self, cid: Cid) {
        for value in self.unknown_links.values_mut() {
            if *value == (UnknownLink::Resolved { cid }) {
                *value = UnknownLink::Unresolved { standown: 0 };
            }
        }
    }

    /// True if `(sw, port)` is a resolved link into another domain.
    pub fn is_inter_domain_link(&self, sw: Dpid, port: PortNo) -> bool {
        self.unknown_links.iter().any(|(key, value)| {
            matches!(value, UnknownLink::Resolved { .. }) && key.0 == sw && key.1 == port
        })
    }

    /// True while any unknown link still awaits resolution.
    pub fn has_unresolved_links(&self) -> bool {
        self.unknown_links
            .values()
            .any(|v| matches!(v, UnknownLink::Unresolved { .. }))
    }

    // ------------------------- role handling -------------------------

    /// Promote the controller to master: claim every switch, start state
    /// rebuild, and force outstanding unknown links to re-resolve. The
    /// runtime restarts the stats poll timer afterwards.
    pub fn promote_master(&mut self) {
        if self.role == CtrlRole::Master {
            return;
        }
        info!("Promoting controller to master role");
        self.role = CtrlRole::Master;

        for dpid in self.switches.switches() {
            self.send_role(dpid, Role::Master);
            self.switches.send(dpid, SwitchOp::Barrier);
        }
        self.rebuild_timeout = 2;

        let mut found_unknown = false;
        for value in self.unknown_links.values_mut() {
            if matches!(value, UnknownLink::Unresolved { .. }) {
                *value = UnknownLink::Unresolved { standown: 100 };
                found_unknown = true;
            }
        }
        if found_unknown {
            self.unknown_links_tick();
        }
    }

    /// Demote the controller to slave. Must converge regardless of prior
    /// state; the runtime stops the stats poll timer.
    pub fn demote_slave(&mut self) {
        if self.role == CtrlRole::Slave {
            return;
        }
        info!("Demoting controller to slave role");
        self.role = CtrlRole::Slave;
        for dpid in self.switches.switches() {
            self.send_role(dpid, Role::Slave);
            self.switches.send(dpid, SwitchOp::Barrier);
        }
    }

    fn role_reply(&mut self, dpid: Dpid, role: Role, generation_id: u64) {
        info!("Role reply received: role={:?} gen_id={} dpid={}", role, generation_id, dpid);
        if role == Role::Master {
            self.request_sw_state(dpid);
        }
    }

    /// Emit the flow- and port-stats requests of one poll interval.
    pub fn request_stats(&mut self) {
        info!("Sending stats request to connected switches");
        for dpid in self.switches.switches() {
            self.switches.send(dpid, SwitchOp::FlowStatsRequest);
            self.switches.send(dpid, SwitchOp::PortStatsRequest);
            debug!("Requested stats from switch with DPID {}", dpid);
        }
    }

    /// Clear the flow, group and meter tables of a switch and re-install the
    /// LLDP discovery rule behind a barrier, so the wildcard delete cannot
    /// overtake it.
    pub fn clear_rules(&mut self, dpid: Dpid) {
        info!("Removing flows, groups and meters of switch {}", dpid);
        self.switches.send(
            dpid,
            SwitchOp::FlowDel { table_id: None, match_: None, out_port: None, out_group: None },
        );
        self.switches.send(dpid, SwitchOp::GroupDel { gid: None });
        self.switches.send(dpid, SwitchOp::MeterDel { mid: None });
        self.switches.send(dpid, SwitchOp::Barrier);

        let (match_, actions, priority) = rules::lldp_discovery();
        self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
        self.topo_changed();
    }

    // ------------------------- root reporting -------------------------

    /// Publish the current domain topology to the root controller.
    pub fn send_topo(&mut self) {
        let mut hosts = Vec::new();
        for name in &self.hosts {
            let node = NodeId::Host(name.clone());
            if let Some(info) = self.graph.get_port_info(&node, HOST_PORT) {
                if let (Some(addr), Some(eth)) = (info.addr, info.eth.clone()) {
                    hosts.push(HostRec { name: name.clone(), eth, addr });
                }
            }
        }

        let switches: Vec<Dpid> =
            self.graph.switches().iter().filter_map(|n| n.switch()).collect();

        let mut unknown_links = Vec::new();
        for ((sw, port, dest_sw), value) in &self.unknown_links {
            let speed = self
                .graph
                .get_port_info(&NodeId::Switch(*sw), *port)
                .map(|i| i.speed)
                .unwrap_or(0);
            let cid = match value {
                UnknownLink::Resolved { cid } => Some(*cid),
                UnknownLink::Unresolved { .. } => None,
            };
            unknown_links.push(UnknownLinkRec { sw: *sw, port: *port, dest_sw: *dest_sw, speed, cid });
        }

        let paths: Vec<(PairKey, Vec<Instruction>)> =
            self.inter_dom_paths.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        self.outbox.push(LcToRoot::Topo {
            cid: self.cid,
            hosts,
            switches,
            unknown_links,
            te_thresh: self.cfg.te_thresh,
            paths,
        });
    }

    /// Announce this controller to the root.
    pub fn send_discover(&mut self) {
        self.outbox
            .push(LcToRoot::Discover { cid: self.cid, te_thresh: self.cfg.te_thresh });
    }
}
