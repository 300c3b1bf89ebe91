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

//! Path computation, installation and the diff engine.

use self::RecomputeOutcome::*;
use super::ProtectionController;
use itertools::Itertools;
use crate::path_info::{Endpoint, GroupTable, PairKey, PathInfo, SpecialFlows};
use crate::protect::{build_plan, Plan};
use crate::switch::{rules, SwitchCtl, SwitchOp};
use crate::topo::{Dpid, NodeId, PortNo, Topology, HOST_PORT};
use log::*;
use std::net::Ipv4Addr;

/// Result of a debounced path recomputation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// A state rebuild is still running; the caller must tick the rebuild
    /// deadline and re-arm the debounce timer.
    RebuildInProgress,
    /// The controller is not master and computes nothing.
    NotMaster,
    /// Paths were recomputed and diffed.
    Done,
}

/// Merge the entries of one group or special-flow table into another,
/// skipping values already present.
pub(crate) fn combine_table<V: PartialEq + Clone>(
    target: &mut std::collections::BTreeMap<NodeId, Vec<V>>,
    combine: &std::collections::BTreeMap<NodeId, Vec<V>>,
) {
    for (sw, values) in combine {
        let entry = target.entry(sw.clone()).or_default();
        for value in values {
            if !entry.contains(value) {
                entry.push(value.clone());
            }
        }
    }
}

fn group_different(old_gp: &[PortNo], new_gp: &[PortNo]) -> (bool, bool) {
    (old_gp != new_gp, !old_gp.is_empty())
}

fn endpoint_is(endpoint: &Option<Endpoint>, sw: &NodeId) -> bool {
    match (endpoint, sw) {
        (Some(Endpoint::Local(dpid)), NodeId::Switch(s)) => dpid == s,
        _ => false,
    }
}

impl<S: SwitchCtl> ProtectionController<S> {
    /// Recompute and install protection paths for every local host pair.
    /// Called by the runtime when the topology debounce timer expires.
    pub fn recompute_paths(&mut self) -> RecomputeOutcome {
        if self.rebuild_in_progress() {
            info!("State rebuild in progress, resetting timer!");
            self.rebuild_state_tick();
            return RebuildInProgress;
        }
        if !self.is_master() {
            info!("Controller is not a master, do not compute anything");
            return NotMaster;
        }

        self.send_topo();
        info!("----------COMPUTING PATHS----------");

        if self.hosts.len() < 2 && !self.paths.is_empty() {
            info!("No longer have host pairs, removing old paths");
            let keys: Vec<PairKey> = self
                .paths
                .iter()
                .filter(|(_, info)| {
                    // inter-domain segments stay: the root withdraws them
                    info.ingress.as_ref().map_or(false, |e| !e.is_boundary())
                        && info.egress.as_ref().map_or(false, |e| !e.is_boundary())
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                self.uninstall_pair(&key);
            }
            return Done;
        }

        let hosts = self.hosts.clone();
        for (host_1, host_2) in hosts.iter().cartesian_product(hosts.iter()) {
            if host_1 == host_2 {
                continue;
            }
            let mut graph = self.graph.clone();
            let dest = NodeId::Host(host_2.clone());
            let (addr, eth) = match self.graph.get_port_info(&dest, HOST_PORT) {
                Some(info) => (info.addr, info.eth.clone()),
                None => (None, None),
            };
            self.compute_and_install(
                &mut graph,
                &NodeId::Host(host_1.clone()),
                &dest,
                addr,
                eth,
                None,
                None,
                (host_1.clone(), host_2.clone()),
                GroupTable::new(),
                SpecialFlows::new(),
            );
        }
        Done
    }

    /// Compute a plan for one pair on a working graph copy and install it
    /// through the diff engine.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compute_and_install(
        &mut self,
        graph: &mut Topology,
        src: &NodeId,
        dest: &NodeId,
        dest_addr: Option<Ipv4Addr>,
        dest_eth: Option<String>,
        inp: Option<Endpoint>,
        outp: Option<Endpoint>,
        key: PairKey,
        combine_gp: GroupTable,
        combine_sf: SpecialFlows,
    ) {
        let gid = self.get_gid(&key);
        let src_is_host = matches!(src, NodeId::Host(n) if self.hosts.contains(n));
        let dest_is_host = matches!(dest, NodeId::Host(n) if self.hosts.contains(n));
        let plan = build_plan(
            graph,
            None,
            src,
            dest,
            inp,
            outp,
            gid,
            src_is_host,
            dest_is_host,
            self.cfg.loose_splice,
        )
        .map(|mut plan| {
            plan.info.address = dest_addr;
            plan.info.eth = dest_eth;
            plan
        });
        self.install_path_dict(key, plan, combine_gp, combine_sf);
    }

    /// Withdraw everything installed for a pair.
    pub fn uninstall_pair(&mut self, key: &PairKey) {
        self.install_path_dict(key.clone(), None, GroupTable::new(), SpecialFlows::new());
    }

    /// Install a computed plan for a pair, merging in precomputed group and
    /// special-flow entries (inter-domain backup segments), diffing against
    /// the installed state, and re-issuing the ingress/egress rules where
    /// the respective endpoint is local. An empty plan withdraws the pair.
    pub fn install_path_dict(
        &mut self,
        key: PairKey,
        plan: Option<Plan>,
        combine_gp: GroupTable,
        combine_sf: SpecialFlows,
    ) {
        let plan = match plan {
            Some(plan) => plan,
            None => {
                info!("Empty secondary or primary path, skipping path install");
                if let Some(old) = self.paths.get(&key).cloned() {
                    self.proc_path_diff(Some(&old), None);
                    info!("Removed old flow rules for path that no longer exists");
                    self.paths.remove(&key);
                }
                info!("-----------------------------------");
                return;
            }
        };

        let Plan { mut info, primary, .. } = plan;
        combine_table(&mut info.groups, &combine_gp);
        combine_table(&mut info.special_flows, &combine_sf);
        info!("Dest IP: {:?}", info.address);
        info!("Dest MAC: {:?}", info.eth);
        info!("Installing GP: {:?}", info.groups);
        info!("Installing Special Flows: {:?}", info.special_flows);

        let old = self.paths.get(&key).cloned();
        let (install_ingress, install_egress) = self.proc_path_diff(old.as_ref(), Some(&info));

        let src_local = self.hosts.contains(&key.0);
        let dest_local = self.hosts.contains(&key.1);

        if src_local && dest_local && primary.len() == 3 {
            // both hosts share one switch: a single rewrite rule, no VLAN
            // tagging, no groups
            if let (Some(endpoint), Some(in_port), Some(out_port)) =
                (info.ingress.clone(), info.in_port, info.out_port)
            {
                let dpid = endpoint.dpid();
                if !self.switches.connected(dpid) {
                    error!("Can't find SW {} to install ingress rules", dpid);
                } else {
                    let (match_, actions, priority) =
                        rules::same_switch(info.address, info.eth.as_deref(), in_port, out_port);
                    self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
                    self.install_arp_fix(dpid);
                    info.groups.clear();
                    self.paths.insert(key, info);
                }
            }
            info!("-----------------------------------");
            return;
        }

        if install_ingress && src_local {
            match info.ingress.clone() {
                Some(Endpoint::Local(dpid)) if self.switches.connected(dpid) => {
                    let (match_, actions, priority) =
                        rules::ingress(info.gid, info.in_port.unwrap_or(HOST_PORT), info.address);
                    self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
                    self.install_arp_fix(dpid);
                    info!("Installed ingress on sw {}", dpid);
                }
                other => {
                    error!("Can't find SW {:?}({}) to install ingress", other, info.gid);
                }
            }
        }

        if install_egress && dest_local {
            match info.egress.clone() {
                Some(Endpoint::Local(dpid)) if self.switches.connected(dpid) => {
                    let (match_, actions, priority) = rules::egress(info.gid, info.eth.as_deref());
                    self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
                    info!("Installed egress on sw {}", dpid);
                }
                other => {
                    error!("Can't find SW {:?}({}) to install egress", other, info.gid);
                }
            }
        }

        info!("-----------------------------------");
        self.paths.insert(key, info);
    }

    /// Work out the minimal set of switch edits that turns the installed
    /// state `old` into `new`, and emit them in dependency order: groups
    /// first, then the flows redirecting into them, then endpoint rules.
    ///
    /// Returns whether the ingress and egress rules must be (re)installed.
    /// The egress flag is always true: the destination MAC is not diffed, so
    /// the rule is re-issued unconditionally (documented limitation).
    pub fn proc_path_diff(
        &mut self,
        old: Option<&PathInfo>,
        new: Option<&PathInfo>,
    ) -> (bool, bool) {
        let mut install_ingress = false;
        let install_egress = true;
        let mut remove_all = false;

        // no old path: install everything unconditionally
        let old = match old {
            Some(old) => old,
            None => {
                let new = match new {
                    Some(new) => new,
                    None => return (false, false),
                };
                for sw in new.groups.keys() {
                    debug!("Installing groups on new switch {}", sw);
                    let dpid = match sw.switch() {
                        Some(dpid) => dpid,
                        None => continue,
                    };
                    if !self.switches.connected(dpid) {
                        error!("Switch disconnected, can't install groups {}", sw);
                        continue;
                    }
                    let add_flow = !endpoint_is(&new.ingress, sw) && !endpoint_is(&new.egress, sw);
                    self.install_group(sw, new, add_flow, false);
                }
                for (sw, flows) in &new.special_flows {
                    debug!("Installing special splice flow rules on switch {}", sw);
                    let dpid = match sw.switch() {
                        Some(dpid) => dpid,
                        None => continue,
                    };
                    if !self.switches.connected(dpid) {
                        error!("Switch disconnected, can't install groups {}", sw);
                        continue;
                    }
                    for (in_port, out_port) in flows {
                        let (match_, actions, priority) =
                            rules::special_flow(new.gid, *in_port, *out_port);
                        self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
                        debug!("Installed special flow rule ({}, {}) on sw {}", in_port, out_port, sw);
                    }
                }
                return (true, true);
            }
        };

        match new {
            None => {
                remove_all = true;
                install_ingress = true;
            }
            Some(new) if new.gid != old.gid => {
                remove_all = true;
                install_ingress = true;
            }
            Some(new) => {
                // ingress moved, changed port, or changed destination address
                if let Some(Endpoint::Local(old_ing)) = &old.ingress {
                    if old.ingress != new.ingress
                        || old.in_port != new.in_port
                        || old.address != new.address
                    {
                        self.delete_ingress_rule(
                            old.gid,
                            old.address,
                            old.in_port.unwrap_or(HOST_PORT),
                            *old_ing,
                        );
                        install_ingress = true;
                    }
                }
                // egress moved
                if let Some(Endpoint::Local(old_eg)) = &old.egress {
                    if old.egress != new.egress && old.ingress != old.egress {
                        self.delete_egress_rule(old.gid, *old_eg);
                    }
                }
            }
        }

        if remove_all {
            if let Some(Endpoint::Local(dpid)) = &old.ingress {
                self.delete_ingress_rule(
                    old.gid,
                    old.address,
                    old.in_port.unwrap_or(HOST_PORT),
                    *dpid,
                );
            }
            if let Some(Endpoint::Local(dpid)) = &old.egress {
                if old.ingress != old.egress {
                    self.delete_egress_rule(old.gid, *dpid);
                }
            }
        }

        let gid = old.gid;
        let empty_groups = GroupTable::new();
        let empty_special = SpecialFlows::new();
        let new_groups = new.map(|n| &n.groups).unwrap_or(&empty_groups);
        let new_special = new.map(|n| &n.special_flows).unwrap_or(&empty_special);

        // drop groups (and the flows feeding them) that no longer exist,
        // modify groups whose port order changed
        for (sw, group) in &old.groups {
            let dpid = match sw.switch() {
                Some(dpid) => dpid,
                None => continue,
            };
            if !self.switches.connected(dpid) {
                info!("Switch disconnected, can't delete rules {}", sw);
                continue;
            }

            if remove_all || new_groups.get(sw).map_or(true, |g| g.is_empty()) {
                debug!("SW {} no longer has rules, removing old rules", sw);
                if !group.is_empty() {
                    let (match_, _, _) = rules::group_redirect(gid);
                    self.switches.send(
                        dpid,
                        SwitchOp::FlowDel {
                            table_id: None,
                            match_: Some(match_),
                            out_port: None,
                            out_group: Some(gid),
                        },
                    );
                    self.switches.send(dpid, SwitchOp::GroupDel { gid: Some(gid) });
                }
                continue;
            }

            let (different, is_mod) = group_different(group, &new_groups[sw]);
            if different {
                debug!("Group changed on sw {}, reinstalling!", sw);
                let new = new.expect("new groups imply a new path");
                let add_flow = !endpoint_is(&new.ingress, sw) && !endpoint_is(&new.egress, sw);
                self.install_group(sw, new, add_flow, is_mod);
            }
        }

        // drop special flows that no longer exist
        for (sw, flows) in &old.special_flows {
            let dpid = match sw.switch() {
                Some(dpid) => dpid,
                None => continue,
            };
            if !self.switches.connected(dpid) {
                info!("Switch disconnected, can't delete rules {}", sw);
                continue;
            }

            let gone: Vec<(PortNo, PortNo)> =
                if remove_all || new_special.get(sw).map_or(true, |f| f.is_empty()) {
                    debug!("SW {} no longer has special flow rules, removing rules", sw);
                    flows.clone()
                } else {
                    flows.iter().filter(|f| !new_special[sw].contains(f)).cloned().collect()
                };
            for (in_port, out_port) in gone {
                debug!("Removing special flow rule ({}, {}) from {}", in_port, out_port, sw);
                let (match_, _, _) = rules::special_flow(gid, in_port, out_port);
                self.switches.send(
                    dpid,
                    SwitchOp::FlowDel {
                        table_id: None,
                        match_: Some(match_),
                        out_port: Some(out_port),
                        out_group: None,
                    },
                );
            }
        }

        // install groups on switches that gained them (or everything after a
        // GID change)
        if let Some(new) = new {
            for sw in new.groups.keys() {
                if remove_all || !old.groups.contains_key(sw) {
                    debug!("Installing groups on new switch {}", sw);
                    let dpid = match sw.switch() {
                        Some(dpid) => dpid,
                        None => continue,
                    };
                    if !self.switches.connected(dpid) {
                        error!("Switch disconnected, can't install groups {}", sw);
                        continue;
                    }
                    let add_flow = !endpoint_is(&new.ingress, sw) && !endpoint_is(&new.egress, sw);
                    self.install_group(sw, new, add_flow, false);
                }
            }

            for (sw, flows) in &new.special_flows {
                let dpid = match sw.switch() {
                    Some(dpid) => dpid,
                    None => continue,
                };
                for flow in flows {
                    if !self.switches.connected(dpid) {
                        error!("Switch disconnected, can't install special flows {}", sw);
                        continue;
                    }
                    if remove_all
                        || old.special_flows.get(sw).map_or(true, |f| !f.contains(flow))
                    {
                        let (match_, actions, priority) =
                            rules::special_flow(new.gid, flow.0, flow.1);
                        self.switches
                            .send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
                        debug!("Installed flow tuple rule {:?} on sw {}", flow, sw);
                    }
                }
            }
        }

        (install_ingress, install_egress)
    }

    /// Install (or modify) the fast-failover group of one switch, followed
    /// by the flow redirecting tagged traffic into it. Groups come first so
    /// the redirect never references a missing group.
    pub(crate) fn install_group(&mut self, sw: &NodeId, data: &PathInfo, add_flow: bool, modify: bool) {
        let dpid = match sw.switch() {
            Some(dpid) => dpid,
            None => return,
        };
        let ports = match data.groups.get(sw) {
            Some(ports) => ports,
            None => return,
        };
        let buckets = rules::group_buckets(ports);
        // an empty bucket list means there is no group to install
        if buckets.is_empty() {
            return;
        }
        self.switches.send(dpid, SwitchOp::GroupAdd { gid: data.gid, buckets, modify });
        if add_flow {
            let (match_, actions, priority) = rules::group_redirect(data.gid);
            self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
        }
        debug!("Installed group on sw {}", sw);
    }

    pub(crate) fn install_arp_fix(&mut self, dpid: Dpid) {
        let (match_, actions, priority) = rules::arp_fix();
        self.switches.send(dpid, rules::flow_add(0, priority, match_, actions, vec![]));
    }

    pub(crate) fn delete_ingress_rule(
        &mut self,
        gid: crate::gid::Gid,
        addr: Option<Ipv4Addr>,
        in_port: PortNo,
        dpid: Dpid,
    ) {
        if !self.switches.connected(dpid) {
            info!("Ingress disconnected, can't delete rule");
            return;
        }
        let (match_, _, _) = rules::ingress(gid, in_port, addr);
        self.switches.send(
            dpid,
            SwitchOp::FlowDel { table_id: None, match_: Some(match_), out_port: None, out_group: None },
        );
        debug!("Delete ingress rule for sw with dpid {}", dpid);
    }

    pub(crate) fn delete_egress_rule(&mut self, gid: crate::gid::Gid, dpid: Dpid) {
        if !self.switches.connected(dpid) {
            info!("Egress disconnected, can't delete rule");
            return;
        }
        let (match_, _, _) = rules::group_redirect(gid);
        self.switches.send(
            dpid,
            SwitchOp::FlowDel {
                table_id: None,
                match_: Some(match_),
                out_port: None,
                out_group: Some(gid),
            },
        );
        debug!("Delete egress rule for sw with dpid {}", dpid);
    }

    /// Promote an alternate port of a pair's group to position 0; the old
    /// active port moves to the back. Used by the TE optimizer to shift
    /// traffic without recomputing the path.
    pub fn invert_group_ports(
        &mut self,
        hkey: &PairKey,
        node: Option<(Dpid, PortNo)>,
        group_id: crate::gid::Gid,
    ) {
        let (sw, new_port) = match node {
            Some(node) => node,
            None => return,
        };
        if !self.switches.connected(sw) {
            error!("Can't find SW {} to install groups", sw);
            return;
        }

        let key = NodeId::Switch(sw);
        let group = match self.paths.get(hkey).and_then(|info| info.groups.get(&key)) {
            Some(group) if !group.is_empty() => group.clone(),
            _ => {
                error!("Pair {:?} has no group at sw {}", hkey, sw);
                return;
            }
        };
        let old_port = group[0];
        let mut rest: Vec<PortNo> = group[1..].to_vec();
        if !rest.contains(&new_port) {
            error!(
                "Can't invert group for path {:?} as new port {} not in group entry {:?}",
                hkey, new_port, rest
            );
            return;
        }
        rest.retain(|p| *p != new_port);
        let mut rebuilt = vec![new_port];
        rebuilt.extend(rest);
        rebuilt.push(old_port);

        if let Some(info) = self.paths.get_mut(hkey) {
            info.groups.insert(key, rebuilt.clone());
        }
        let buckets = rules::group_buckets(&rebuilt);
        if !buckets.is_empty() {
            self.switches.send(sw, SwitchOp::GroupAdd { gid: group_id, buckets, modify: true });
            info!(
                "Inverted GP of {:?} at {} from {} to {} (GP: {:?})",
                hkey, sw, old_port, new_port, rebuilt
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::ProtectCfg;
    use crate::switch::RecordingSwitch;

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

    fn diamond_ctrl() -> ProtectionController<RecordingSwitch> {
        let mut ctrl = ProtectionController::new(
            1,
            ProtectCfg::default(),
            RecordingSwitch::with_switches(vec![1, 2, 3, 4]),
        );
        let mut t = Topology::new();
        link(&mut t, &host("h1"), &sw(1), -1, 1);
        link(&mut t, &sw(1), &sw(2), 2, 1);
        link(&mut t, &sw(1), &sw(3), 3, 1);
        link(&mut t, &sw(2), &sw(4), 2, 1);
        link(&mut t, &sw(3), &sw(4), 2, 2);
        link(&mut t, &sw(2), &sw(3), 3, 3);
        link(&mut t, &sw(4), &host("h2"), 3, -1);
        ctrl.graph = t;
        ctrl.hosts = vec!["h1".to_string(), "h2".to_string()];
        ctrl
    }

    fn plan_for(ctrl: &ProtectionController<RecordingSwitch>, gid: crate::gid::Gid) -> Plan {
        let mut graph = ctrl.graph.clone();
        let mut plan = build_plan(
            &mut graph,
            None,
            &host("h1"),
            &host("h2"),
            None,
            None,
            gid,
            true,
            true,
            false,
        )
        .unwrap();
        plan.info.address = Some("10.0.0.2".parse().unwrap());
        plan.info.eth = Some("00:00:00:00:00:02".to_string());
        plan
    }

    #[test]
    fn test_fresh_install_orders_groups_before_flows() {
        let mut ctrl = diamond_ctrl();
        let plan = plan_for(&ctrl, 1);
        ctrl.install_path_dict(("h1".into(), "h2".into()), Some(plan), GroupTable::new(), SpecialFlows::new());
        let ops = ctrl.switches.take_ops();

        // every group-redirect flow must be preceded by its group on the
        // same switch
        for (i, (dpid, op)) in ops.iter().enumerate() {
            if let SwitchOp::FlowAdd { instructions, .. } = op {
                let redirects = instructions.iter().any(|inst| {
                    matches!(inst, crate::switch::Instr::Apply(a)
                        if a == &vec![crate::switch::Action::Group(1)])
                });
                if redirects {
                    assert!(
                        ops[..i].iter().any(|(d, o)| d == dpid
                            && matches!(o, SwitchOp::GroupAdd { .. })),
                        "redirect flow on {} before its group",
                        dpid
                    );
                }
            }
        }
        // ingress and egress rules were installed
        assert!(ops.iter().any(|(d, op)| *d == 1
            && matches!(op, SwitchOp::FlowAdd { match_, .. } if match_.in_port == Some(1))));
        assert!(ops.iter().any(|(d, op)| *d == 4
            && matches!(op, SwitchOp::FlowAdd { match_, priority, .. }
                if match_.vlan == Some(1) && *priority == 1)));
    }

    #[test]
    fn test_diff_minimality_reissues_only_egress() {
        let mut ctrl = diamond_ctrl();
        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        ctrl.switches.take_ops();

        // identical plan: the only emission is the unconditional egress rule
        ctrl.install_path_dict(key, Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        let ops = ctrl.switches.take_ops();
        assert_eq!(ops.len(), 1);
        let (dpid, op) = &ops[0];
        assert_eq!(*dpid, 4);
        assert!(matches!(op, SwitchOp::FlowAdd { match_, priority, .. }
            if match_.vlan == Some(1) && *priority == 1));
    }

    #[test]
    fn test_gid_change_withdraws_and_reinstalls() {
        let mut ctrl = diamond_ctrl();
        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        ctrl.switches.take_ops();

        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 9)), GroupTable::new(), SpecialFlows::new());
        let ops = ctrl.switches.take_ops();
        // the old groups were deleted and the new gid installed
        assert!(ops.iter().any(|(_, op)| matches!(op, SwitchOp::GroupDel { gid: Some(1) })));
        assert!(ops.iter().any(|(_, op)| matches!(op, SwitchOp::GroupAdd { gid: 9, .. })));
        // the old ingress rule was removed
        assert!(ops.iter().any(|(d, op)| *d == 1
            && matches!(op, SwitchOp::FlowDel { match_: Some(m), .. } if m.in_port == Some(1))));
        assert_eq!(ctrl.paths.get(&key).unwrap().gid, 9);
    }

    #[test]
    fn test_group_reorder_is_a_modify() {
        let mut ctrl = diamond_ctrl();
        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        ctrl.switches.take_ops();

        let mut plan = plan_for(&ctrl, 1);
        let entry = plan.info.groups.get_mut(&sw(1)).unwrap();
        entry.reverse();
        ctrl.install_path_dict(key, Some(plan), GroupTable::new(), SpecialFlows::new());
        let ops = ctrl.switches.take_ops();
        assert!(ops.iter().any(|(d, op)| *d == 1
            && matches!(op, SwitchOp::GroupAdd { modify: true, .. })));
        // no add-add: nothing re-added on unchanged switches
        assert!(!ops.iter().any(|(d, op)| *d == 2 && matches!(op, SwitchOp::GroupAdd { .. })));
    }

    #[test]
    fn test_withdraw_removes_everything() {
        let mut ctrl = diamond_ctrl();
        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        ctrl.switches.take_ops();

        ctrl.uninstall_pair(&key);
        let ops = ctrl.switches.take_ops();
        assert!(ops.iter().any(|(d, op)| *d == 1
            && matches!(op, SwitchOp::FlowDel { match_: Some(m), .. } if m.in_port == Some(1))));
        for dpid in 1..=4u64 {
            assert!(
                ops.iter().any(|(d, op)| *d == dpid
                    && matches!(op, SwitchOp::GroupDel { gid: Some(1) })),
                "group on {} must be deleted",
                dpid
            );
        }
        assert!(ctrl.paths.get(&key).is_none());
    }

    #[test]
    fn test_invert_group_ports() {
        let mut ctrl = diamond_ctrl();
        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan_for(&ctrl, 1)), GroupTable::new(), SpecialFlows::new());
        ctrl.switches.take_ops();

        ctrl.invert_group_ports(&key, Some((1, 3)), 1);
        assert_eq!(ctrl.paths.get(&key).unwrap().groups.get(&sw(1)), Some(&vec![3, 2]));
        let ops = ctrl.switches.take_ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0].1, SwitchOp::GroupAdd { gid: 1, modify: true, buckets }
            if buckets[0].watch_port == 3 && buckets[1].watch_port == 2));
    }

    #[test]
    fn test_same_switch_pair_installs_rewrite_rule() {
        let mut ctrl = ProtectionController::new(
            1,
            ProtectCfg::default(),
            RecordingSwitch::with_switches(vec![1]),
        );
        let mut t = Topology::new();
        link(&mut t, &host("h1"), &sw(1), -1, 1);
        link(&mut t, &host("h2"), &sw(1), -1, 2);
        ctrl.graph = t;
        ctrl.hosts = vec!["h1".to_string(), "h2".to_string()];

        let mut graph = ctrl.graph.clone();
        let mut plan = build_plan(
            &mut graph,
            None,
            &host("h1"),
            &host("h2"),
            None,
            None,
            1,
            true,
            true,
            false,
        )
        .unwrap();
        plan.info.eth = Some("00:00:00:00:00:02".to_string());
        let primary_len = plan.primary.len();
        assert_eq!(primary_len, 3);

        let key: PairKey = ("h1".into(), "h2".into());
        ctrl.install_path_dict(key.clone(), Some(plan), GroupTable::new(), SpecialFlows::new());
        let ops = ctrl.switches.take_ops();
        // the rewrite rule plus the ARP responder, no groups at all
        assert!(!ops.iter().any(|(_, op)| matches!(op, SwitchOp::GroupAdd { .. })));
        assert!(ops.iter().any(|(_, op)| matches!(op, SwitchOp::FlowAdd { match_, .. }
            if match_.in_port == Some(1) && match_.vlan.is_none())));
        assert!(ctrl.paths.get(&key).unwrap().groups.is_empty());
    }
}
