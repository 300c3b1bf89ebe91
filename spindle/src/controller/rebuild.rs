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

//! State rebuild after promotion to master.
//!
//! The new master re-requests every switch's flow and group descriptions
//! and reconstructs its per-pair records by pattern-matching the installed
//! rules: an ingress is an `(in_port, ipv4_dst)` match whose actions push
//! the pair's VID and hand off to its group, an egress is a VID match that
//! pops the tag, rewrites the MAC and hands off, a group is a fast-failover
//! bucket list. A two-tick deadline bounds the rebuild; switches that do
//! not answer in time are skipped and repopulated by the next
//! topology-change cycle.

use super::{ProtectionController, RebuildPending};
use crate::error::StateError;
use crate::path_info::{Endpoint, PathInfo};
use crate::switch::{Action, FlowEntry, GroupDescEntry, Instr, SwitchCtl, SwitchOp};
use crate::topo::{Dpid, NodeId};
use log::*;

impl<S: SwitchCtl> ProtectionController<S> {
    /// True while a state rebuild is running.
    pub fn rebuild_in_progress(&self) -> bool {
        self.rebuild_timeout != 0
    }

    /// Consume one tick of the rebuild deadline. When it runs out, partial
    /// state is discarded; the next topology-change cycle repopulates it.
    pub fn rebuild_state_tick(&mut self) {
        if self.rebuild_timeout == 0 {
            return;
        }
        self.rebuild_timeout -= 1;
        info!("Rebuild state tick {}", self.rebuild_timeout);
        if self.rebuild_timeout == 0 {
            let outstanding = self.rebuild_sw.len();
            if outstanding > 0 {
                warn!("{}", StateError::StateRebuildTimeout(outstanding));
            } else {
                info!("Rebuild state timed out");
            }
            self.rebuild_sw.clear();
        }
    }

    /// Ask a switch for the flow and group state needed to rebuild the
    /// controller's view of it.
    pub fn request_sw_state(&mut self, dpid: Dpid) {
        info!("Requesting state of DPID: {}", dpid);
        if self.rebuild_sw.contains_key(&dpid) {
            info!("Already waiting for state of sw {}", dpid);
            return;
        }
        self.rebuild_sw.insert(dpid, RebuildPending { flow: false, group: false });
        self.rebuild_timeout = 2;
        self.switches.send(dpid, SwitchOp::FlowStatsRequest);
        self.switches.send(dpid, SwitchOp::GroupDescRequest);
    }

    pub(crate) fn proc_sw_state(&mut self, dpid: Dpid, kind: &str) {
        if let Some(pending) = self.rebuild_sw.get_mut(&dpid) {
            match kind {
                "flow" => pending.flow = true,
                "gp" => pending.group = true,
                _ => {}
            }
            if pending.flow && pending.group {
                self.rebuild_sw.remove(&dpid);
            }
            if self.rebuild_sw.is_empty() {
                self.rebuild_timeout = 0;
            }
        }
    }

    /// Reconstruct per-pair state from the flow rules of one switch.
    pub fn process_flow_desc(&mut self, dpid: Dpid, entries: &[FlowEntry]) {
        for flow in entries {
            if flow.table_id != 0 {
                continue;
            }

            let actions: Option<&Vec<Action>> = flow.instructions.iter().find_map(|inst| match inst {
                Instr::Apply(actions) => Some(actions),
                _ => None,
            });
            let goes_to_detector =
                flow.instructions.iter().any(|inst| matches!(inst, Instr::GotoTable(1)));

            if flow.match_.vlan.is_some() && flow.match_.in_port.is_some() && goes_to_detector {
                // an ingress-change detection rule
                let gid = flow.match_.vlan.expect("checked above");
                if let Some(hosts) = self.gid_map.reverse(gid, self.cfg.gid_hosts) {
                    let entry =
                        self.paths.entry(hosts).or_insert_with(|| PathInfo::skeleton(gid));
                    let key = (dpid, flow.match_.in_port.expect("checked above"));
                    if !entry.ingress_change_detect.contains(&key) {
                        entry.ingress_change_detect.push(key);
                    }
                }
                continue;
            }

            if flow.match_.vlan.is_some() && flow.match_.in_port.is_some() {
                // a splice mid-node special flow
                let gid = flow.match_.vlan.expect("checked above");
                if let Some([Action::Output(out_port)]) = actions.map(|a| a.as_slice()) {
                    if let Some(hosts) = self.gid_map.reverse(gid, self.cfg.gid_hosts) {
                        let entry =
                            self.paths.entry(hosts).or_insert_with(|| PathInfo::skeleton(gid));
                        let flows =
                            entry.special_flows.entry(NodeId::Switch(dpid)).or_default();
                        let pair = (flow.match_.in_port.expect("checked above"), *out_port);
                        if !flows.contains(&pair) {
                            flows.push(pair);
                        }
                    }
                }
                continue;
            }

            if flow.match_.vlan.is_some() {
                // egress: pop the tag, rewrite the MAC, hand to the group
                if let Some(actions) = actions {
                    if actions.len() >= 2
                        && actions[0] == Action::PopVlan
                        && matches!(actions.last(), Some(Action::Group(_)))
                    {
                        let gid = match actions.last() {
                            Some(Action::Group(gid)) => *gid,
                            _ => continue,
                        };
                        let hosts = match self.gid_map.reverse(gid, self.cfg.gid_hosts) {
                            Some(hosts) => hosts,
                            None => {
                                error!("Could not find host pair for GID {}", gid);
                                continue;
                            }
                        };
                        let entry =
                            self.paths.entry(hosts).or_insert_with(|| PathInfo::skeleton(gid));
                        entry.egress = Some(Endpoint::Local(dpid));
                        if let Some(group) = entry.groups.get(&NodeId::Switch(dpid)) {
                            entry.out_port = group.first().copied();
                        }
                    }
                }
            } else if flow.match_.in_port.is_some() && flow.match_.ipv4_dst.is_some() {
                // ingress: push the tag, hand to the group
                if let Some(actions) = actions {
                    if let [Action::PushVlan(_), Action::Group(gid)] = actions.as_slice() {
                        let hosts = match self.gid_map.reverse(*gid, self.cfg.gid_hosts) {
                            Some(hosts) => hosts,
                            None => {
                                error!("Could not find host pair for GID {}", gid);
                                continue;
                            }
                        };
                        let entry =
                            self.paths.entry(hosts).or_insert_with(|| PathInfo::skeleton(*gid));
                        entry.ingress = Some(Endpoint::Local(dpid));
                        entry.in_port = flow.match_.in_port;
                        entry.address = flow.match_.ipv4_dst;
                    }
                }
            }
        }

        info!("Rebuild SW flow state of DPID {}", dpid);
        self.proc_sw_state(dpid, "flow");
    }

    /// Reconstruct group tables from the group descriptions of one switch.
    pub fn process_group_desc(&mut self, dpid: Dpid, entries: Vec<GroupDescEntry>) {
        for group in entries {
            if !group.fast_failover {
                continue;
            }
            let hosts = match self.gid_map.reverse(group.gid, self.cfg.gid_hosts) {
                Some(hosts) => hosts,
                None => {
                    error!("Could not find host pair for GID {}", group.gid);
                    continue;
                }
            };

            let mut ports = Vec::new();
            for bucket in &group.buckets {
                if bucket.actions.len() != 1
                    || bucket.actions[0] != Action::Output(bucket.watch_port)
                {
                    error!("Incorrect group entry for GID {}, skipping", group.gid);
                    continue;
                }
                ports.push(bucket.watch_port);
            }

            info!("DPID: {} GID: {} {:?} | PORTS: {:?}", dpid, group.gid, hosts, ports);
            let entry = self.paths.entry(hosts).or_insert_with(|| PathInfo::skeleton(group.gid));
            let key = NodeId::Switch(dpid);
            if entry.groups.get(&key) != Some(&ports) {
                entry.groups.insert(key, ports.clone());
                if entry.egress == Some(Endpoint::Local(dpid)) {
                    entry.out_port = ports.first().copied();
                }
            }
        }

        info!("Rebuild SW group state of DPID {}", dpid);
        self.proc_sw_state(dpid, "gp");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::ProtectCfg;
    use crate::path_info::PairKey;
    use crate::switch::{rules, Bucket, Match, RecordingSwitch};

    fn ctrl() -> ProtectionController<RecordingSwitch> {
        ProtectionController::new(1, ProtectCfg::default(), RecordingSwitch::with_switches(vec![1, 2]))
    }

    fn flow_entry(op: SwitchOp) -> FlowEntry {
        match op {
            SwitchOp::FlowAdd { table_id, match_, instructions, .. } => FlowEntry {
                table_id,
                match_,
                instructions,
                packet_count: 0,
                byte_count: 0,
                duration_sec: 0,
            },
            _ => panic!("not a flow add"),
        }
    }

    /// Serialising a path through the recovery format and parsing it back
    /// yields field equality on everything the state rebuild recovers.
    #[test]
    fn test_state_recovery_round_trip() {
        let key: PairKey = ("h1".to_string(), "h2".to_string());
        let gid = 1;

        let mut original = PathInfo::skeleton(gid);
        original.ingress = Some(Endpoint::Local(1));
        original.egress = Some(Endpoint::Local(2));
        original.in_port = Some(1);
        original.out_port = Some(3);
        original.address = Some("10.0.0.2".parse().unwrap());
        original.groups.insert(NodeId::Switch(1), vec![2, 3]);
        original.groups.insert(NodeId::Switch(2), vec![3, 1]);
        original.special_flows.insert(NodeId::Switch(2), vec![(4, 5)]);
        original.ingress_change_detect.push((2, 7));

        // render the installed state of both switches
        let (im, ia, ip) = rules::ingress(gid, 1, original.address);
        let ingress_rule = flow_entry(rules::flow_add(0, ip, im, ia, vec![]));
        let (em, ea, ep) = rules::egress(gid, Some("00:00:00:00:00:02"));
        let egress_rule = flow_entry(rules::flow_add(0, ep, em, ea, vec![]));
        let (sm, sa, sp) = rules::special_flow(gid, 4, 5);
        let special_rule = flow_entry(rules::flow_add(0, sp, sm, sa, vec![]));
        let detect_rule = flow_entry(rules::ingress_change_table0(gid, 7, false, None));

        let group = |ports: &[i32]| GroupDescEntry {
            gid,
            fast_failover: true,
            buckets: ports
                .iter()
                .map(|p| Bucket { watch_port: *p, actions: vec![Action::Output(*p)] })
                .collect(),
        };

        let mut rebuilt = ctrl();
        // groups first so the egress parse can recover the out port
        rebuilt.process_group_desc(1, vec![group(&[2, 3])]);
        rebuilt.process_group_desc(2, vec![group(&[3, 1])]);
        rebuilt.process_flow_desc(1, &[ingress_rule]);
        rebuilt.process_flow_desc(2, &[egress_rule, special_rule, detect_rule]);

        let recovered = rebuilt.paths().get(&key).expect("pair recovered");
        assert_eq!(recovered.gid, original.gid);
        assert_eq!(recovered.ingress, original.ingress);
        assert_eq!(recovered.egress, original.egress);
        assert_eq!(recovered.in_port, original.in_port);
        assert_eq!(recovered.out_port, original.out_port);
        assert_eq!(recovered.address, original.address);
        assert_eq!(recovered.groups, original.groups);
        assert_eq!(recovered.special_flows, original.special_flows);
        assert_eq!(recovered.ingress_change_detect, original.ingress_change_detect);
    }

    #[test]
    fn test_rebuild_completion_clears_deadline() {
        let mut c = ctrl();
        c.request_sw_state(1);
        assert!(c.rebuild_in_progress());
        c.process_flow_desc(1, &[]);
        assert!(c.rebuild_in_progress());
        c.process_group_desc(1, vec![]);
        assert!(!c.rebuild_in_progress());
    }

    #[test]
    fn test_rebuild_deadline_discards_partial_state() {
        let mut c = ctrl();
        c.request_sw_state(1);
        c.request_sw_state(2);
        c.process_flow_desc(1, &[]);
        c.rebuild_state_tick();
        assert!(c.rebuild_in_progress());
        c.rebuild_state_tick();
        assert!(!c.rebuild_in_progress());
        // a late reply does not resurrect the rebuild
        c.process_group_desc(1, vec![]);
        assert!(!c.rebuild_in_progress());
    }

    #[test]
    fn test_malformed_group_bucket_skipped() {
        let mut c = ctrl();
        let bad = GroupDescEntry {
            gid: 1,
            fast_failover: true,
            buckets: vec![
                Bucket { watch_port: 2, actions: vec![Action::Output(9)] },
                Bucket { watch_port: 3, actions: vec![Action::Output(3)] },
            ],
        };
        c.process_group_desc(1, vec![bad]);
        let key: PairKey = ("h1".to_string(), "h2".to_string());
        assert_eq!(
            c.paths().get(&key).unwrap().groups.get(&NodeId::Switch(1)),
            Some(&vec![3])
        );
    }

    #[test]
    fn test_non_protection_rules_ignored() {
        let mut c = ctrl();
        let (lm, la, lp) = rules::lldp_discovery();
        let lldp = flow_entry(rules::flow_add(0, lp, lm, la, vec![]));
        let arp = {
            let (m, a, p) = rules::arp_fix();
            flow_entry(rules::flow_add(0, p, m, a, vec![]))
        };
        let other_table = FlowEntry {
            table_id: 1,
            match_: Match { vlan: Some(1), ..Default::default() },
            instructions: vec![],
            packet_count: 0,
            byte_count: 0,
            duration_sec: 0,
        };
        c.process_flow_desc(1, &[lldp, arp, other_table]);
        assert!(c.paths().is_empty());
    }
}
