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

//! Absorption of flow and port statistics.

use super::{ProtectionController, UnknownLink};
use crate::path_info::{Endpoint, PathStats};
use crate::proto::LcToRoot;
use crate::switch::{rules, FlowEntry, Instr, PortStatEntry, SwitchCtl};
use crate::topo::{CounterUpdate, Dpid, NodeId, PortNo, PortUpdate};
use log::*;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One port whose transmit utilisation could be derived this poll. The
/// runtime feeds these to the TE congestion check (after consulting the
/// escalation suppression counters).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    /// The switch
    pub dpid: Dpid,
    /// The port
    pub port: PortNo,
    /// Transmit utilisation as a fraction of port speed
    pub tx_rate: f64,
}

impl<S: SwitchCtl> ProtectionController<S> {
    /// Extract per-pair counters from a flow-stats reply by locating each
    /// pair's ingress rule (or, on transit segments, the boundary redirect
    /// rule). During a state rebuild the reply doubles as the flow
    /// description source.
    pub fn process_flow_stats(&mut self, dpid: Dpid, entries: Vec<FlowEntry>) {
        debug!("FlowStats received from SW DPID:{}", dpid);
        if self.rebuild_in_progress() {
            self.process_flow_desc(dpid, &entries);
        }

        let ingress_sw: Vec<Dpid> =
            self.paths.values().filter_map(|v| v.ingress.as_ref().map(|e| e.dpid())).collect();
        let inter_dom_ingress: Vec<Dpid> = self
            .unknown_links
            .iter()
            .filter(|(_, v)| matches!(v, UnknownLink::Resolved { .. }))
            .map(|(k, _)| k.0)
            .collect();
        if !ingress_sw.contains(&dpid) && !inter_dom_ingress.contains(&dpid) {
            return;
        }

        let poll_rate = self.cfg.poll_interval;
        let mut body = entries;
        for (key, val) in self.paths.iter_mut() {
            // only ingress rules carry pair counters; same-switch shortcut
            // pairs have none
            let expected = match &val.ingress {
                Some(Endpoint::Boundary(sw, _)) if *sw == dpid => {
                    let (match_, actions, _) = rules::group_redirect(val.gid);
                    Some((match_, vec![Instr::Apply(actions)]))
                }
                Some(Endpoint::Boundary(_, _)) => None,
                Some(Endpoint::Local(sw)) if *sw == dpid && val.ingress != val.egress => {
                    let (match_, actions, _) =
                        rules::ingress(val.gid, val.in_port.unwrap_or(-1), val.address);
                    Some((match_, vec![Instr::Apply(actions)]))
                }
                _ => None,
            };
            let (ing_match, ing_inst) = match expected {
                Some(e) => e,
                None => continue,
            };

            let pos = body
                .iter()
                .position(|flow| flow.match_ == ing_match && flow.instructions == ing_inst);
            let flow = match pos {
                Some(pos) => body.remove(pos),
                None => continue,
            };
            debug!(
                "PATH stats for {:?} (PKT: {}, BYTE: {})",
                key, flow.packet_count, flow.byte_count
            );

            let stats = val.stats.get_or_insert_with(PathStats::default);
            stats.pkts = flow.packet_count.saturating_sub(stats.total_pkts);
            stats.bytes = flow.byte_count.saturating_sub(stats.total_bytes);
            stats.total_time = flow.duration_sec;
            stats.total_pkts = flow.packet_count;
            stats.total_bytes = flow.byte_count;

            if flow.duration_sec > 0 {
                stats.pkts_persec = round2(stats.pkts as f64 / poll_rate);
                stats.bytes_persec = round2(stats.bytes as f64 / poll_rate);
                stats.total_pkts_persec =
                    round2(flow.packet_count as f64 / flow.duration_sec as f64);
                stats.total_bytes_persec =
                    round2(flow.byte_count as f64 / flow.duration_sec as f64);
            }
        }
    }

    /// Fold a port-stats reply into the per-port telemetry: update the
    /// totals, derive poll deltas and utilisation ratios, and report
    /// inter-domain link traffic to the root. Returns the ports whose
    /// transmit rate is known, for the TE congestion check.
    pub fn process_port_stats(&mut self, dpid: Dpid, entries: Vec<PortStatEntry>) -> Vec<RateSample> {
        debug!("PortStats received from SW DPID:{}", dpid);
        let node = NodeId::Switch(dpid);
        let poll_rate = self.cfg.poll_interval;
        let mut samples = Vec::new();

        for p in entries {
            let info = match self.graph.get_port_info(&node, p.port) {
                Some(info) => info.clone(),
                None => continue,
            };

            if let Some(old) = &info.total {
                let rx_packets = p.rx_packets.saturating_sub(old.rx_packets);
                let rx_bytes = p.rx_bytes.saturating_sub(old.rx_bytes);
                let rx_errors = p.rx_errors.saturating_sub(old.rx_errors);
                let tx_packets = p.tx_packets.saturating_sub(old.tx_packets);
                let tx_bytes = p.tx_bytes.saturating_sub(old.tx_bytes);
                let tx_errors = p.tx_errors.saturating_sub(old.tx_errors);

                let mut rx_rate = None;
                let mut tx_rate = None;
                if info.speed != 0 {
                    // counters are bytes, speeds are bits: convert and
                    // average over the poll interval
                    let conv = 8.0 / poll_rate;
                    rx_rate = Some(round2(rx_bytes as f64 * conv / info.speed as f64));
                    tx_rate = Some(round2(tx_bytes as f64 * conv / info.speed as f64));

                    samples.push(RateSample {
                        dpid,
                        port: p.port,
                        tx_rate: tx_rate.expect("set above"),
                    });

                    if self.is_inter_domain_link(dpid, p.port) {
                        self.outbox.push(LcToRoot::LinkTraffic {
                            cid: self.cid,
                            sw: dpid,
                            port: p.port,
                            traff_bps: tx_bytes as f64 * conv,
                        });
                    }
                }

                self.graph.update_port_info(
                    &node,
                    p.port,
                    PortUpdate {
                        counters: Some(CounterUpdate {
                            rx_packets: Some(rx_packets),
                            rx_bytes: Some(rx_bytes),
                            rx_errors: Some(rx_errors),
                            tx_packets: Some(tx_packets),
                            tx_bytes: Some(tx_bytes),
                            tx_errors: Some(tx_errors),
                            rx_rate,
                            tx_rate,
                        }),
                        is_total: false,
                        ..Default::default()
                    },
                );
            }

            self.graph.update_port_info(
                &node,
                p.port,
                PortUpdate {
                    counters: Some(CounterUpdate {
                        rx_packets: Some(p.rx_packets),
                        rx_bytes: Some(p.rx_bytes),
                        rx_errors: Some(p.rx_errors),
                        tx_packets: Some(p.tx_packets),
                        tx_bytes: Some(p.tx_bytes),
                        tx_errors: Some(p.tx_errors),
                        rx_rate: None,
                        tx_rate: None,
                    }),
                    is_total: true,
                    ..Default::default()
                },
            );
        }
        samples
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::ProtectCfg;
    use crate::switch::RecordingSwitch;
    use crate::topo::Topology;

    fn stat(port: PortNo, tx_bytes: u64) -> PortStatEntry {
        PortStatEntry { port, tx_bytes, ..Default::default() }
    }

    #[test]
    fn test_port_stats_derive_rates() {
        let mut ctrl = ProtectionController::new(
            1,
            ProtectCfg { poll_interval: 10.0, ..Default::default() },
            RecordingSwitch::with_switches(vec![1, 2]),
        );
        let mut t = Topology::new();
        let s1 = NodeId::Switch(1);
        let s2 = NodeId::Switch(2);
        t.add_link(&s1, &s2, 1, 1).unwrap();
        t.add_link(&s2, &s1, 1, 1).unwrap();
        t.update_port_info(
            &s1,
            1,
            PortUpdate { speed: Some(1_000_000_000), ..Default::default() },
        );
        ctrl.graph = t;

        // first poll establishes the totals, no rate yet
        let samples = ctrl.process_port_stats(1, vec![stat(1, 1_000_000)]);
        assert!(samples.is_empty());

        // 1 GB in 10 s on a 1 Gb/s port is 80% utilisation
        let samples = ctrl.process_port_stats(1, vec![stat(1, 1_001_000_000)]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0].tx_rate - 0.8).abs() < 0.01);

        let info = ctrl.graph().get_port_info(&s1, 1).unwrap();
        assert_eq!(info.poll.as_ref().unwrap().tx_bytes, 1_000_000_000);
        assert_eq!(info.total.as_ref().unwrap().tx_bytes, 1_001_000_000);
    }
}
