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

//! Human-readable rendering of controller state: per-path statistics
//! tables, port counters and the root controller's state dumps. Large
//! numbers are shortened with SI prefixes.

use crate::path_info::PathStore;
use crate::proto::Instruction;
use crate::topo::{Cid, NodeId, Topology};
use std::collections::BTreeMap;

/// Shorten a number with an SI prefix (k through Y, steps of 1000), keeping
/// one decimal place.
pub fn hum_read(value: u64) -> String {
    const PREFIXES: [&str; 8] = ["k", "M", "G", "T", "P", "E", "Z", "Y"];

    let mut index: i32 = -1;
    let mut check: u128 = 1000;
    while value as u128 >= check {
        index += 1;
        check *= 1000;
    }
    if index < 0 {
        return value.to_string();
    }
    let divisor = (check / 1000) as f64;
    let adjusted = value as f64 / divisor;
    format!("{:.1}{}", (adjusted * 10.0).floor() / 10.0, PREFIXES[index as usize])
}

/// Render the per-path statistics table of a path store.
pub fn render_path_stats(paths: &PathStore) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:^24} {:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Path(src, dst)", "gid", "pkt", "bt", "t_pkt", "t_bt", "time", "pkt/s", "bt/s"
    ));
    for (key, info) in paths {
        let (pkts, bytes, t_pkts, t_bytes, time, pps, bps) = match &info.stats {
            Some(s) => (
                hum_read(s.pkts),
                hum_read(s.bytes),
                hum_read(s.total_pkts),
                hum_read(s.total_bytes),
                hum_read(s.total_time),
                format!("{:.1}", s.pkts_persec),
                format!("{:.1}", s.bytes_persec),
            ),
            None => (
                "na".into(),
                "na".into(),
                "na".into(),
                "na".into(),
                "na".into(),
                "na".into(),
                "na".into(),
            ),
        };
        out.push_str(&format!(
            "{:^24} {:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
            format!("({}, {})", key.0, key.1),
            info.gid,
            pkts,
            bytes,
            t_pkts,
            t_bytes,
            time,
            pps,
            bps,
        ));
    }
    out
}

/// Render the per-port counters of every switch in a topology.
pub fn render_port_stats(graph: &Topology) -> String {
    let mut out = String::new();
    for node in graph.node_ids() {
        if node.is_host() {
            continue;
        }
        out.push_str(&format!("{}:\n", node));
        for (port, info) in graph.ports_of(&node) {
            out.push_str(&format!("  + PORT: {}, SPEED: {}b\n", port, hum_read(info.speed)));
            if let Some(poll) = &info.poll {
                out.push_str(&format!(
                    "  |   tx_packets: {}, tx_bytes: {}B, tx_errors: {}\n",
                    hum_read(poll.tx_packets),
                    hum_read(poll.tx_bytes),
                    hum_read(poll.tx_errors)
                ));
                if let Some(rate) = poll.tx_rate {
                    out.push_str(&format!("  |   tx_rate: {}\n", rate));
                }
            }
            if let Some(total) = &info.total {
                out.push_str(&format!(
                    "  |   TOTAL tx_packets: {}, tx_bytes: {}B, tx_errors: {}\n",
                    hum_read(total.tx_packets),
                    hum_read(total.tx_bytes),
                    hum_read(total.tx_errors)
                ));
            }
        }
    }
    out
}

/// Render the root controller's emission record.
pub fn render_old_send(
    old_send: &BTreeMap<Cid, BTreeMap<(String, String), Vec<Instruction>>>,
) -> String {
    let mut out = String::new();
    for (cid, pairs) in old_send {
        out.push_str(&format!("cid {}:\n", cid));
        for (hkey, instructions) in pairs {
            out.push_str(&format!("  ({}, {}):\n", hkey.0, hkey.1));
            for instruction in instructions {
                out.push_str(&format!("    {:?}\n", instruction));
            }
        }
    }
    out
}

/// Render the root controller's stored node paths.
pub fn render_old_paths(
    old_paths: &BTreeMap<(String, String), Vec<(Vec<NodeId>, Vec<crate::topo::Hop>)>>,
) -> String {
    let mut out = String::new();
    for (hkey, paths) in old_paths {
        out.push_str(&format!("({}, {}):\n", hkey.0, hkey.1));
        for (rank, (path, ports)) in paths.iter().enumerate() {
            let label = if rank == 0 { "primary" } else { "secondary" };
            let nodes: Vec<String> = path.iter().map(|n| n.to_string()).collect();
            out.push_str(&format!("  {}: {}\n", label, nodes.join(" -> ")));
            for hop in ports {
                out.push_str(&format!("    {} in {} out {}\n", hop.node, hop.in_port, hop.out_port));
            }
        }
    }
    out
}

/// Render a topology's ports for the graph dump.
pub fn render_graph(graph: &Topology) -> String {
    let mut out = String::new();
    for (node, port) in graph.port_keys() {
        if let Some(info) = graph.get_port_info(&node, port) {
            match &info.dest {
                Some((dest, dest_port)) => out.push_str(&format!(
                    "{} ({}) -> {} ({}) cost {} speed {}\n",
                    node, port, dest, dest_port, info.cost, info.speed
                )),
                None => out.push_str(&format!("{} ({}) -> ?\n", node, port)),
            }
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hum_read() {
        assert_eq!(hum_read(999), "999");
        assert_eq!(hum_read(1000), "1.0k");
        assert_eq!(hum_read(1_500_000), "1.5M");
        assert_eq!(hum_read(1_000_000_000), "1.0G");
    }
}
