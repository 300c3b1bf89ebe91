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

//! # Path Algebra
//!
//! Computation of protection state from a topology graph: for a pair of
//! endpoints, a primary path, a minimally overlapping secondary path, and
//! the *path splices* between them — short detours from a node unique to
//! one path onto the other path, placed so that fast-failover groups can
//! reroute mid-path without controller involvement. The results are
//! translated into per-switch fast-failover group tables and the auxiliary
//! flow rules that a group cannot express.

mod plan;
mod splice;

pub use plan::{build_plan, group_table_to_path, Plan, TraceHop};
pub use splice::{gen_splice, gen_splice_loose};

use crate::topo::{Hop, NodeId, Topology, BLOCKED_COST};
use log::*;

/// Check if the link `(src, dst)` appears in `path`. With `unidirect` the
/// reversed direction `(dst, src)` counts as well (links are not
/// multidirectional).
pub fn link_in_path(src: &NodeId, dst: &NodeId, path: &[NodeId], unidirect: bool) -> bool {
    for pair in path.windows(2) {
        if pair[0] == *src && pair[1] == *dst {
            return true;
        }
        if unidirect && pair[0] == *dst && pair[1] == *src {
            return true;
        }
    }
    false
}

/// Raise the cost of every link used by the port triples of a path to
/// [`BLOCKED_COST`], so a subsequent shortest-path run overlaps it only when
/// it has no other option.
pub fn increase_used_edge_cost(graph: &mut Topology, ports: &[Hop]) {
    if ports.len() < 2 {
        return;
    }
    for pair in ports.windows(2) {
        graph.change_cost(
            &pair[0].node,
            &pair[1].node,
            pair[0].out_port,
            pair[1].in_port,
            BLOCKED_COST,
        );
    }
}

/// A primary/secondary path pair with its port-triple translations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathPair {
    /// Nodes of the primary path
    pub primary: Vec<NodeId>,
    /// Nodes of the secondary path
    pub secondary: Vec<NodeId>,
    /// Port triples of the primary path
    pub ports_primary: Vec<Hop>,
    /// Port triples of the secondary path
    pub ports_secondary: Vec<Hop>,
}

/// Compute a primary and a minimally overlapping secondary path.
///
/// The secondary is obtained by raising the cost of every link the primary
/// uses and recomputing; afterwards the secondary's links are raised as
/// well, which deliberately leaks into subsequent pairs when the caller
/// reuses the graph. When `graph_sec` is given, the cost inflation and the
/// secondary computation happen there while `graph` stays untouched.
pub fn find_path(
    src: &NodeId,
    dest: &NodeId,
    graph: &mut Topology,
    graph_sec: Option<&mut Topology>,
) -> PathPair {
    let primary = graph.shortest_path(src, dest);
    let ports_primary = match graph.flows_for_path(&primary) {
        Ok(ports) => ports,
        Err(e) => {
            warn!("{}", e);
            return PathPair::default();
        }
    };

    let sec: &mut Topology = match graph_sec {
        Some(g) => g,
        None => graph,
    };

    increase_used_edge_cost(sec, &ports_primary);
    let secondary = sec.shortest_path(src, dest);
    let ports_secondary = match sec.flows_for_path(&secondary) {
        Ok(ports) => ports,
        Err(e) => {
            warn!("{}", e);
            return PathPair { primary, ports_primary, ..Default::default() };
        }
    };
    increase_used_edge_cost(sec, &ports_secondary);

    PathPair { primary, secondary, ports_primary, ports_secondary }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topo::PortNo;

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

    fn diamond() -> Topology {
        let mut t = Topology::new();
        link(&mut t, &host("h1"), &sw(1), -1, 1);
        link(&mut t, &sw(1), &sw(2), 2, 1);
        link(&mut t, &sw(1), &sw(3), 3, 1);
        link(&mut t, &sw(2), &sw(4), 2, 1);
        link(&mut t, &sw(3), &sw(4), 2, 2);
        link(&mut t, &sw(4), &host("h2"), 3, -1);
        t
    }

    #[test]
    fn test_find_path_minimal_overlap() {
        let mut g = diamond();
        let pair = find_path(&host("h1"), &host("h2"), &mut g, None);
        assert_eq!(pair.primary, vec![host("h1"), sw(1), sw(2), sw(4), host("h2")]);
        assert_eq!(pair.secondary, vec![host("h1"), sw(1), sw(3), sw(4), host("h2")]);
    }

    #[test]
    fn test_find_path_no_alternative() {
        // a chain: the secondary is forced onto the same links
        let mut g = Topology::new();
        link(&mut g, &host("h1"), &sw(1), -1, 1);
        link(&mut g, &sw(1), &sw(2), 2, 1);
        link(&mut g, &sw(2), &host("h2"), 2, -1);
        let pair = find_path(&host("h1"), &host("h2"), &mut g, None);
        assert_eq!(pair.primary, vec![host("h1"), sw(1), sw(2), host("h2")]);
        assert_eq!(pair.secondary, pair.primary);
    }

    #[test]
    fn test_link_in_path() {
        let path = vec![host("h1"), sw(1), sw(2), host("h2")];
        assert!(link_in_path(&sw(1), &sw(2), &path, true));
        assert!(link_in_path(&sw(2), &sw(1), &path, true));
        assert!(!link_in_path(&sw(2), &sw(1), &path, false));
        assert!(!link_in_path(&sw(1), &sw(3), &path, true));
    }
}
