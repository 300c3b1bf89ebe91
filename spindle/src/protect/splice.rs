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

//! Path splice generation.
//!
//! A splice is the shortest path from a node unique to one of the two
//! protection paths onto the other path. Among equal-length candidates the
//! one exiting closest to the destination end of the target path wins, so a
//! failover mid-path loses as little progress as possible.

use super::link_in_path;
use crate::topo::{NodeId, Topology};
use std::collections::BTreeMap;

const FAR: usize = 10_000;

/// Map from splice entry node to the splice path
pub type SpliceMap = BTreeMap<NodeId, Vec<NodeId>>;

fn proximity(secondary: &[NodeId], exit: &NodeId) -> usize {
    secondary
        .iter()
        .position(|n| n == exit)
        .map(|i| secondary.len() - i - 1)
        .unwrap_or(FAR)
}

/// Generate strict path splices from `primary` onto `secondary`: one splice
/// per node that appears in the primary but not the secondary, ending on a
/// node of the secondary that the primary does not visit. Virtual nodes
/// injected for inter-domain segment computation are ignored on both sides.
pub fn gen_splice(primary: &[NodeId], secondary: &[NodeId], g: &mut Topology) -> SpliceMap {
    let search: Vec<NodeId> = primary
        .iter()
        .filter(|n| !n.is_virtual() && !secondary.contains(n))
        .cloned()
        .collect();

    let mut splice = SpliceMap::new();
    for sw in search {
        let mut shortest: Vec<NodeId> = Vec::new();
        let mut shortest_proximity = FAR;

        for sw_sec in secondary {
            if sw_sec.is_virtual() {
                continue;
            }
            // never splice to ourselves or back onto the primary path
            if *sw_sec == sw || primary.contains(sw_sec) {
                continue;
            }

            let path = g.shortest_path(&sw, sw_sec);
            if path.is_empty() {
                continue;
            }
            let prox = proximity(secondary, path.last().expect("path is non-empty"));

            if shortest.is_empty()
                || shortest.len() > path.len()
                || (shortest.len() == path.len() && prox < shortest_proximity)
            {
                shortest = path;
                shortest_proximity = prox;
            }
        }

        if !shortest.is_empty() {
            splice.insert(sw, shortest);
        }
    }
    splice
}

/// Generate loose path splices from `primary` onto `secondary`.
///
/// The loose variant widens the candidate sets with the nodes adjacent to
/// each maximal unique segment of the primary, and in exchange rejects any
/// splice that reuses a link already in either path (such a splice would
/// stop the switch from forwarding on its group table) or that backtracks,
/// exiting the secondary at an earlier index than it entered.
pub fn gen_splice_loose(primary: &[NodeId], secondary: &[NodeId], g: &mut Topology) -> SpliceMap {
    // unique nodes, plus the nodes bracketing each unique segment
    let mut adj_search: Vec<NodeId> = Vec::new();
    let mut search: Vec<NodeId> = Vec::new();
    let mut found_start = false;
    for (i, node) in primary.iter().enumerate() {
        if node.is_virtual() {
            continue;
        }
        if !secondary.contains(node) {
            search.push(node.clone());
            if !found_start {
                found_start = true;
                if i > 0 {
                    adj_search.push(primary[i - 1].clone());
                }
            }
        } else if found_start {
            found_start = false;
            adj_search.push(node.clone());
        }
    }

    let mut search_set = search;
    for adj in &adj_search {
        if !search_set.contains(adj) && !adj.is_virtual() {
            search_set.push(adj.clone());
        }
    }

    let mut splice = SpliceMap::new();
    for sw in &search_set {
        let mut shortest: Vec<NodeId> = Vec::new();
        let mut shortest_proximity = FAR;

        for sw_sec in secondary {
            if sw_sec.is_virtual() {
                continue;
            }
            // allow adjacent nodes as destinations, but nothing else that the
            // primary path already visits
            if sw_sec == sw || (primary.contains(sw_sec) && !adj_search.contains(sw_sec)) {
                continue;
            }

            let path = g.shortest_path(sw, sw_sec);
            if path.is_empty() {
                continue;
            }

            let reuses_link = path.windows(2).any(|pair| {
                link_in_path(&pair[0], &pair[1], primary, true)
                    || link_in_path(&pair[0], &pair[1], secondary, true)
            });
            if reuses_link {
                continue;
            }

            let exit_ind = match secondary.iter().position(|n| n == path.last().unwrap()) {
                Some(i) => i,
                None => continue,
            };
            let prox = secondary.len() - exit_ind - 1;

            // a splice starting on the secondary must not go backwards
            if secondary.contains(sw) {
                if let Some(start_ind) = secondary.iter().position(|n| n == &path[0]) {
                    if exit_ind < start_ind {
                        continue;
                    }
                }
            }

            if shortest.is_empty()
                || shortest.len() > path.len()
                || (shortest.len() == path.len() && prox < shortest_proximity)
            {
                shortest = path;
                shortest_proximity = prox;
            }
        }

        if !shortest.is_empty() {
            splice.insert(sw.clone(), shortest);
        }
    }
    splice
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
        link(&mut t, &sw(2), &sw(3), 3, 3);
        link(&mut t, &sw(4), &host("h2"), 3, -1);
        t
    }

    #[test]
    fn test_strict_splices_in_diamond() {
        let mut g = diamond();
        let primary = vec![host("h1"), sw(1), sw(2), sw(4), host("h2")];
        let secondary = vec![host("h1"), sw(1), sw(3), sw(4), host("h2")];

        let mut splice = gen_splice(&primary, &secondary, &mut g);
        splice.extend(gen_splice(&secondary, &primary, &mut g));

        assert_eq!(splice.get(&sw(2)), Some(&vec![sw(2), sw(3)]));
        assert_eq!(splice.get(&sw(3)), Some(&vec![sw(3), sw(2)]));
        assert_eq!(splice.len(), 2);
    }

    #[test]
    fn test_strict_splice_prefers_exit_near_destination() {
        // two equal-length splice candidates from s2: one onto s5 (early in
        // the secondary), one onto s6 (late); the late exit must win.
        let mut t = Topology::new();
        link(&mut t, &host("h1"), &sw(1), -1, 1);
        link(&mut t, &sw(1), &sw(2), 2, 1);
        link(&mut t, &sw(2), &sw(4), 2, 1);
        link(&mut t, &sw(4), &host("h2"), 2, -1);
        link(&mut t, &sw(1), &sw(5), 3, 1);
        link(&mut t, &sw(5), &sw(6), 2, 1);
        link(&mut t, &sw(6), &sw(4), 2, 3);
        link(&mut t, &sw(2), &sw(5), 3, 3);
        link(&mut t, &sw(2), &sw(6), 4, 3);

        let primary = vec![host("h1"), sw(1), sw(2), sw(4), host("h2")];
        let secondary = vec![host("h1"), sw(1), sw(5), sw(6), sw(4), host("h2")];
        let splice = gen_splice(&primary, &secondary, &mut t);
        assert_eq!(splice.get(&sw(2)), Some(&vec![sw(2), sw(6)]));
    }

    #[test]
    fn test_loose_splice_rejects_used_links() {
        // the only splice from s2 onto the secondary reuses the primary link
        // s1-s2 in reverse, so the loose variant must reject it for the
        // adjacent node and keep only link-disjoint splices
        let mut g = diamond();
        let primary = vec![host("h1"), sw(1), sw(2), sw(4), host("h2")];
        let secondary = vec![host("h1"), sw(1), sw(3), sw(4), host("h2")];

        let splice = gen_splice_loose(&primary, &secondary, &mut g);
        for (entry, path) in &splice {
            for pair in path.windows(2) {
                assert!(
                    !link_in_path(&pair[0], &pair[1], &primary, true),
                    "splice from {} reuses a primary link",
                    entry
                );
                assert!(
                    !link_in_path(&pair[0], &pair[1], &secondary, true),
                    "splice from {} reuses a secondary link",
                    entry
                );
            }
        }
        assert_eq!(splice.get(&sw(2)), Some(&vec![sw(2), sw(3)]));
    }
}
