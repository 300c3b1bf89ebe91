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

//! Forwarding-plan construction and reconstruction.
//!
//! [`build_plan`] turns a path pair plus splices into the group tables and
//! special flows to install; [`group_table_to_path`] walks installed group
//! tables to recover the path traffic currently takes.

use super::splice::{gen_splice, gen_splice_loose, SpliceMap};
use super::{find_path, PathPair};
use crate::error::StateError;
use crate::gid::Gid;
use crate::path_info::{Endpoint, PairKey, PathInfo};
use crate::topo::{NodeId, PortNo, Topology, HOST_PORT};
use log::*;

/// One hop of a reconstructed path: the switch it leaves, the switch the
/// link arrives at, and the output port used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceHop {
    /// Switch the hop forwards from
    pub from: NodeId,
    /// Switch the hop arrives at
    pub to: NodeId,
    /// Output port on `from`
    pub out_port: PortNo,
}

impl TraceHop {
    /// The directed link of the hop, as `(from, out_port)`.
    pub fn link(&self) -> (NodeId, PortNo) {
        (self.from.clone(), self.out_port)
    }
}

/// A freshly computed forwarding plan for one pair: the [`PathInfo`] to
/// install plus the node paths and splices it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// The per-pair record to diff and install
    pub info: PathInfo,
    /// Nodes of the primary path
    pub primary: Vec<NodeId>,
    /// Nodes of the secondary path
    pub secondary: Vec<NodeId>,
    /// Splices between the two paths
    pub splices: SpliceMap,
}

/// Compute the forwarding plan for a pair of endpoints on a working copy of
/// the topology.
///
/// The primary path is computed on `graph`; the secondary path and the
/// splices use `graph_sec` when given (CSPF pricing the backup on an
/// unpruned copy) and `graph` otherwise. `inp` and `outp` supply the
/// segment boundary when the respective endpoint is not a local host.
/// Returns `None` when either path is empty — the caller must withdraw any
/// previously installed state for the pair.
#[allow(clippy::too_many_arguments)]
pub fn build_plan(
    graph: &mut Topology,
    graph_sec: Option<&mut Topology>,
    src: &NodeId,
    dest: &NodeId,
    inp: Option<Endpoint>,
    outp: Option<Endpoint>,
    gid: Gid,
    src_is_host: bool,
    dest_is_host: bool,
    loose: bool,
) -> Option<Plan> {
    let pair = match graph_sec {
        Some(sec) => {
            let pair = find_path(src, dest, graph, Some(sec));
            finish_plan(sec, pair, src, dest, inp, outp, gid, src_is_host, dest_is_host, loose)
        }
        None => {
            let pair = find_path(src, dest, graph, None);
            finish_plan(graph, pair, src, dest, inp, outp, gid, src_is_host, dest_is_host, loose)
        }
    };
    pair
}

#[allow(clippy::too_many_arguments)]
fn finish_plan(
    sec: &mut Topology,
    pair: PathPair,
    src: &NodeId,
    dest: &NodeId,
    inp: Option<Endpoint>,
    outp: Option<Endpoint>,
    gid: Gid,
    src_is_host: bool,
    dest_is_host: bool,
    loose: bool,
) -> Option<Plan> {
    let PathPair { primary, secondary, ports_primary, ports_secondary } = pair;
    info!("PATH: {} to {}", src, dest);
    info!("PATH PRIMARY: {:?}", primary);
    info!("PATH SECOND: {:?}", secondary);

    if primary.is_empty() || secondary.is_empty() || ports_primary.is_empty() {
        return None;
    }

    let splices = if loose {
        let mut s = gen_splice_loose(&primary, &secondary, sec);
        s.extend(gen_splice_loose(&secondary, &primary, sec));
        s
    } else {
        let mut s = gen_splice(&primary, &secondary, sec);
        s.extend(gen_splice(&secondary, &primary, sec));
        s
    };
    info!("SPLICES: {:?}", splices);

    let mut info = PathInfo { gid, ..Default::default() };
    for hop in ports_primary.iter().chain(ports_secondary.iter()) {
        let entry = info.groups.entry(hop.node.clone()).or_default();
        if !entry.contains(&hop.out_port) {
            entry.push(hop.out_port);
        }
    }

    // splice ends contribute group alternates, splice mid-nodes need plain
    // in/out flow rules instead
    for sp in splices.values() {
        let ports = match sec.flows_for_path(sp) {
            Ok(ports) => ports,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        for hop in ports {
            if hop.node == sp[0] || hop.node == sp[sp.len() - 1] {
                let entry = info.groups.entry(hop.node.clone()).or_default();
                if !entry.contains(&hop.out_port) {
                    entry.push(hop.out_port);
                }
            } else {
                let entry = info.special_flows.entry(hop.node.clone()).or_default();
                if !entry.contains(&(hop.in_port, hop.out_port)) {
                    entry.push((hop.in_port, hop.out_port));
                }
            }
        }
    }

    info.ingress = if src_is_host {
        primary.get(1).and_then(|n| n.switch()).map(Endpoint::Local)
    } else {
        inp
    };
    info.egress = if dest_is_host {
        primary.get(primary.len() - 2).and_then(|n| n.switch()).map(Endpoint::Local)
    } else {
        outp
    };
    info.in_port = Some(ports_primary[0].in_port);
    info.out_port = Some(ports_primary[ports_primary.len() - 1].out_port);

    // both hosts on one switch: a single rewrite rule replaces the groups
    if info.ingress.is_some() && info.ingress == info.egress {
        info.groups.clear();
    }

    info!("GROUP_TABLE: {:?}", info.groups);
    info!("SPECIAL_FLOWS: {:?}", info.special_flows);
    info!("VLAN/GID {}", gid);

    Some(Plan { info, primary, secondary, splices })
}

/// Walk the group tables of an installed [`PathInfo`] to recover the path
/// traffic takes from `ingress`, always following the active (first) port
/// and continuing through special flows at splice mid-nodes.
///
/// With `old` and `swap = (node, current_port, candidate_port)` the walk
/// reuses the old path up to the swap node and takes the candidate port
/// there, which is how the TE optimizer prices a group inversion before
/// committing to it. Cycles are detected explicitly: a revisited switch
/// means the installed state has degenerated and the path is invalid.
pub fn group_table_to_path(
    info: &PathInfo,
    graph: &Topology,
    ingress: &Endpoint,
    old: Option<&[TraceHop]>,
    swap: Option<(&NodeId, PortNo, PortNo)>,
    pair: &PairKey,
) -> Result<Vec<TraceHop>, StateError> {
    let gp = &info.groups;
    if gp.is_empty() {
        // two hosts on the same switch install no groups
        return Err(StateError::EmptyGroups(pair.clone()));
    }

    let mut sw_from = NodeId::Switch(ingress.dpid());
    let mut visited: Vec<NodeId> = Vec::new();
    let mut port: Option<PortNo> = None;
    let mut path: Vec<TraceHop> = Vec::new();

    // reuse the old path up to the swap node
    if let (Some(old), Some((swap_node, _, _))) = (old, swap.as_ref()) {
        let mut found_swap = false;
        for hop in old {
            if hop.from == **swap_node {
                sw_from = hop.from.clone();
                found_swap = true;
                break;
            }
            path.push(hop.clone());
        }
        if !found_swap {
            path.clear();
        }
    }

    loop {
        let out_port = match swap.as_ref() {
            Some((swap_node, cur_port, alt_port)) if **swap_node == sw_from => {
                let group = gp.get(&sw_from).cloned().unwrap_or_default();
                if group.first() != Some(cur_port) || !group.contains(alt_port) {
                    return Err(StateError::GroupSwapInvalid(
                        pair.clone(),
                        sw_from.switch().unwrap_or(0),
                        *alt_port,
                    ));
                }
                *alt_port
            }
            _ => match gp.get(&sw_from) {
                Some(group) if !group.is_empty() => group[0],
                _ => {
                    // splice mid-node: continue through the special flow
                    // matching the port we arrived on
                    let flows = info
                        .special_flows
                        .get(&sw_from)
                        .ok_or_else(|| {
                            StateError::AbruptEnd(pair.clone(), sw_from.clone(), port.unwrap_or(-1))
                        })?;
                    flows
                        .iter()
                        .find(|(in_port, _)| Some(*in_port) == port)
                        .map(|(_, out)| *out)
                        .ok_or_else(|| {
                            StateError::AbruptEnd(pair.clone(), sw_from.clone(), port.unwrap_or(-1))
                        })?
                }
            },
        };

        let (sw_to, port_to) = match graph
            .get_port_info(&sw_from, out_port)
            .and_then(|p| p.dest.clone())
        {
            Some(dest) => dest,
            None => return Err(StateError::AbruptEnd(pair.clone(), sw_from.clone(), out_port)),
        };

        path.push(TraceHop { from: sw_from.clone(), to: sw_to.clone(), out_port });

        if visited.contains(&sw_to) {
            return Err(StateError::DegeneratePath(pair.clone(), sw_to));
        }
        visited.push(sw_to.clone());

        if !gp.contains_key(&sw_to) && !info.special_flows.contains_key(&sw_to) {
            return Ok(path);
        }
        sw_from = sw_to;
        port = Some(port_to);
    }
}

#[cfg(test)]
mod test {
    use super::*;

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

    fn diamond_plan() -> Plan {
        let mut g = diamond();
        build_plan(
            &mut g,
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
        .unwrap()
    }

    #[test]
    fn test_diamond_plan_paths() {
        let plan = diamond_plan();
        assert_eq!(plan.primary, vec![host("h1"), sw(1), sw(2), sw(4), host("h2")]);
        assert_eq!(plan.secondary, vec![host("h1"), sw(1), sw(3), sw(4), host("h2")]);
        assert_eq!(plan.splices.get(&sw(2)), Some(&vec![sw(2), sw(3)]));
        assert_eq!(plan.splices.get(&sw(3)), Some(&vec![sw(3), sw(2)]));
    }

    #[test]
    fn test_diamond_plan_groups() {
        let plan = diamond_plan();
        // the fork switch holds both ports, the splice ends contribute their
        // exit port as a failover alternate
        assert_eq!(
            plan.info.groups,
            maplit::btreemap! {
                sw(1) => vec![2, 3],
                sw(2) => vec![2, 3],
                sw(3) => vec![2, 3],
                sw(4) => vec![3],
            }
        );
        assert!(plan.info.special_flows.is_empty());
        assert_eq!(plan.info.ingress, Some(Endpoint::Local(1)));
        assert_eq!(plan.info.egress, Some(Endpoint::Local(4)));
        assert_eq!(plan.info.in_port, Some(1));
        assert_eq!(plan.info.out_port, Some(3));
    }

    #[test]
    fn test_same_switch_pair_has_no_groups() {
        let mut t = Topology::new();
        link(&mut t, &host("h1"), &sw(1), -1, 1);
        link(&mut t, &host("h2"), &sw(1), -1, 2);
        let plan = build_plan(
            &mut t,
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
        assert!(plan.info.groups.is_empty());
        assert_eq!(plan.info.ingress, plan.info.egress);
    }

    #[test]
    fn test_group_walk_follows_active_ports() {
        let plan = diamond_plan();
        let graph = diamond();
        let pair = ("h1".to_string(), "h2".to_string());
        let path = group_table_to_path(
            &plan.info,
            &graph,
            plan.info.ingress.as_ref().unwrap(),
            None,
            None,
            &pair,
        )
        .unwrap();
        let links: Vec<(NodeId, PortNo)> = path.iter().map(|h| h.link()).collect();
        assert_eq!(links, vec![(sw(1), 2), (sw(2), 2), (sw(4), 3)]);
    }

    #[test]
    fn test_group_walk_with_swap() {
        let plan = diamond_plan();
        let graph = diamond();
        let pair = ("h1".to_string(), "h2".to_string());
        let ing = plan.info.ingress.clone().unwrap();
        let old = group_table_to_path(&plan.info, &graph, &ing, None, None, &pair).unwrap();
        // swap the fork onto the secondary port
        let node = sw(1);
        let path =
            group_table_to_path(&plan.info, &graph, &ing, Some(&old), Some((&node, 2, 3)), &pair)
                .unwrap();
        let links: Vec<(NodeId, PortNo)> = path.iter().map(|h| h.link()).collect();
        assert_eq!(links, vec![(sw(1), 3), (sw(3), 2), (sw(4), 3)]);
    }

    #[test]
    fn test_group_walk_detects_cycles() {
        let graph = diamond();
        let pair = ("h1".to_string(), "h2".to_string());
        let mut info = PathInfo::skeleton(1);
        // degenerate state: s2 and s3 bounce traffic between each other
        info.groups.insert(sw(2), vec![3]);
        info.groups.insert(sw(3), vec![3]);
        info.ingress = Some(Endpoint::Local(2));
        let res = group_table_to_path(&info, &graph, &Endpoint::Local(2), None, None, &pair);
        assert!(matches!(res, Err(StateError::DegeneratePath(_, _))));
    }

    #[test]
    fn test_group_walk_empty_groups() {
        let graph = diamond();
        let pair = ("h1".to_string(), "h2".to_string());
        let info = PathInfo::skeleton(1);
        let res = group_table_to_path(&info, &graph, &Endpoint::Local(1), None, None, &pair);
        assert_eq!(res, Err(StateError::EmptyGroups(pair)));
    }
}
