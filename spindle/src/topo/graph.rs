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

//! The topology graph and its shortest-path engine.

use super::types::*;
use log::*;
use petgraph::prelude::*;
use petgraph::stable_graph::StableGraph;
use std::collections::{HashMap, VecDeque};

type NodeHandle = NodeIndex<u32>;

/// Topology graph holding the per-port adjacency table, the node arena and
/// the lazily rebuilt edge index used by Dijkstra.
///
/// A link between two nodes is stored as two directed [`PortInfo`] records
/// whose `dest` fields mirror each other. Mutators set the `stale` bit;
/// [`Topology::shortest_path`] rebuilds the edge index in one pass when it
/// finds the bit set. Cloning the topology yields the independent working
/// copy that path computation and TE pruning operate on.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: StableGraph<NodeId, LinkWeight, Directed, u32>,
    nodes: HashMap<NodeId, NodeHandle>,
    ports: HashMap<(NodeHandle, PortNo), PortInfo>,
    adjacency: HashMap<NodeHandle, Vec<(NodeHandle, LinkWeight)>>,
    fixed_speed: HashMap<(Dpid, PortNo), u64>,
    stale: bool,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::with_capacity(0, 0),
            nodes: HashMap::new(),
            ports: HashMap::new(),
            adjacency: HashMap::new(),
            fixed_speed: HashMap::new(),
            stale: false,
        }
    }

    /// Install the fixed-speed override table. Overrides are keyed by
    /// `(switch, port)` and re-apply whenever the port is (re)initialised or
    /// a speed update arrives.
    pub fn set_fixed_speeds(&mut self, fixed: HashMap<(Dpid, PortNo), u64>) {
        self.fixed_speed = fixed;
    }

    /// Mark the edge index as needing a rebuild before the next query.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Returns true if the node is present in the topology.
    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// All node identifiers, in their total order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.nodes.keys().cloned().collect();
        out.sort();
        out
    }

    fn handle(&self, node: &NodeId) -> Option<NodeHandle> {
        self.nodes.get(node).copied()
    }

    fn ensure_node(&mut self, node: &NodeId) -> NodeHandle {
        if let Some(h) = self.nodes.get(node) {
            return *h;
        }
        let h = self.graph.add_node(node.clone());
        self.nodes.insert(node.clone(), h);
        h
    }

    fn fixed_speed_of(&self, node: &NodeId, port: PortNo) -> Option<u64> {
        match node {
            NodeId::Switch(dpid) => self.fixed_speed.get(&(*dpid, port)).copied(),
            _ => None,
        }
    }

    fn init_port(&mut self, node: &NodeId, port: PortNo) -> &mut PortInfo {
        let speed = self.fixed_speed_of(node, port).unwrap_or(0);
        let h = self.ensure_node(node);
        self.ports.entry((h, port)).or_insert_with(|| PortInfo::new(speed))
    }

    /// Add one directed half of a link with the default cost. See
    /// [`Topology::add_link_with_cost`].
    pub fn add_link(
        &mut self,
        src: &NodeId,
        dst: &NodeId,
        src_port: PortNo,
        dst_port: PortNo,
    ) -> Result<bool, TopoError> {
        self.add_link_with_cost(src, dst, src_port, dst_port, DEFAULT_COST)
    }

    /// Add one directed half of a link. Returns `Ok(true)` if the topology
    /// was modified and `Ok(false)` if the identical entry already existed.
    /// Linking two domain nodes directly is rejected: the inter-domain path
    /// composer assumes it never happens.
    pub fn add_link_with_cost(
        &mut self,
        src: &NodeId,
        dst: &NodeId,
        src_port: PortNo,
        dst_port: PortNo,
        cost: LinkWeight,
    ) -> Result<bool, TopoError> {
        if let (NodeId::Domain(a), NodeId::Domain(b)) = (src, dst) {
            return Err(TopoError::DomainAdjacency(*a, *b));
        }

        self.ensure_node(dst);
        let entry = self.init_port(src, src_port);
        if entry.dest.as_ref() == Some(&(dst.clone(), dst_port)) && entry.cost == cost {
            return Ok(false);
        }

        entry.dest = Some((dst.clone(), dst_port));
        entry.cost = cost;
        self.stale = true;
        Ok(true)
    }

    /// Remove one directed port entry, validating that the far-end details
    /// match. Returns true if a port was removed.
    pub fn remove_port(
        &mut self,
        src: &NodeId,
        dst: &NodeId,
        src_port: PortNo,
        dst_port: PortNo,
    ) -> bool {
        let h = match self.handle(src) {
            Some(h) => h,
            None => return false,
        };
        match self.ports.get(&(h, src_port)) {
            Some(info) if info.dest.as_ref() == Some(&(dst.clone(), dst_port)) => {}
            _ => return false,
        }
        self.ports.remove(&(h, src_port));
        self.stale = true;
        true
    }

    /// Point an existing port at a different destination node, keeping the
    /// destination port. Used to inject the virtual target and indirection
    /// nodes of inter-domain segment computation. Returns true if the port
    /// existed.
    pub fn redirect_port_dest(&mut self, node: &NodeId, port: PortNo, new_dest: NodeId) -> bool {
        let h = match self.handle(node) {
            Some(h) => h,
            None => return false,
        };
        if !self.ports.contains_key(&(h, port)) {
            return false;
        }
        self.ensure_node(&new_dest);
        if let Some(info) = self.ports.get_mut(&(h, port)) {
            match info.dest.as_mut() {
                Some((dest, _)) => *dest = new_dest,
                None => info.dest = Some((new_dest, HOST_PORT)),
            }
            self.stale = true;
            return true;
        }
        false
    }

    /// Overwrite the destination of an existing port. Returns true if the
    /// port existed.
    pub fn set_port_dest(&mut self, node: &NodeId, port: PortNo, dest: (NodeId, PortNo)) -> bool {
        let h = match self.handle(node) {
            Some(h) => h,
            None => return false,
        };
        self.ensure_node(&dest.0);
        match self.ports.get_mut(&(h, port)) {
            Some(info) => {
                info.dest = Some(dest);
                self.stale = true;
                true
            }
            None => false,
        }
    }

    /// Remove one directed port entry without validating the far end.
    pub fn remove_port_any(&mut self, node: &NodeId, port: PortNo) -> bool {
        let h = match self.handle(node) {
            Some(h) => h,
            None => return false,
        };
        if self.ports.remove(&(h, port)).is_some() {
            self.stale = true;
            true
        } else {
            false
        }
    }

    /// Remove a host link given the switch-side end. Both ends of the link
    /// are deleted, and the host node itself once it has no ports left.
    /// Returns the evicted host identifier.
    pub fn remove_host_link(&mut self, src: &NodeId, src_port: PortNo) -> Option<NodeId> {
        let h = self.handle(src)?;
        let host = match self.ports.get(&(h, src_port)) {
            Some(info) => match &info.dest {
                Some((host, HOST_PORT)) => host.clone(),
                _ => return None,
            },
            None => return None,
        };

        self.stale = true;
        self.ports.remove(&(h, src_port));

        if let Some(hh) = self.handle(&host) {
            self.ports.remove(&(hh, HOST_PORT));
            if !self.ports.keys().any(|(k, _)| *k == hh) {
                self.graph.remove_node(hh);
                self.nodes.remove(&host);
            }
        }
        Some(host)
    }

    /// Remove a host and every link connecting it. Returns true if the host
    /// was found and removed.
    pub fn remove_host(&mut self, host: &NodeId) -> bool {
        let hh = match self.handle(host) {
            Some(h) => h,
            None => return false,
        };
        if !self.ports.contains_key(&(hh, HOST_PORT)) {
            return false;
        }

        let attached: Vec<(NodeId, PortNo)> = self
            .ports
            .iter()
            .filter(|((k, _), _)| *k == hh)
            .filter_map(|(_, info)| info.dest.clone())
            .collect();
        for (sw, sw_port) in attached {
            self.remove_host_link(&sw, sw_port);
        }
        self.stale = true;
        true
    }

    /// Remove a switch and every link that connects to or from it. Returns
    /// true if anything was removed.
    pub fn remove_switch(&mut self, id: &NodeId) -> bool {
        let mut changed = false;

        if let Some(h) = self.handle(id) {
            let own: Vec<(NodeHandle, PortNo)> =
                self.ports.keys().filter(|(k, _)| *k == h).copied().collect();
            for key in own {
                self.ports.remove(&key);
            }
            self.graph.remove_node(h);
            self.nodes.remove(id);
            changed = true;
            self.stale = true;
        }

        let pointing: Vec<(NodeHandle, PortNo)> = self
            .ports
            .iter()
            .filter(|(_, info)| matches!(&info.dest, Some((d, _)) if d == id))
            .map(|(k, _)| *k)
            .collect();
        for key in pointing {
            self.ports.remove(&key);
            changed = true;
            self.stale = true;
        }

        changed
    }

    /// Change the cost of a link in both directions, if both halves exist.
    pub fn change_cost(
        &mut self,
        src: &NodeId,
        dst: &NodeId,
        src_port: PortNo,
        dst_port: PortNo,
        cost: LinkWeight,
    ) {
        let forward = self
            .handle(src)
            .and_then(|h| self.ports.get_mut(&(h, src_port)))
            .filter(|info| info.dest.as_ref() == Some(&(dst.clone(), dst_port)));
        match forward {
            Some(info) => {
                info.cost = cost;
                self.stale = true;
            }
            None => return,
        }

        let reverse = self
            .handle(dst)
            .and_then(|h| self.ports.get_mut(&(h, dst_port)))
            .filter(|info| info.dest.as_ref() == Some(&(src.clone(), src_port)));
        if let Some(info) = reverse {
            info.cost = cost;
        }
    }

    /// Find the port pair of a link between two nodes, as
    /// `(src_port, dst_port)`. When several parallel links exist, the one on
    /// the lowest source port wins.
    pub fn find_ports(&self, src: &NodeId, dst: &NodeId) -> Option<(PortNo, PortNo)> {
        let h = self.handle(src)?;
        let mut candidates: Vec<(PortNo, PortNo)> = self
            .ports
            .iter()
            .filter(|((k, _), _)| *k == h)
            .filter_map(|((_, port), info)| match &info.dest {
                Some((d, dport)) if d == dst => Some((*port, *dport)),
                _ => None,
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Port records of one node as `(port, info)` pairs, sorted by port.
    pub fn ports_of(&self, node: &NodeId) -> Vec<(PortNo, PortInfo)> {
        let h = match self.handle(node) {
            Some(h) => h,
            None => return Vec::new(),
        };
        let mut out: Vec<(PortNo, PortInfo)> = self
            .ports
            .iter()
            .filter(|((k, _), _)| *k == h)
            .map(|((_, port), info)| (*port, info.clone()))
            .collect();
        out.sort_by_key(|(port, _)| *port);
        out
    }

    /// Every `(node, port)` key of the port table, sorted.
    pub fn port_keys(&self) -> Vec<(NodeId, PortNo)> {
        let mut out: Vec<(NodeId, PortNo)> = self
            .ports
            .keys()
            .map(|(h, port)| (self.graph[*h].clone(), *port))
            .collect();
        out.sort();
        out
    }

    /// All nodes that are not hosts: a node counts as a switch if it appears
    /// as a non-host destination, or owns ports but no host-side port.
    pub fn switches(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for node in self.nodes.keys() {
            let h = self.nodes[node];
            let mut has_host_port = false;
            for ((k, port), info) in self.ports.iter() {
                if *k == h && *port == HOST_PORT {
                    has_host_port = true;
                }
                if *k == h {
                    if let Some((dest, dport)) = &info.dest {
                        if *dport != HOST_PORT && !out.contains(dest) {
                            out.push(dest.clone());
                        }
                    }
                }
            }
            if !has_host_port && !out.contains(node) {
                out.push(node.clone());
            }
        }
        out.sort();
        out
    }

    /// Retrieve the port record of `(node, port)`.
    pub fn get_port_info(&self, node: &NodeId, port: PortNo) -> Option<&PortInfo> {
        let h = self.handle(node)?;
        self.ports.get(&(h, port))
    }

    /// Apply a telemetry or address update to a port, creating the record if
    /// it does not exist yet. Fixed-speed overrides win over reported speeds.
    pub fn update_port_info(&mut self, node: &NodeId, port: PortNo, update: PortUpdate) {
        let fixed = self.fixed_speed_of(node, port);
        let info = self.init_port(node, port);

        if let Some(speed) = update.speed {
            if fixed.is_none() {
                info.speed = speed;
            }
        }
        if let Some(addr) = update.addr {
            info.addr = Some(addr);
        }
        if let Some(eth) = update.eth {
            info.eth = Some(eth);
        }

        let counters = match update.counters {
            Some(c) => c,
            None => return,
        };
        let bucket = if update.is_total {
            info.total.get_or_insert_with(PortCounters::default)
        } else {
            info.poll.get_or_insert_with(PortCounters::default)
        };
        if let Some(v) = counters.rx_packets {
            bucket.rx_packets = v;
        }
        if let Some(v) = counters.rx_bytes {
            bucket.rx_bytes = v;
        }
        if let Some(v) = counters.rx_errors {
            bucket.rx_errors = v;
        }
        if let Some(v) = counters.tx_packets {
            bucket.tx_packets = v;
        }
        if let Some(v) = counters.tx_bytes {
            bucket.tx_bytes = v;
        }
        if let Some(v) = counters.tx_errors {
            bucket.tx_errors = v;
        }
        if let Some(v) = counters.rx_rate {
            bucket.rx_rate = Some(v);
        }
        if let Some(v) = counters.tx_rate {
            bucket.tx_rate = Some(v);
        }
    }

    /// Add modelled traffic to a port's poll byte counter.
    pub fn add_poll_tx_bytes(&mut self, node: &NodeId, port: PortNo, bytes: u64) {
        let info = self.init_port(node, port);
        let poll = info.poll.get_or_insert_with(PortCounters::default);
        poll.tx_bytes = poll.tx_bytes.saturating_add(bytes);
    }

    /// Subtract modelled traffic from a port's poll byte counter. Byte
    /// counters only ever decrease by what they hold: an undershoot is
    /// clamped to the stored value and logged at critical severity.
    pub fn sub_poll_tx_bytes(&mut self, node: &NodeId, port: PortNo, bytes: u64) {
        let node_str = node.to_string();
        let info = self.init_port(node, port);
        let poll = info.poll.get_or_insert_with(PortCounters::default);
        if poll.tx_bytes < bytes {
            error!(
                "Moving traffic from {} {} would result in negative stat (orig: {} | delta: {})",
                node_str, port, poll.tx_bytes, bytes
            );
            return;
        }
        poll.tx_bytes -= bytes;
    }

    fn rebuild(&mut self) {
        self.adjacency.clear();
        for ((h, _), info) in self.ports.iter() {
            if let Some((dest, _)) = &info.dest {
                if let Some(dh) = self.nodes.get(dest) {
                    self.adjacency.entry(*h).or_insert_with(Vec::new).push((*dh, info.cost));
                }
            }
        }
        self.stale = false;
    }

    /// Compute the shortest path from `src` to `dest` with Dijkstra.
    ///
    /// Ties are broken first on accumulated cost and then on the identifier
    /// of the predecessor node; without the second key, identical topologies
    /// would produce diverging paths on different controllers and break
    /// inter-domain stitching. Returns an empty path when no route exists or
    /// either endpoint is unknown.
    pub fn shortest_path(&mut self, src: &NodeId, dest: &NodeId) -> Vec<NodeId> {
        if self.stale {
            self.rebuild();
        }

        let s = match self.handle(src) {
            Some(h) => h,
            None => {
                debug!("Source {} not in topology, no path", src);
                return Vec::new();
            }
        };
        let d = match self.handle(dest) {
            Some(h) => h,
            None => {
                debug!("Destination {} not in topology, no path", dest);
                return Vec::new();
            }
        };

        let mut dist: HashMap<NodeHandle, LinkWeight> =
            self.nodes.values().map(|h| (*h, LinkWeight::MAX)).collect();
        let mut prev: HashMap<NodeHandle, Option<NodeHandle>> =
            self.nodes.values().map(|h| (*h, None)).collect();
        let mut queue: Vec<NodeHandle> = self.nodes.values().copied().collect();
        dist.insert(s, 0);

        while !queue.is_empty() {
            let (qi, u) = queue
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    dist[*a].cmp(&dist[*b]).then_with(|| self.graph[**a].cmp(&self.graph[**b]))
                })
                .map(|(i, h)| (i, *h))
                .expect("queue is non-empty");

            if dist[&u] == LinkWeight::MAX || u == d {
                break;
            }
            queue.swap_remove(qi);

            let neighbours = match self.adjacency.get(&u) {
                Some(n) => n.clone(),
                None => Vec::new(),
            };
            for (v, weight) in neighbours {
                let alt = dist[&u].saturating_add(weight);
                let better = {
                    let dv = dist[&v];
                    alt < dv
                        || (alt == dv
                            && match prev[&v] {
                                Some(p) => self.graph[u] < self.graph[p],
                                None => false,
                            })
                };
                if better {
                    dist.insert(v, alt);
                    prev.insert(v, Some(u));
                }
            }
        }

        let mut out: VecDeque<NodeId> = VecDeque::new();
        let mut u = d;
        while let Some(p) = prev[&u] {
            out.push_front(self.graph[u].clone());
            u = p;
        }
        out.push_front(self.graph[u].clone());

        let res: Vec<NodeId> = out.into_iter().collect();
        if !res.contains(src) || !res.contains(dest) {
            return Vec::new();
        }
        res
    }

    /// Translate a node path into the port triples that realise it. The
    /// destination is never included; a host at the start (port `-1`) is
    /// dropped, a switch at the start gets an `in_port` of `-1`.
    pub fn flows_for_path(&self, path: &[NodeId]) -> Result<Vec<Hop>, TopoError> {
        let mut res = Vec::new();
        if path.len() < 2 {
            return Ok(res);
        }

        for i in 0..path.len() - 1 {
            if i == 0 {
                let ports = self
                    .find_ports(&path[0], &path[1])
                    .ok_or_else(|| TopoError::InvalidPath(path[0].clone(), path[1].clone()))?;
                if ports.0 == HOST_PORT {
                    continue;
                }
                res.push(Hop::new(path[0].clone(), HOST_PORT, ports.0));
                continue;
            }

            let ports1 = self
                .find_ports(&path[i - 1], &path[i])
                .ok_or_else(|| TopoError::InvalidPath(path[i - 1].clone(), path[i].clone()))?;
            let ports2 = self
                .find_ports(&path[i], &path[i + 1])
                .ok_or_else(|| TopoError::InvalidPath(path[i].clone(), path[i + 1].clone()))?;

            res.push(Hop::new(path[i].clone(), ports1.1, ports2.0));
        }
        Ok(res)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sw(d: Dpid) -> NodeId {
        NodeId::Switch(d)
    }

    fn host(n: &str) -> NodeId {
        NodeId::Host(n.to_string())
    }

    fn link(t: &mut Topology, a: &NodeId, b: &NodeId, pa: PortNo, pb: PortNo) {
        t.add_link(a, b, pa, pb).unwrap();
        t.add_link(b, a, pb, pa).unwrap();
    }

    /// The five-switch reference topology with two hosts.
    fn ring_net() -> Topology {
        let mut t = Topology::new();
        link(&mut t, &host("p1"), &sw(1), -1, 1);
        link(&mut t, &sw(1), &sw(2), 2, 1);
        link(&mut t, &sw(1), &sw(4), 3, 1);
        link(&mut t, &sw(2), &sw(3), 2, 1);
        link(&mut t, &sw(2), &sw(4), 3, 2);
        link(&mut t, &sw(2), &sw(5), 4, 1);
        link(&mut t, &sw(3), &sw(5), 3, 2);
        link(&mut t, &sw(3), &host("d1"), 2, -1);
        link(&mut t, &sw(4), &sw(5), 3, 3);
        t
    }

    #[test]
    fn test_shortest_path() {
        let mut t = ring_net();
        assert_eq!(
            t.shortest_path(&host("p1"), &host("d1")),
            vec![host("p1"), sw(1), sw(2), sw(3), host("d1")]
        );
        assert_eq!(
            t.shortest_path(&host("d1"), &host("p1")),
            vec![host("d1"), sw(3), sw(2), sw(1), host("p1")]
        );
    }

    #[test]
    fn test_flows_for_path() {
        let mut t = ring_net();
        let path = t.shortest_path(&host("p1"), &host("d1"));
        let hops = t.flows_for_path(&path).unwrap();
        assert_eq!(
            hops,
            vec![Hop::new(sw(1), 1, 2), Hop::new(sw(2), 1, 2), Hop::new(sw(3), 1, 2)]
        );
    }

    #[test]
    fn test_flows_for_invalid_path() {
        let t = ring_net();
        // s1 and s3 are not adjacent
        let path = vec![host("p1"), sw(1), sw(3), host("d1")];
        assert_eq!(
            t.flows_for_path(&path),
            Err(TopoError::InvalidPath(sw(1), sw(3)))
        );
    }

    #[test]
    fn test_tie_break_prefers_lower_predecessor() {
        // diamond with equal costs: s1 - {s2, s3} - s4
        let mut t = Topology::new();
        link(&mut t, &sw(1), &sw(2), 1, 1);
        link(&mut t, &sw(1), &sw(3), 2, 1);
        link(&mut t, &sw(2), &sw(4), 2, 1);
        link(&mut t, &sw(3), &sw(4), 2, 2);
        assert_eq!(t.shortest_path(&sw(1), &sw(4)), vec![sw(1), sw(2), sw(4)]);
    }

    #[test]
    fn test_blocked_cost_loses_ties() {
        let mut t = Topology::new();
        link(&mut t, &sw(1), &sw(2), 1, 1);
        link(&mut t, &sw(2), &sw(4), 2, 1);
        link(&mut t, &sw(1), &sw(3), 2, 1);
        link(&mut t, &sw(3), &sw(4), 2, 2);
        t.change_cost(&sw(1), &sw(2), 1, 1, BLOCKED_COST);
        t.change_cost(&sw(2), &sw(4), 2, 1, BLOCKED_COST);
        assert_eq!(t.shortest_path(&sw(1), &sw(4)), vec![sw(1), sw(3), sw(4)]);
    }

    #[test]
    fn test_change_cost_is_bidirectional() {
        let mut t = Topology::new();
        link(&mut t, &sw(1), &sw(2), 1, 1);
        t.change_cost(&sw(1), &sw(2), 1, 1, 500);
        assert_eq!(t.get_port_info(&sw(1), 1).unwrap().cost, 500);
        assert_eq!(t.get_port_info(&sw(2), 1).unwrap().cost, 500);
    }

    #[test]
    fn test_link_symmetry() {
        let t = ring_net();
        for (node, port) in t.port_keys() {
            let info = t.get_port_info(&node, port).unwrap();
            let (dest, dest_port) = info.dest.clone().unwrap();
            let back = t.get_port_info(&dest, dest_port).unwrap();
            assert_eq!(back.dest, Some((node.clone(), port)));
            assert_eq!(back.cost, info.cost);
        }
    }

    #[test]
    fn test_add_link_idempotent() {
        let mut t = Topology::new();
        assert!(t.add_link(&sw(1), &sw(2), 1, 1).unwrap());
        assert!(!t.add_link(&sw(1), &sw(2), 1, 1).unwrap());
    }

    #[test]
    fn test_reject_domain_adjacency() {
        let mut t = Topology::new();
        assert_eq!(
            t.add_link(&NodeId::Domain(1), &NodeId::Domain(2), -2, -2),
            Err(TopoError::DomainAdjacency(1, 2))
        );
    }

    #[test]
    fn test_remove_switch_as_source() {
        let mut t = ring_net();
        assert!(t.remove_switch(&sw(5)));
        assert!(!t.contains(&sw(5)));
        assert!(t.get_port_info(&sw(2), 4).is_none());
        assert!(t.get_port_info(&sw(3), 3).is_none());
        assert!(t.get_port_info(&sw(4), 3).is_none());
        // removing again reports no change
        assert!(!t.remove_switch(&sw(5)));
        // the rest of the ring still routes
        assert_eq!(
            t.shortest_path(&host("p1"), &host("d1")),
            vec![host("p1"), sw(1), sw(2), sw(3), host("d1")]
        );
    }

    #[test]
    fn test_remove_host() {
        let mut t = ring_net();
        assert!(t.remove_host(&host("d1")));
        assert!(!t.contains(&host("d1")));
        assert!(t.get_port_info(&sw(3), 2).is_none());
        assert_eq!(t.shortest_path(&host("p1"), &host("d1")), Vec::<NodeId>::new());
    }

    #[test]
    fn test_remove_host_link() {
        let mut t = ring_net();
        assert_eq!(t.remove_host_link(&sw(1), 1), Some(host("p1")));
        assert!(!t.contains(&host("p1")));
        assert_eq!(t.remove_host_link(&sw(1), 2), None);
    }

    #[test]
    fn test_negative_delta_clamped() {
        let mut t = ring_net();
        t.add_poll_tx_bytes(&sw(1), 2, 100);
        t.sub_poll_tx_bytes(&sw(1), 2, 500);
        let info = t.get_port_info(&sw(1), 2).unwrap();
        assert_eq!(info.poll.as_ref().unwrap().tx_bytes, 100);
        t.sub_poll_tx_bytes(&sw(1), 2, 40);
        let info = t.get_port_info(&sw(1), 2).unwrap();
        assert_eq!(info.poll.as_ref().unwrap().tx_bytes, 60);
    }

    #[test]
    fn test_fixed_speed_override() {
        let mut t = Topology::new();
        let mut fixed = HashMap::new();
        fixed.insert((1, 2), 1_000_000_000u64);
        t.set_fixed_speeds(fixed);
        link(&mut t, &sw(1), &sw(2), 2, 1);
        assert_eq!(t.get_port_info(&sw(1), 2).unwrap().speed, 1_000_000_000);
        t.update_port_info(
            &sw(1),
            2,
            PortUpdate { speed: Some(10_000_000_000), ..Default::default() },
        );
        assert_eq!(t.get_port_info(&sw(1), 2).unwrap().speed, 1_000_000_000);
    }

    #[test]
    fn test_switch_enumeration() {
        let t = ring_net();
        assert_eq!(t.switches(), vec![sw(1), sw(2), sw(3), sw(4), sw(5)]);
    }
}
