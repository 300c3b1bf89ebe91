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

//! # Topology Graph
//!
//! Weighted directed multigraph of switches, hosts and virtual domain nodes,
//! backed by a per-port adjacency table. Links are encoded as two directed
//! port records whose source and destination fields mirror each other. The
//! graph carries a `stale` bit: every mutator sets it, and the shortest-path
//! entry point rebuilds the edge index in one pass before running Dijkstra.
//!
//! Port records also hold the per-port telemetry (speed, host addresses, and
//! two counter buckets: totals since switch boot and deltas for the last
//! poll), which the traffic-engineering layer reads and adjusts.

mod graph;
mod types;

pub use graph::Topology;
pub use types::{
    Cid, CounterUpdate, Dpid, Hop, LinkWeight, NodeId, PortCounters, PortInfo, PortNo, PortUpdate,
    TopoError, BLOCKED_COST, DEFAULT_COST, HOST_PORT,
};
