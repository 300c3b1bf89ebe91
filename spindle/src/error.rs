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

//! Module containing all error types

use crate::path_info::PairKey;
use crate::topo::{NodeId, PortNo, TopoError};
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Error propagated from the topology graph
    #[error("Topology error: {0}")]
    Topo(#[from] TopoError),
    /// Error propagated from installed-state handling
    #[error("State error: {0}")]
    State(#[from] StateError),
    /// Error propagated from inter-controller communication
    #[error("Communication error: {0}")]
    Com(#[from] ComError),
    /// Attempt to program a switch that is not connected. Transient; the
    /// next topology-change cycle retries.
    #[error("Switch {0} is not connected")]
    SwitchUnreachable(u64),
}

/// Errors raised while diffing, walking or rebuilding installed switch state
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    /// A group-table entry held something that is not a plain port. Splice
    /// tuples live in the special-flow table; finding one here is fatal for
    /// the operation and must never be coerced.
    #[error("Group table of {0} holds a non-port entry")]
    StateInconsistency(NodeId),
    /// Walking the group tables revisited a switch; the installed path has
    /// degenerated into a loop.
    #[error("Group walk for pair {0:?} loops at {1}")]
    DegeneratePath(PairKey, NodeId),
    /// Walking the group tables reached a switch with neither a group entry
    /// nor a matching special flow.
    #[error("Group walk for pair {0:?} ends abruptly at {1} (in port {2})")]
    AbruptEnd(PairKey, NodeId, PortNo),
    /// The pair has no group entries to walk (same-switch special case).
    #[error("Pair {0:?} has no group entries")]
    EmptyGroups(PairKey),
    /// Group inversion was asked to promote a port that is not an alternate
    /// of the group.
    #[error("Cannot invert group of pair {0:?}: port {2} not in group at switch {1}")]
    GroupSwapInvalid(PairKey, u64, PortNo),
    /// Not every switch answered the state queries before the rebuild
    /// deadline; partial state is discarded.
    #[error("State rebuild timed out with {0} switches outstanding")]
    StateRebuildTimeout(usize),
}

/// Errors raised at the inter-controller communication boundary
#[derive(Debug, Error)]
pub enum ComError {
    /// Publishing on the transport failed even after the channel was torn
    /// down and reopened once.
    #[error("Failed to publish on topic {0}")]
    SendFailed(String),
    /// An inbound payload could not be decoded; the message is dropped.
    #[error("Failed to decode inbound payload on topic {0}: {1}")]
    DecodeFailed(String, String),
    /// An inter-domain instruction was missing an expected boundary tuple;
    /// the segment is ignored.
    #[error("Malformed instruction for pair {0:?}")]
    PeerInstructionMalformed(PairKey),
}
