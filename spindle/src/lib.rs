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

#![deny(missing_docs)]

//! # Spindle: Protected Path Forwarding with Hierarchical SDN Controllers
//!
//! Spindle is the core of a hierarchical software-defined-networking control
//! plane. A fleet of local controllers each owns one administrative domain (a
//! set of switches and the hosts attached to them) and pre-installs, for every
//! host pair, a primary path, a minimally overlapping secondary path, and
//! short *splices* between the two, all expressed as fast-failover group
//! tables so the data plane recovers from failures without controller
//! involvement. A single root controller stitches the domains together,
//! composes loop-free inter-domain paths, and pushes per-domain segment
//! instructions back down to the local controllers. On top of both sits a
//! traffic-engineering layer which continuously shifts host pairs away from
//! congested links.
//!
//! ## Structure
//!
//! - **[`topo`]**: The weighted multigraph of switches, hosts and (on the
//!   root) whole domains, together with its shortest-path engine and the
//!   per-port telemetry store. See [`topo::Topology`].
//!
//! - **[`protect`]**: The path algebra. Given a graph and two endpoints it
//!   produces the primary/secondary path pair, the splice map, and the
//!   group-table/flow-rule plan ([`protect::Plan`]) that realises them.
//!
//! - **[`path_info`]**: The per-host-pair forwarding plan record
//!   ([`path_info::PathInfo`]) as installed on the switches, and the store
//!   keyed by ordered host pair.
//!
//! - **[`switch`]**: The abstract switch-programming surface: the data model
//!   of matches, actions, groups and meters, the [`switch::SwitchCtl`]
//!   capability trait, and the rule factories in [`switch::rules`]. The
//!   wire-level protocol encoding lives outside this crate.
//!
//! - **[`controller`]**: The local-controller core
//!   ([`controller::ProtectionController`]): debounced path recomputation,
//!   minimal diffing against installed state, inter-domain segment
//!   installation, ingress-change handling and state rebuild after a role
//!   change.
//!
//! - **[`te`]**: The traffic-engineering optimizer with its four resolution
//!   policies (`FirstSol`, `BestSolUsage`, `BestSolPLen`, `CspfRecomp`).
//!
//! - **[`root`]**: The root-controller core ([`root::RootController`]):
//!   inter-domain topology assembly, loop-free path composition, instruction
//!   emission diffing, liveness tracking and root-side traffic engineering.
//!
//! - **[`proto`]**: The serde message types exchanged between local and root
//!   controllers, together with the pub/sub topic names.
//!
//! The crate is purely synchronous: timers and transports are owned by the
//! runtime crate, which calls into the cores and drains their outboxes. All
//! iteration that influences emitted switch programs runs over ordered
//! containers so that identical inputs produce identical programs on every
//! controller.

// test modules
mod test;

mod error;
pub mod gid;
pub mod path_info;
pub mod printer;
pub mod proto;
pub mod protect;
pub mod root;
pub mod switch;
pub mod te;
pub mod topo;

pub mod controller;

pub use error::{ComError, Error, StateError};
