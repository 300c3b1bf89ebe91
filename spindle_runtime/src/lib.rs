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

//! # Spindle runtime
//!
//! Hosts the two controller cores in cooperative event loops: one tokio
//! task per controller, timers expressed as deadlines inside a `select!`
//! loop (re-arming a timer replaces its deadline, cancellation drops it),
//! and a topic-routed pub/sub transport between them. All shared mutable
//! state is owned by exactly one loop; the loops interact only through
//! messages, exactly as the cores expect.

pub mod config;
pub mod lc;
pub mod rc;
pub mod transport;

pub use config::LcConfig;
pub use lc::{LocalRuntime, LoggingSwitch, RoleCmd};
pub use rc::RootRuntime;
pub use transport::{InProcBroker, PubSub};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while bringing a controller runtime up
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The configuration file could not be read
    #[error("Cannot read config file {0}: {1}")]
    ConfigRead(PathBuf, #[source] std::io::Error),
    /// The configuration file could not be parsed
    #[error("Cannot parse config file {0}: {1}")]
    ConfigParse(PathBuf, #[source] serde_json::Error),
}
