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

//! The root-controller event loop: inbound local-controller messages, one
//! liveness deadline per controller, the path-composition consolidation
//! window, and the root's own heartbeat, all multiplexed in one task.

use crate::transport::{publish_with_retry, PubSub};
use log::*;
use spindle::proto::{topics, LcToRoot, ROOT_ID};
use spindle::root::{RootController, RootOut};
use spindle::topo::Cid;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    PathComp,
    RootKeepAlive,
    Liveness(Cid),
}

/// The root-controller runtime.
pub struct RootRuntime {
    /// The coordinator core
    pub root: RootController,
    path_comp: Option<Instant>,
    keep_alive: Option<Instant>,
    liveness: BTreeMap<Cid, Instant>,
}

impl RootRuntime {
    /// Wrap a coordinator core.
    pub fn new(root: RootController) -> Self {
        Self { root, path_comp: None, keep_alive: None, liveness: BTreeMap::new() }
    }

    fn next(&self) -> Option<(Instant, Timer)> {
        let mut best: Option<(Instant, Timer)> = None;
        let mut consider = |at: Option<Instant>, timer: Timer| {
            if let Some(at) = at {
                if best.as_ref().map_or(true, |(b, _)| at < *b) {
                    best = Some((at, timer));
                }
            }
        };
        consider(self.path_comp, Timer::PathComp);
        consider(self.keep_alive, Timer::RootKeepAlive);
        for (cid, at) in &self.liveness {
            consider(Some(*at), Timer::Liveness(*cid));
        }
        best
    }

    /// Run the event loop until the shutdown signal flips.
    pub async fn run<T: PubSub>(mut self, mut transport: T, mut shutdown: watch::Receiver<bool>) {
        let mut inbound = transport.subscribe(&[
            topics::DISCOVER,
            topics::TOPO,
            "root.c.inter_domain.*",
        ]);

        self.root.start();
        self.keep_alive =
            Some(Instant::now() + Duration::from_secs_f64(self.root.root_keep_alive_time()));
        self.drain_effects(&mut transport);

        loop {
            let next = self.next();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = inbound.recv() => match msg {
                    Some((topic, payload)) => self.on_message(&topic, &payload),
                    None => break,
                },
                _ = async {
                    match next.as_ref() {
                        Some((at, _)) => sleep_until(*at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some((_, timer)) = next {
                        self.on_timer(timer);
                    }
                }
            }
            self.drain_effects(&mut transport);
        }
        info!("Root controller loop finished");
    }

    fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let msg: LcToRoot = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Could not decode object on {}, skipping: {}", topic, e);
                return;
            }
        };
        let cid = msg.cid();
        self.root.handle_message(msg);
        // every message from a controller restarts its liveness window
        self.liveness.insert(
            cid,
            Instant::now() + Duration::from_secs_f64(self.root.keep_alive_time()),
        );
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::PathComp => {
                self.path_comp = None;
                self.root.compute_inter_domain_paths();
            }
            Timer::RootKeepAlive => {
                self.root.send_root_keep_alive();
                self.keep_alive = Some(
                    Instant::now() + Duration::from_secs_f64(self.root.root_keep_alive_time()),
                );
            }
            Timer::Liveness(cid) => {
                if self.root.keep_alive_expired(cid) {
                    self.liveness.remove(&cid);
                } else {
                    self.liveness.insert(
                        cid,
                        Instant::now() + Duration::from_secs_f64(self.root.keep_alive_time()),
                    );
                }
            }
        }
    }

    fn drain_effects<T: PubSub>(&mut self, transport: &mut T) {
        if self.root.recomp_needed {
            self.root.recomp_needed = false;
            debug!("Initiated path computation consolidation timer!");
            self.path_comp =
                Some(Instant::now() + Duration::from_secs_f64(self.root.path_comp_time()));
        }
        for out in std::mem::take(&mut self.root.outbox) {
            let (topic, payload) = match &out {
                RootOut::ToLc(cid, msg) => (topics::lc(*cid), serde_json::to_vec(msg)),
                RootOut::Broadcast(msg) => (topics::LC_ALL.to_string(), serde_json::to_vec(msg)),
                RootOut::KeepAlive => {
                    (topics::ROOT_KEEP_ALIVE.to_string(), serde_json::to_vec(ROOT_ID))
                }
            };
            match payload {
                Ok(payload) => {
                    if let Err(e) = publish_with_retry(transport, &topic, payload) {
                        error!("{}", e);
                    }
                }
                Err(e) => error!("Could not encode message for {}: {}", topic, e),
            }
        }
    }
}
