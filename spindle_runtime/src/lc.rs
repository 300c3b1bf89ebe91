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

//! The local-controller event loop.
//!
//! One cooperative task owns the protection core and the TE optimizer.
//! Inbound root messages, switch events and timer expiries are multiplexed
//! through a single `select!`; every timer is a plain deadline (re-arming
//! replaces the deadline, cancelling drops it, both idempotent).
//! After every reaction the core's effects are drained: outbox messages go
//! to the transport, the dirty flag re-arms the topology debounce, lockout
//! requests arm their per-pair timers.

use crate::config::LcConfig;
use crate::transport::{publish_with_retry, PubSub};
use log::*;
use rand::Rng;
use spindle::controller::{ProtectionController, RecomputeOutcome};
use spindle::path_info::PairKey;
use spindle::proto::{topics, CtrlMsg};
use spindle::switch::{SwitchCtl, SwitchEvent, SwitchOp};
use spindle::te::TeOptimizer;
use spindle::topo::Dpid;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

/// Seconds a topology mutation is debounced before paths recompute
const TOPO_DEBOUNCE_SECS: f64 = 2.0;
/// Seconds of the per-pair ingress-change lockout
const ING_CHANGE_LOCKOUT_SECS: f64 = 2.0;
/// Seconds between unknown-link resolution rounds
const UNKNOWN_LINK_SECS: f64 = 1.0;

/// Role directives from the (external) election mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleCmd {
    /// Take the master role
    Master,
    /// Fall back to slave
    Slave,
}

/// A [`SwitchCtl`] for deployments where the switch protocol collaborator
/// runs out of process: emitted operations are logged, connectivity is
/// tracked from switch-enter events.
#[derive(Debug, Default)]
pub struct LoggingSwitch {
    connected: BTreeSet<Dpid>,
}

impl LoggingSwitch {
    /// An empty switch surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a switch as connected.
    pub fn connect(&mut self, dpid: Dpid) {
        self.connected.insert(dpid);
    }
}

impl SwitchCtl for LoggingSwitch {
    fn connected(&self, dpid: Dpid) -> bool {
        self.connected.contains(&dpid)
    }

    fn switches(&self) -> Vec<Dpid> {
        self.connected.iter().copied().collect()
    }

    fn send(&mut self, dpid: Dpid, op: SwitchOp) {
        debug!("SW {} <- {:?}", dpid, op);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Timer {
    Debounce,
    TeConsolidate,
    StatsPoll,
    UnknownLinks,
    Lockout(PairKey),
}

#[derive(Default)]
struct Deadlines {
    debounce: Option<Instant>,
    te: Option<Instant>,
    stats: Option<Instant>,
    unknown: Option<Instant>,
    lockouts: BTreeMap<PairKey, Instant>,
}

impl Deadlines {
    fn next(&self) -> Option<(Instant, Timer)> {
        let mut best: Option<(Instant, Timer)> = None;
        let mut consider = |at: Option<Instant>, timer: Timer| {
            if let Some(at) = at {
                if best.as_ref().map_or(true, |(b, _)| at < *b) {
                    best = Some((at, timer));
                }
            }
        };
        consider(self.debounce, Timer::Debounce);
        consider(self.te, Timer::TeConsolidate);
        consider(self.stats, Timer::StatsPoll);
        consider(self.unknown, Timer::UnknownLinks);
        for (pair, at) in &self.lockouts {
            consider(Some(*at), Timer::Lockout(pair.clone()));
        }
        best
    }
}

/// The local-controller runtime: the protection core, the TE optimizer and
/// their timers, driven by one event loop.
pub struct LocalRuntime<S: SwitchCtl> {
    /// The protection core
    pub ctrl: ProtectionController<S>,
    /// The TE optimizer
    pub te: TeOptimizer,
    cfg: LcConfig,
    deadlines: Deadlines,
}

impl<S: SwitchCtl> LocalRuntime<S> {
    /// Build a runtime from a configuration and a switch surface.
    pub fn new(cfg: LcConfig, switches: S) -> Self {
        let inst_id = cfg
            .multi_ctrl
            .inst_id
            .unwrap_or_else(|| rand::thread_rng().gen_range(1..u64::MAX));
        debug!("controller instance id: {}", inst_id);

        let ctrl = ProtectionController::new(cfg.multi_ctrl.domain_id, cfg.protect_cfg(), switches);
        let te = TeOptimizer::new(cfg.te_cfg());
        Self { ctrl, te, cfg, deadlines: Deadlines::default() }
    }

    /// Run the event loop until the shutdown signal flips or every input
    /// channel closes.
    pub async fn run<T: PubSub>(
        mut self,
        mut transport: T,
        mut events: mpsc::UnboundedReceiver<SwitchEvent>,
        mut roles: mpsc::UnboundedReceiver<RoleCmd>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let own_topic = topics::lc(self.ctrl.cid());
        let mut inbound = transport.subscribe(&[own_topic.as_str(), topics::LC_ALL]);

        self.ctrl.send_discover();
        if !self.cfg.multi_ctrl.start_com {
            // no election without the communication module: run as master
            warn!("Multi-controller communications turned off!");
            self.promote();
        }
        self.drain_effects(&mut transport);

        loop {
            let next = self.deadlines.next();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                msg = inbound.recv() => match msg {
                    Some((topic, payload)) => self.on_root_message(&topic, &payload),
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.on_switch_event(event),
                    None => break,
                },
                cmd = roles.recv() => match cmd {
                    Some(RoleCmd::Master) => self.promote(),
                    Some(RoleCmd::Slave) => self.demote(),
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
        info!("Local controller loop finished");
    }

    fn promote(&mut self) {
        self.ctrl.promote_master();
        if self.cfg.stats.collect {
            info!("Restart stats timer");
            self.deadlines.stats =
                Some(Instant::now() + Duration::from_secs_f64(self.ctrl.poll_rate()));
        }
        if self.ctrl.has_unresolved_links() {
            self.deadlines.unknown =
                Some(Instant::now() + Duration::from_secs_f64(UNKNOWN_LINK_SECS));
        }
    }

    fn demote(&mut self) {
        self.ctrl.demote_slave();
        // role demotion cancels the periodic work outright
        self.deadlines.stats = None;
        self.deadlines.te = None;
        self.deadlines.debounce = None;
    }

    fn on_root_message(&mut self, topic: &str, payload: &[u8]) {
        let msg: CtrlMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Could not decode message on {}: {}", topic, e);
                return;
            }
        };
        match msg {
            CtrlMsg::GetTopo => self.ctrl.send_topo(),
            CtrlMsg::UnknownSw { cid, sw, port, dest_sw } => {
                self.ctrl.resolve_unknown_link(sw, port, dest_sw, cid)
            }
            CtrlMsg::ComputePaths { paths } => self.ctrl.handle_compute_paths(paths),
            CtrlMsg::ProcessedCon { sw, port } => self.te.clear_suppression(sw, port),
            CtrlMsg::CtrlDead { cid } => self.ctrl.ctrl_dead(cid),
        }
    }

    fn on_switch_event(&mut self, event: SwitchEvent) {
        match event {
            SwitchEvent::PortStats { dpid, entries } => {
                // the congestion check interposes between telemetry and core
                let samples = self.ctrl.process_port_stats(dpid, entries);
                for sample in samples {
                    if self.te.suppression_tick(sample.dpid, sample.port) {
                        info!("Suppressed con check for idl");
                        continue;
                    }
                    if self.te.check_link_congested(sample.dpid, sample.port, sample.tx_rate) {
                        self.deadlines.te = Some(
                            Instant::now()
                                + Duration::from_secs_f64(self.te.consolidate_time()),
                        );
                    }
                }
            }
            other => self.ctrl.handle_switch_event(other),
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Debounce => {
                self.deadlines.debounce = None;
                if self.ctrl.recompute_paths() == RecomputeOutcome::RebuildInProgress {
                    self.deadlines.debounce =
                        Some(Instant::now() + Duration::from_secs_f64(TOPO_DEBOUNCE_SECS));
                }
            }
            Timer::TeConsolidate => {
                self.deadlines.te = None;
                let te = &mut self.te;
                te.optimise(&mut self.ctrl);
            }
            Timer::StatsPoll => {
                self.ctrl.request_stats();
                self.deadlines.stats =
                    Some(Instant::now() + Duration::from_secs_f64(self.ctrl.poll_rate()));
            }
            Timer::UnknownLinks => {
                self.deadlines.unknown = if self.ctrl.unknown_links_tick() {
                    Some(Instant::now() + Duration::from_secs_f64(UNKNOWN_LINK_SECS))
                } else {
                    None
                };
            }
            Timer::Lockout(pair) => {
                self.deadlines.lockouts.remove(&pair);
                self.ctrl.expire_ing_change_wait(&pair);
            }
        }
    }

    fn drain_effects<T: PubSub>(&mut self, transport: &mut T) {
        if self.ctrl.topo_dirty {
            self.ctrl.topo_dirty = false;
            self.deadlines.debounce =
                Some(Instant::now() + Duration::from_secs_f64(TOPO_DEBOUNCE_SECS));
        }
        for pair in std::mem::take(&mut self.ctrl.lockout_requests) {
            self.deadlines
                .lockouts
                .insert(pair, Instant::now() + Duration::from_secs_f64(ING_CHANGE_LOCKOUT_SECS));
        }
        if self.ctrl.has_unresolved_links() && self.deadlines.unknown.is_none() {
            self.deadlines.unknown =
                Some(Instant::now() + Duration::from_secs_f64(UNKNOWN_LINK_SECS));
        }
        for msg in std::mem::take(&mut self.ctrl.outbox) {
            let topic = msg.topic();
            match serde_json::to_vec(&msg) {
                Ok(payload) => {
                    if let Err(e) = publish_with_retry(transport, topic, payload) {
                        error!("{}", e);
                    }
                }
                Err(e) => error!("Could not encode message for {}: {}", topic, e),
            }
        }
    }
}
