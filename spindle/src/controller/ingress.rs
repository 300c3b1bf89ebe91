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

//! Ingress-change detection for inter-domain paths.
//!
//! When an upstream domain fails over, traffic for a pair may start arriving
//! on an alternate boundary port. Each alternate carries a rule that keeps
//! forwarding the packet normally while submitting a rate-limited copy (one
//! packet per second through a drop meter) to the controller. The resulting
//! packet-in swaps the pair's ingress (and, on transit segments, its
//! egress), migrates the detection rule to the previous ingress, and
//! notifies the root controller. A short lockout absorbs in-flight packets
//! that would otherwise swap the pair straight back.

use super::ProtectionController;
use crate::gid::Gid;
use crate::path_info::{Endpoint, PairKey};
use crate::proto::{LcToRoot, SegmentEnd};
use crate::protect::group_table_to_path;
use crate::switch::{rules, SwitchCtl, SwitchOp};
use crate::topo::{Dpid, PortNo};
use log::*;

impl<S: SwitchCtl> ProtectionController<S> {
    /// Arm the per-pair ingress-change lockout; the runtime owns the
    /// 2-second timer and calls [`Self::expire_ing_change_wait`] on expiry.
    pub(crate) fn arm_ing_change_wait(&mut self, hkey: &PairKey) {
        self.ing_change_wait.insert(hkey.clone());
        self.lockout_requests.push(hkey.clone());
    }

    /// The lockout timer of a pair expired.
    pub fn expire_ing_change_wait(&mut self, hkey: &PairKey) {
        self.ing_change_wait.remove(hkey);
        info!("Ingress Change Wait Expired for {}-{}", hkey.0, hkey.1);
    }

    /// True while the pair is in its post-swap lockout.
    pub fn is_ing_change_wait(&self, hkey: &PairKey) -> bool {
        self.ing_change_wait.contains(hkey)
    }

    /// Install the two-table detection rule set on an alternate ingress
    /// port: table 0 forwards normally and branches to table 1, where the
    /// metered copy goes to the controller.
    pub(crate) fn install_ingress_change_detect(
        &mut self,
        in_port: PortNo,
        hkey: &PairKey,
        dpid: Dpid,
    ) {
        if !self.switches.connected(dpid) {
            info!("Can't find switch {}", dpid);
            return;
        }

        // swaps triggered by packets still in flight are suppressed for a
        // moment after (re)installing a detector
        self.arm_ing_change_wait(hkey);

        let (gid, on_egress, eth) = match self.paths.get(hkey) {
            Some(info) => (
                info.gid,
                matches!(info.egress, Some(Endpoint::Local(eg)) if eg == dpid),
                info.eth.clone(),
            ),
            None => return,
        };

        self.switches
            .send(dpid, rules::ingress_change_table0(gid, in_port, on_egress, eth.as_deref()));
        self.switches.send(dpid, SwitchOp::MeterAdd { mid: u32::from(gid), pps: 1 });
        self.switches.send(dpid, rules::ingress_change_table1(gid));
        info!("Added ingress change rule for sw {} port {}", dpid, in_port);
    }

    /// Remove an installed detection rule set.
    pub(crate) fn delete_ingress_change_detect(&mut self, in_port: PortNo, gid: Gid, dpid: Dpid) {
        if !self.switches.connected(dpid) {
            info!("Can't find switch {}", dpid);
            return;
        }

        let vlan_match =
            crate::switch::Match { vlan: Some(gid), ..Default::default() };
        self.switches.send(
            dpid,
            SwitchOp::FlowDel {
                table_id: Some(1),
                match_: Some(vlan_match),
                out_port: None,
                out_group: None,
            },
        );
        self.switches.send(dpid, SwitchOp::MeterDel { mid: Some(u32::from(gid)) });
        let t0_match = crate::switch::Match {
            in_port: Some(in_port),
            vlan: Some(gid),
            ..Default::default()
        };
        self.switches.send(
            dpid,
            SwitchOp::FlowDel {
                table_id: Some(0),
                match_: Some(t0_match),
                out_port: None,
                out_group: Some(gid),
            },
        );
        info!("Delete ingress change rule for sw {} port {}", dpid, in_port);
    }

    /// A detection rule fired: traffic for the pair identified by `vid` now
    /// arrives on `(sw, pn)`. Swap the stored ingress (and egress on transit
    /// segments), migrate the detector to the previous ingress, and notify
    /// the root controller.
    pub fn ingress_changed(&mut self, vid: Gid, sw: Dpid, pn: PortNo) {
        info!("INGRESS_CHANGE_DETECT_PKT");
        let hkey = match self.gid_map.reverse(vid, self.cfg.gid_hosts) {
            Some(hkey) => hkey,
            None => {
                error!("Could not find host pair for ingress change detection VID {}", vid);
                return;
            }
        };

        if self.is_ing_change_wait(&hkey) {
            return;
        }

        let path_info = match self.paths.get(&hkey) {
            Some(info) => info.clone(),
            None => return,
        };

        // the effective path from the new ingress gives the new egress
        let new_ingress_ep = Endpoint::Boundary(sw, pn);
        let path = match group_table_to_path(&path_info, &self.graph, &new_ingress_ep, None, None, &hkey)
        {
            Ok(path) if !path.is_empty() => path,
            Ok(_) => return,
            Err(e) => {
                error!("Can't trace path for ingress change of {:?}: {}", hkey, e);
                return;
            }
        };
        let last = path.last().expect("path is non-empty");
        let new_egress = match last.from.switch() {
            Some(dpid) => Endpoint::Boundary(dpid, last.out_port),
            None => return,
        };

        let gid = path_info.gid;
        let old_ingress = path_info.ingress.clone();
        let new_ingress = Endpoint::Boundary(sw, pn);
        let old_egress = path_info.egress.clone();

        if old_ingress.as_ref() == Some(&new_ingress) {
            return;
        }

        if let Some(entry) = self.paths.get_mut(&hkey) {
            entry.ingress = Some(new_ingress.clone());
        }
        info!("Modified ingress of {:?} from {:?} to {:?}", hkey, old_ingress, new_ingress);
        if matches!(old_egress, Some(Endpoint::Boundary(_, _))) {
            if let Some(entry) = self.paths.get_mut(&hkey) {
                entry.egress = Some(new_egress.clone());
            }
            info!("Modified egress of {:?} from {:?} to {:?}", hkey, old_egress, new_egress);
        }

        // move the detection rule from the new ingress back onto the old one
        self.delete_ingress_change_detect(pn, gid, sw);
        if let Some(entry) = self.paths.get_mut(&hkey) {
            entry.ingress_change_detect.retain(|e| *e != (sw, pn));
        }
        if let Some(Endpoint::Boundary(old_sw, old_pn)) = &old_ingress {
            if let Some(entry) = self.paths.get_mut(&hkey) {
                entry.ingress_change_detect.push((*old_sw, *old_pn));
            }
            self.install_ingress_change_detect(*old_pn, &hkey, *old_sw);
        }

        self.notify_ingress_change(&hkey, &old_ingress, &new_ingress, &old_egress, &new_egress);
    }

    /// Rewrite the stored instruction list after an ingress swap and push
    /// the updated list to the root controller.
    fn notify_ingress_change(
        &mut self,
        hkey: &PairKey,
        old_ingress: &Option<Endpoint>,
        new_ingress: &Endpoint,
        old_egress: &Option<Endpoint>,
        new_egress: &Endpoint,
    ) {
        let instructions = match self.inter_dom_paths.get_mut(hkey) {
            Some(instructions) if !instructions.is_empty() => instructions,
            _ => return,
        };

        let swap_ends = |a: &Option<Endpoint>, b: &Endpoint| -> Option<(SegmentEnd, SegmentEnd)> {
            let old = a.as_ref().and_then(|e| e.boundary())?;
            let new = b.boundary()?;
            Some((SegmentEnd::Link(old.0, old.1), SegmentEnd::Link(new.0, new.1)))
        };

        if let Some((old_in, new_in)) = swap_ends(old_ingress, new_ingress) {
            for instruction in instructions.iter_mut() {
                if instruction.input == new_in {
                    instruction.input = old_in.clone();
                } else if instruction.input == old_in {
                    instruction.input = new_in.clone();
                }
            }
        }
        if matches!(old_egress, Some(Endpoint::Boundary(_, _))) {
            if let Some((old_out, new_out)) = swap_ends(old_egress, new_egress) {
                for instruction in instructions.iter_mut() {
                    if instruction.output == new_out {
                        instruction.output = old_out.clone();
                    } else if instruction.output == old_out {
                        instruction.output = new_out.clone();
                    }
                }
            }
        }

        let new_paths = instructions.clone();
        self.outbox.push(LcToRoot::IngressChange {
            cid: self.cid,
            hkey: hkey.clone(),
            new_paths,
        });
    }
}
