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

//! Local-controller configuration, grouped the way the deployment files
//! group it. Every key has a default so a partial (or missing) file works.

use crate::RuntimeError;
use serde::Deserialize;
use spindle::controller::ProtectCfg;
use spindle::te::{OptiMethod, TeConfig};
use std::str::FromStr;

/// Statistics collection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// Query and collect stats from the switches
    pub collect: bool,
    /// Collect and process port counters
    pub collect_port: bool,
    /// Poll interval in seconds (0.5 to 600)
    pub interval: f64,
    /// Include port counters in stats output
    pub out_port: bool,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self { collect: true, collect_port: true, interval: 10.0, out_port: false }
    }
}

/// Multi-controller settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiCtrlSection {
    /// Start the inter-controller communication module
    pub start_com: bool,
    /// Identifier of the domain this controller owns
    pub domain_id: u64,
    /// Instance identifier; random when absent
    pub inst_id: Option<u64>,
}

impl Default for MultiCtrlSection {
    fn default() -> Self {
        Self { start_com: true, domain_id: 0, inst_id: None }
    }
}

/// Application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSection {
    /// Path to the static port description file, empty for none
    pub static_port_desc: String,
    /// Recompute protection paths when failures mutate the topology
    pub optimise_protection: bool,
    /// Compute loose instead of strict path splices
    pub loose_splice: bool,
}

impl Default for ApplicationSection {
    fn default() -> Self {
        Self { static_port_desc: String::new(), optimise_protection: true, loose_splice: false }
    }
}

/// Traffic-engineering settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeSection {
    /// A port is congested above this fraction of its speed
    pub utilisation_threshold: f64,
    /// Congestion consolidation window in seconds
    pub consolidate_time: f64,
    /// Resolution method: FirstSol, BestSolUsage, BestSolPLen, CSPFRecomp
    pub opti_method: String,
    /// Consider heavy-hitter candidates first
    pub candidate_sort_rev: bool,
    /// Reverse the potential-path metric sort
    pub pot_path_sort_rev: bool,
    /// Accept partial solutions (over threshold, no loss)
    pub partial_accept: bool,
}

impl Default for TeSection {
    fn default() -> Self {
        Self {
            utilisation_threshold: 0.90,
            consolidate_time: 1.0,
            opti_method: "FirstSol".to_string(),
            candidate_sort_rev: true,
            pot_path_sort_rev: false,
            partial_accept: false,
        }
    }
}

/// The complete local-controller configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LcConfig {
    /// Statistics collection
    pub stats: StatsSection,
    /// Multi-controller coordination
    pub multi_ctrl: MultiCtrlSection,
    /// Application behaviour
    pub application: ApplicationSection,
    /// Traffic engineering
    pub te: TeSection,
}

impl LcConfig {
    /// Load a configuration file (JSON). A missing path yields defaults.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, RuntimeError> {
        let path = match path {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::ConfigRead(path.to_path_buf(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| RuntimeError::ConfigParse(path.to_path_buf(), e))
    }

    /// The protection-core configuration this file describes.
    pub fn protect_cfg(&self) -> ProtectCfg {
        ProtectCfg {
            loose_splice: self.application.loose_splice,
            optimise_protection: self.application.optimise_protection,
            poll_interval: self.stats.interval.max(0.5),
            te_thresh: self.te.utilisation_threshold,
            ..Default::default()
        }
    }

    /// The TE-optimizer configuration this file describes. An unknown
    /// method name falls back to `FirstSol`.
    pub fn te_cfg(&self) -> TeConfig {
        let opti_method = OptiMethod::from_str(&self.te.opti_method).unwrap_or_else(|e| {
            log::warn!("{}, falling back to FirstSol", e);
            OptiMethod::FirstSol
        });
        TeConfig {
            utilisation_threshold: self.te.utilisation_threshold,
            consolidate_time: self.te.consolidate_time,
            opti_method,
            candidate_sort_rev: self.te.candidate_sort_rev,
            pot_path_sort_rev: self.te.pot_path_sort_rev,
            partial_accept: self.te.partial_accept,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LcConfig::default();
        assert!(cfg.stats.collect);
        assert_eq!(cfg.stats.interval, 10.0);
        assert_eq!(cfg.te.opti_method, "FirstSol");
        assert!(!cfg.application.loose_splice);
    }

    #[test]
    fn test_partial_file() {
        let cfg: LcConfig = serde_json::from_str(
            r#"{"multi_ctrl": {"domain_id": 3}, "te": {"opti_method": "CSPFRecomp"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.multi_ctrl.domain_id, 3);
        assert_eq!(cfg.te_cfg().opti_method, OptiMethod::CspfRecomp);
        // untouched groups keep their defaults
        assert!(cfg.stats.collect_port);
    }
}
