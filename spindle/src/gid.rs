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

//! # Group identifier derivation
//!
//! Every host pair owns one 16-bit identifier used both as the VLAN VID in
//! the data plane and as the group id in the switch group tables. The id is
//! derived from the decimal suffixes of the two host names with
//! `gid(i, j) = (i - 1) * (N - 1) + (j if j < i else j - 1)` for a nominal
//! fleet size of `N` hosts, so it survives a controller restart and can be
//! recovered from the wire headers during state rebuild. The inverse mapping
//! is built lazily and cached.

use std::collections::HashMap;

/// Group and VLAN identifier of one host pair
pub type Gid = u16;

/// Nominal fleet size the identifier scheme is dimensioned for
pub const GID_HOSTS: u32 = 64;

/// Extract the first run of decimal digits from a host name.
fn host_number(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String =
        name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Compute the GID of an ordered host pair, or `None` when either name
/// carries no decimal suffix.
pub fn gid(host_1: &str, host_2: &str, n: u32) -> Option<Gid> {
    let h1 = host_number(host_1)?;
    let h2 = host_number(host_2)?;
    if h1 == 0 || h2 == 0 {
        return None;
    }

    let dh2 = if h2 > h1 { h2 - 1 } else { h2 };
    Some(((h1 - 1) * (n - 1) + dh2) as Gid)
}

/// Lazily built inverse of the GID formula. The table covers every ordered
/// pair of the nominal fleet and is computed once, on first use.
#[derive(Debug, Clone, Default)]
pub struct GidMap {
    map: HashMap<Gid, (String, String)>,
}

impl GidMap {
    /// Create an empty (not yet built) reverse table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a GID back to its host pair, building the table on first use.
    pub fn reverse(&mut self, gid_val: Gid, n: u32) -> Option<(String, String)> {
        if self.map.is_empty() {
            for i in 1..=n {
                for q in 1..=n {
                    if i == q {
                        continue;
                    }
                    let h1 = format!("h{}", i);
                    let h2 = format!("h{}", q);
                    if let Some(g) = gid(&h1, &h2, n) {
                        self.map.insert(g, (h1, h2));
                    }
                }
            }
        }
        self.map.get(&gid_val).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gid_formula() {
        assert_eq!(gid("h1", "h2", 64), Some(1));
        assert_eq!(gid("h2", "h1", 64), Some(64));
        assert_eq!(gid("h1", "h64", 64), Some(63));
        assert_eq!(gid("h64", "h1", 64), Some(63 * 63 + 1));
    }

    #[test]
    fn test_gid_no_digits() {
        assert_eq!(gid("alpha", "h2", 64), None);
        assert_eq!(gid("h1", "beta", 64), None);
    }

    #[test]
    fn test_gid_digit_run() {
        assert_eq!(gid("host12x3", "h2", 64), gid("h12", "h2", 64));
    }

    #[test]
    fn test_gid_bijection() {
        // every ordered pair round-trips through the reverse table
        let mut map = GidMap::new();
        for i in 1..=16u32 {
            for j in 1..=16u32 {
                if i == j {
                    continue;
                }
                let h1 = format!("h{}", i);
                let h2 = format!("h{}", j);
                let g = gid(&h1, &h2, 64).unwrap();
                assert_eq!(map.reverse(g, 64), Some((h1, h2)));
            }
        }
    }

    #[test]
    fn test_gid_fits_vlan_range() {
        // the largest pair of the nominal fleet still fits a 12-bit VID
        let max = gid("h64", "h63", 64).unwrap();
        assert!(max < 4096);
    }
}
