//! Geo resolution via country zone files.
//!
//! Every `*.zone` file under the zones directory holds one CIDR per line;
//! the file stem is the ISO-3166 alpha-2 country code. All prefixes load
//! into a single list sorted by descending prefix length, so the first
//! containing prefix is the longest match. A separate file lists the
//! country codes to block.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, warn};

/// Country returned when no prefix contains an address.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Longest-prefix-match resolver from CIDR to country.
pub struct GeoResolver {
    /// Sorted by descending prefix length.
    prefixes: Vec<(IpNet, String)>,
    blocked_countries: HashSet<String>,
}

impl GeoResolver {
    /// Load zone files and the blocked-country list. Missing inputs yield
    /// an empty resolver; malformed lines are skipped with a warning.
    pub fn load(zones_dir: &Path, blocked_countries_path: &Path) -> Self {
        let mut prefixes = Vec::new();

        match std::fs::read_dir(zones_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("zone") {
                        continue;
                    }
                    let country = match path.file_stem().and_then(|s| s.to_str()) {
                        Some(stem) => stem.to_uppercase(),
                        None => continue,
                    };
                    let content = match std::fs::read_to_string(&path) {
                        Ok(content) => content,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "unreadable zone file");
                            continue;
                        }
                    };
                    for line in content.lines() {
                        let line = line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        match line.parse::<IpNet>() {
                            Ok(net) => prefixes.push((net, country.clone())),
                            Err(_) => {
                                warn!(
                                    path = %path.display(),
                                    line = %line,
                                    "skipping malformed CIDR"
                                );
                            }
                        }
                    }
                }
            }
            Err(_) => {
                info!(path = %zones_dir.display(), "zones directory not found, geo lookups disabled");
            }
        }

        // Longest prefix first; ties keep file order.
        prefixes.sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));

        let blocked_countries = read_country_file(blocked_countries_path);

        info!(
            prefixes = prefixes.len(),
            blocked_countries = blocked_countries.len(),
            "geo resolver loaded"
        );

        Self {
            prefixes,
            blocked_countries,
        }
    }

    /// An empty resolver: everything resolves to Unknown, nothing blocked.
    pub fn empty() -> Self {
        Self {
            prefixes: Vec::new(),
            blocked_countries: HashSet::new(),
        }
    }

    /// Country of the longest prefix containing `addr`, or
    /// [`UNKNOWN_COUNTRY`].
    pub fn country_of(&self, addr: IpAddr) -> &str {
        for (net, country) in &self.prefixes {
            if net.contains(&addr) {
                return country;
            }
        }
        UNKNOWN_COUNTRY
    }

    /// Whether `addr` resolves to a blocked country.
    pub fn is_blocked_country(&self, addr: IpAddr) -> bool {
        self.blocked_countries.contains(self.country_of(addr))
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub fn blocked_country_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.blocked_countries.iter().cloned().collect();
        codes.sort();
        codes
    }
}

/// One ISO code per line, upper-cased; `#` comments and blanks skipped.
fn read_country_file(path: &Path) -> HashSet<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return HashSet::new(),
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_uppercase)
        .collect()
}
