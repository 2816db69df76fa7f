//! CIDR-table country resolver.
//!
//! Loads a JSON map of CIDR network -> ISO country code from the configured
//! file and answers lookups by most-specific matching prefix. This keeps the
//! resolver boundary self-contained; deployments with a full GeoIP database
//! implement [`GeoResolver`] against it instead.
use std::{collections::HashMap, net::IpAddr, path::Path, str::FromStr};

use eyre::{Context, Result, eyre};

use crate::ports::GeoResolver;

/// CIDR network representation.
#[derive(Debug, Clone)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, String> {
        match addr {
            IpAddr::V4(_) if prefix_len > 32 => {
                return Err("IPv4 prefix length must be <= 32".to_string());
            }
            IpAddr::V6(_) if prefix_len > 128 => {
                return Err("IPv6 prefix length must be <= 128".to_string());
            }
            _ => {}
        }
        Ok(Self { addr, prefix_len })
    }

    /// Parse from CIDR notation (e.g. "192.168.1.0/24"); a bare address is a
    /// host network (/32 or /128).
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some((ip_str, prefix_str)) = s.split_once('/') {
            let addr = IpAddr::from_str(ip_str).map_err(|e| format!("invalid IP address: {e}"))?;
            let prefix_len: u8 = prefix_str
                .parse()
                .map_err(|e| format!("invalid prefix length: {e}"))?;
            Self::new(addr, prefix_len)
        } else {
            let addr = IpAddr::from_str(s).map_err(|e| format!("invalid IP address: {e}"))?;
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Ok(Self { addr, prefix_len })
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u32 << (32 - self.prefix_len)
                };
                (u32::from(net) & mask) == (u32::from(addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    !0u128 << (128 - self.prefix_len)
                };
                (u128::from(net) & mask) == (u128::from(addr) & mask)
            }
            _ => false,
        }
    }
}

/// Country lookup over an ordered list of CIDR networks.
pub struct CidrGeoResolver {
    // Sorted most-specific-first so the first hit wins.
    networks: Vec<(IpNetwork, String)>,
}

impl CidrGeoResolver {
    /// Load from a JSON object file: `{"10.0.0.0/8": "us", "2a01::/16": "de"}`.
    /// A missing or unreadable file is fatal at startup, matching the other
    /// configuration errors.
    pub fn from_file(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(eyre!("geo table file is empty"));
        }
        if !Path::new(path).exists() {
            return Err(eyre!("geo table file does not exist: {path}"));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read geo table {path}"))?;
        let table: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse geo table {path}"))?;
        tracing::info!("geo table loaded from {path}: {} networks", table.len());
        Self::from_table(table)
    }

    pub fn from_table(table: HashMap<String, String>) -> Result<Self> {
        let mut networks = Vec::with_capacity(table.len());
        for (cidr, country) in table {
            let network = IpNetwork::parse(&cidr)
                .map_err(|e| eyre!("bad geo table entry {cidr:?}: {e}"))?;
            networks.push((network, country.to_lowercase()));
        }
        networks.sort_by(|a, b| b.0.prefix_len().cmp(&a.0.prefix_len()));
        Ok(Self { networks })
    }
}

impl GeoResolver for CidrGeoResolver {
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        let hit = self
            .networks
            .iter()
            .find(|(network, _)| network.contains(ip))
            .map(|(_, country)| country.clone());
        if hit.is_none() {
            tracing::debug!("no geo entry for {ip}");
        }
        hit
    }
}
