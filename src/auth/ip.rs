//! Source-address filtering for the authorization webhook.

use std::net::IpAddr;

use crate::{HeimdallError, Result};

/// Network rule: either a CIDR block or one exact address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRule {
    Cidr { network: IpAddr, prefix: u8 },
    Exact(IpAddr),
}

impl NetworkRule {
    /// Parse `a.b.c.d/n`, `x::y/n` or a bare address.
    pub fn parse(rule: &str) -> Result<Self> {
        let rule = rule.trim();
        let invalid =
            |why: &str| HeimdallError::Configuration(format!("network rule {rule:?}: {why}"));

        match rule.split_once('/') {
            Some((network, prefix)) => {
                let network: IpAddr = network
                    .trim()
                    .parse()
                    .map_err(|_| invalid("network is not an IP address"))?;
                let prefix: u8 = prefix
                    .trim()
                    .parse()
                    .map_err(|_| invalid("prefix is not a number"))?;
                let max = if network.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(invalid("prefix too long for address family"));
                }
                Ok(NetworkRule::Cidr { network, prefix })
            }
            None => rule
                .parse()
                .map(NetworkRule::Exact)
                .map_err(|_| invalid("not an IP address")),
        }
    }

    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = unmap(ip);
        match *self {
            NetworkRule::Exact(addr) => unmap(addr) == ip,
            NetworkRule::Cidr { network, prefix } => match (unmap(network), ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
                    u32::from(net) & mask == u32::from(ip) & mask
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
                    u128::from(net) & mask == u128::from(ip) & mask
                }
                _ => false,
            },
        }
    }
}

/// `::ffff:a.b.c.d` compares as `a.b.c.d`.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Addresses permitted to call the authorization webhook.
///
/// An empty set (no allow-list, no network rule) permits everyone. That is
/// the development-mode escape hatch; production configs set at least one.
#[derive(Debug, Clone, Default)]
pub struct AllowedSources {
    allow_list: Vec<String>,
    network: Option<NetworkRule>,
}

impl AllowedSources {
    /// Permit every caller.
    pub fn permit_all() -> Self {
        Self::default()
    }

    /// Build from raw configuration values. Blank allow-list entries are ignored.
    pub fn from_config<S: AsRef<str>>(allow_list: &[S], network: Option<&str>) -> Result<Self> {
        let allow_list = allow_list
            .iter()
            .map(|ip| ip.as_ref().trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        let network = match network.map(str::trim) {
            Some(rule) if !rule.is_empty() => Some(NetworkRule::parse(rule)?),
            _ => None,
        };
        Ok(Self {
            allow_list,
            network,
        })
    }

    pub fn is_permit_all(&self) -> bool {
        self.allow_list.is_empty() && self.network.is_none()
    }

    /// Whether `source_ip` may call the webhook. `None` (no resolvable
    /// address) is only allowed when the set is empty.
    pub fn is_allowed(&self, source_ip: Option<&str>) -> bool {
        if self.is_permit_all() {
            return true;
        }
        let Some(source_ip) = source_ip.map(str::trim) else {
            return false;
        };
        if self.allow_list.iter().any(|ip| ip == source_ip) {
            return true;
        }
        match (&self.network, source_ip.parse::<IpAddr>()) {
            (Some(rule), Ok(ip)) => rule.matches(ip),
            _ => false,
        }
    }
}
