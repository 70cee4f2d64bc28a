//! Redirect rule types

use crate::{Error, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Rule kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Match destination IP CIDR
    Cidr,
    /// Match destination domain
    Domain,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Cidr => write!(f, "CIDR"),
            RuleKind::Domain => write!(f, "domain"),
        }
    }
}

/// Normalized redirect selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Network address, host bits cleared
    Cidr(IpNet),
    /// Lower-cased domain
    Domain(String),
}

impl Target {
    /// Build a target from user input where exactly one of the two is set
    pub fn resolve(cidr: Option<&str>, domain: Option<&str>) -> Result<Self> {
        let cidr = cidr.map(str::trim).filter(|v| !v.is_empty());
        let domain = domain.map(str::trim).filter(|v| !v.is_empty());
        match (cidr, domain) {
            (Some(_), Some(_)) => {
                Err(Error::invalid_rule("specify only one of --cidr or --domain"))
            }
            (None, None) => Err(Error::invalid_rule("--cidr or --domain is required")),
            (Some(cidr), None) => Ok(Target::Cidr(normalize_cidr(cidr)?)),
            (None, Some(domain)) => Ok(Target::Domain(normalize_domain(domain)?)),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Target::Cidr(_) => RuleKind::Cidr,
            Target::Domain(_) => RuleKind::Domain,
        }
    }

    /// Canonical string value
    pub fn value(&self) -> String {
        match self {
            Target::Cidr(net) => net.to_string(),
            Target::Domain(domain) => domain.clone(),
        }
    }

    /// Whether `ip` falls inside this target (always false for domains)
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            Target::Cidr(net) => net.contains(ip),
            Target::Domain(_) => false,
        }
    }

    /// Same kind and value, domains compared case-insensitively
    pub fn same_as(&self, other: &Target) -> bool {
        match (self, other) {
            (Target::Cidr(a), Target::Cidr(b)) => a == b,
            (Target::Domain(a), Target::Domain(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.value())
    }
}

/// A redirect steering a CIDR or domain to an endpoint outbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredRule", into = "StoredRule")]
pub struct RedirectRule {
    pub target: Target,
    pub outbound_tag: String,
}

impl RedirectRule {
    pub fn new(target: Target, outbound_tag: impl Into<String>) -> Self {
        RedirectRule {
            target,
            outbound_tag: outbound_tag.into(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.target.kind()
    }

    pub fn value(&self) -> String {
        self.target.value()
    }

    /// Whether the rule is bound to `tag` (case-insensitive)
    pub fn routes_via(&self, tag: &str) -> bool {
        self.outbound_tag.trim().eq_ignore_ascii_case(tag.trim())
    }
}

/// On-disk shape: `{"cidr": ..., "outbound_tag": ...}` or `{"domain": ..., ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
    #[serde(default)]
    outbound_tag: String,
}

impl TryFrom<StoredRule> for RedirectRule {
    type Error = Error;

    fn try_from(raw: StoredRule) -> Result<Self> {
        let target = Target::resolve(raw.cidr.as_deref(), raw.domain.as_deref())?;
        Ok(RedirectRule {
            target,
            outbound_tag: raw.outbound_tag.trim().to_string(),
        })
    }
}

impl From<RedirectRule> for StoredRule {
    fn from(rule: RedirectRule) -> Self {
        let (cidr, domain) = match rule.target {
            Target::Cidr(net) => (Some(net.to_string()), None),
            Target::Domain(domain) => (None, Some(domain)),
        };
        StoredRule {
            cidr,
            domain,
            outbound_tag: rule.outbound_tag,
        }
    }
}

/// Parse a CIDR and clear its host bits
pub fn normalize_cidr(value: &str) -> Result<IpNet> {
    let clean = value.trim();
    if clean.is_empty() {
        return Err(Error::invalid_rule("--cidr is required"));
    }
    let net: IpNet = clean
        .parse()
        .map_err(|e| Error::invalid_rule(format!("invalid CIDR {:?}: {}", value, e)))?;
    Ok(net.trunc())
}

/// Lower-case a domain and reject embedded whitespace
pub fn normalize_domain(value: &str) -> Result<String> {
    let clean = value.trim();
    if clean.is_empty() {
        return Err(Error::invalid_rule("--domain is required"));
    }
    if clean.chars().any(char::is_whitespace) {
        return Err(Error::invalid_rule(format!("invalid domain {:?}", value)));
    }
    Ok(clean.to_ascii_lowercase())
}

/// Host-sized network for a literal address (`/32` or `/128`)
pub fn host_cidr(address: &str) -> Option<IpNet> {
    let ip: IpAddr = address.trim().parse().ok()?;
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, prefix).ok()
}
