//! Forward rule allocator
//!
//! A forward is a local dokodemo-door listener relaying to a fixed remote
//! `ip:port`. Listen ports are unique per installation and must be free at
//! the OS level when the rule is created.

mod probe;

pub use probe::{check_port, find_available_port};

use crate::common::naming::forward_tag;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Listen address used when none is given
pub const DEFAULT_LISTEN_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// First port probed when no listen port is given
pub const DEFAULT_BASE_PORT: u16 = 53331;

/// Transports accepted by a forward listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    #[default]
    Both,
}

impl Protocol {
    pub fn requires_tcp(self) -> bool {
        !matches!(self, Protocol::Udp)
    }

    pub fn requires_udp(self) -> bool {
        !matches!(self, Protocol::Tcp)
    }

    /// Value of the dokodemo-door `network` setting
    pub fn network(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Both => "tcp,udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "both" => Ok(Protocol::Both),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(Error::validation(format!(
                "invalid --proto value {:?} (expected tcp, udp, or both)",
                s
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Both => "both",
        };
        f.write_str(s)
    }
}

/// Persisted forward rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRule {
    pub listen_address: IpAddr,
    pub listen_port: u16,
    pub target_ip: IpAddr,
    pub target_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub tag: String,
    pub remark: String,
}

impl ForwardRule {
    /// Build a rule with its canonical tag and remark
    pub fn new(
        listen_address: IpAddr,
        listen_port: u16,
        target_ip: IpAddr,
        target_port: u16,
        protocol: Protocol,
    ) -> Self {
        ForwardRule {
            listen_address,
            listen_port,
            target_ip,
            target_port,
            protocol,
            tag: forward_tag(listen_port),
            remark: build_remark(&target_ip, target_port),
        }
    }

    /// Remote `ip:port`, IPv6 bracketed
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.target_ip, self.target_port)
    }

    /// Inbound object understood by the proxy engine
    pub fn inbound(&self) -> Value {
        json!({
            "remark": self.remark,
            "tag": self.tag,
            "listen": self.listen_address.to_string(),
            "port": self.listen_port,
            "protocol": "dokodemo-door",
            "settings": {
                "address": self.target_ip.to_string(),
                "port": self.target_port,
                "network": self.protocol.network(),
                "followRedirect": false
            }
        })
    }
}

/// Lookup by listen port, tag, or remark; every populated field must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub listen_port: Option<u16>,
    pub tag: Option<String>,
    pub remark: Option<String>,
}

impl Selector {
    pub fn by_port(port: u16) -> Self {
        Selector {
            listen_port: Some(port),
            ..Default::default()
        }
    }

    pub fn by_tag(tag: impl Into<String>) -> Self {
        Selector {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    pub fn by_remark(remark: impl Into<String>) -> Self {
        Selector {
            remark: Some(remark.into()),
            ..Default::default()
        }
    }

    fn port(&self) -> Option<u16> {
        self.listen_port.filter(|p| *p > 0)
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn remark(&self) -> Option<&str> {
        self.remark.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.port().is_none() && self.tag().is_none() && self.remark().is_none()
    }

    pub fn matches(&self, rule: &ForwardRule) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.port().is_some_and(|p| p != rule.listen_port) {
            return false;
        }
        if self.tag().is_some_and(|t| !t.eq_ignore_ascii_case(&rule.tag)) {
            return false;
        }
        if self
            .remark()
            .is_some_and(|r| !r.eq_ignore_ascii_case(&rule.remark))
        {
            return false;
        }
        true
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(port) = self.port() {
            parts.push(format!("port {}", port));
        }
        if let Some(tag) = self.tag() {
            parts.push(format!("tag {}", tag));
        }
        if let Some(remark) = self.remark() {
            parts.push(format!("remark {}", remark));
        }
        write!(f, "forward rule ({})", parts.join(", "))
    }
}

/// Parse `ip:port` (IPv6 in brackets)
pub fn parse_target(value: &str) -> Result<(IpAddr, u16)> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("--target is required"));
    }
    let addr: SocketAddr = trimmed
        .parse()
        .map_err(|e| Error::validation(format!("invalid --target {:?}: {}", value, e)))?;
    if addr.port() == 0 {
        return Err(Error::validation(format!(
            "invalid --target {:?}: port must be non-zero",
            value
        )));
    }
    Ok((addr.ip(), addr.port()))
}

/// Parse a listen address, defaulting to loopback when blank
pub fn normalize_listen_address(value: &str) -> Result<IpAddr> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_LISTEN_ADDRESS);
    }
    trimmed
        .parse()
        .map_err(|e| Error::validation(format!("invalid --listen address {:?}: {}", value, e)))
}

pub fn build_remark(ip: &IpAddr, port: u16) -> String {
    format!("forward:{}:{}", ip, port)
}
