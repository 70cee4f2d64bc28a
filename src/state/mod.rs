//! Client install state
//!
//! One JSON document per installation root holds every endpoint, redirect,
//! reverse channel and forward. It is loaded, mutated in memory and
//! rewritten wholesale after each successful operation.

use crate::common::fs::{read_optional, write_json};
use crate::common::naming::{fold, proxy_tag, reverse_tag};
use crate::forward::{ForwardRule, Selector};
use crate::redirect::{self, Binding, RedirectRule, Target};
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// A remote tunnel server the client dials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub tag: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub allow_insecure: bool,
}

impl Endpoint {
    /// Build a record for `hostname`, which is also the dial address
    pub fn new(
        hostname: &str,
        port: u16,
        user: &str,
        password: &str,
        server_name: &str,
        allow_insecure: bool,
    ) -> Self {
        let hostname = hostname.trim().to_string();
        Endpoint {
            tag: proxy_tag(&hostname),
            address: hostname.clone(),
            hostname,
            port,
            user: user.trim().to_string(),
            password: password.trim().to_string(),
            server_name: server_name.trim().to_string(),
            allow_insecure,
        }
    }

    /// Hostname (case-insensitive) or exact tag match
    pub fn matches(&self, target: &str) -> bool {
        let target = target.trim();
        !target.is_empty()
            && (self.hostname.eq_ignore_ascii_case(target) || self.tag.eq_ignore_ascii_case(target))
    }
}

/// Reverse bridge identity; `domain` always equals `tag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseChannel {
    pub user_id: String,
    #[serde(default)]
    pub host: String,
    pub tag: String,
    #[serde(default)]
    pub domain: String,
    pub endpoint_tag: String,
}

/// Persisted client state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub redirects: Vec<RedirectRule>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reverse: BTreeMap<String, ReverseChannel>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub forwards: Vec<ForwardRule>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl InstallState {
    /// Load state; a missing or blank file yields an empty state
    pub fn load(path: &Path) -> Result<Self> {
        let Some(content) = read_optional(path)? else {
            debug!(path = %path.display(), "no client state, starting empty");
            return Ok(InstallState::default());
        };
        let mut state: InstallState = serde_json::from_str(&content)
            .map_err(|e| Error::parse(format!("client state {}: {}", path.display(), e)))?;
        state.normalize()?;
        Ok(state)
    }

    /// Atomically rewrite the whole state document
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Fill derived fields and check every stored reverse tag against a
    /// fresh derivation from its user and host.
    pub fn normalize(&mut self) -> Result<()> {
        for (key, channel) in self.reverse.iter_mut() {
            let derived = reverse_tag(&channel.user_id, &channel.host)?;
            if derived != *key || derived != channel.tag {
                return Err(Error::ReverseTagConflict {
                    tag: key.clone(),
                    detail: format!("does not match derived tag {}", derived),
                });
            }
            if channel.domain.trim().is_empty() {
                channel.domain = channel.tag.clone();
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoint(&self, target: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|ep| ep.matches(target))
    }

    /// Insert an endpoint or, with `force`, replace one with the same hostname
    /// in place.
    pub fn upsert_endpoint(&mut self, record: Endpoint, force: bool) -> Result<()> {
        for idx in 0..self.endpoints.len() {
            let existing = &self.endpoints[idx];
            if existing.hostname.eq_ignore_ascii_case(&record.hostname) {
                if !force {
                    return Err(Error::AlreadyExists(record.hostname));
                }
                self.endpoints[idx] = record;
                return Ok(());
            }
            if existing.tag.eq_ignore_ascii_case(&record.tag) {
                return Err(Error::TagConflict {
                    tag: record.tag,
                    hostname: existing.hostname.clone(),
                });
            }
        }
        self.endpoints.push(record);
        Ok(())
    }

    /// Remove an endpoint by hostname or tag. Dependents are left for the
    /// caller to cascade.
    pub fn remove_endpoint(&mut self, target: &str) -> Option<Endpoint> {
        let idx = self.endpoints.iter().position(|ep| ep.matches(target))?;
        Some(self.endpoints.remove(idx))
    }

    /// Endpoint tags paired with hostnames, in collection order
    pub fn bindings(&self) -> Vec<Binding> {
        self.endpoints
            .iter()
            .map(|ep| Binding {
                tag: ep.tag.clone(),
                host: ep.hostname.clone(),
            })
            .collect()
    }

    /// Hostname owning `tag`, if any
    pub fn host_for_tag(&self, tag: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|ep| ep.tag.eq_ignore_ascii_case(tag.trim()))
            .map(|ep| ep.hostname.as_str())
    }

    pub fn add_redirect(&mut self, rule: RedirectRule) -> Result<()> {
        redirect::add_rule(&mut self.redirects, rule)
    }

    pub fn remove_redirect(&mut self, target: &Target, tag_filter: &str) -> bool {
        redirect::remove_rule(&mut self.redirects, target, tag_filter)
    }

    pub fn remove_redirects_by_tag(&mut self, tag: &str) -> usize {
        redirect::remove_by_tag(&mut self.redirects, tag)
    }

    /// Return the channel for `(user, host)`, creating it if absent.
    ///
    /// An existing channel under the same derived tag must belong to the same
    /// user, host and endpoint.
    pub fn ensure_reverse_channel(
        &mut self,
        user_id: &str,
        host: &str,
        endpoint_tag: &str,
    ) -> Result<ReverseChannel> {
        let user = user_id.trim();
        let host = host.trim();
        if user.is_empty() || host.is_empty() {
            return Err(Error::validation("reverse channels require user and host"));
        }
        let tag = reverse_tag(user, host)?;

        if let Some(existing) = self.reverse.get(&tag) {
            let same_owner = existing.user_id.eq_ignore_ascii_case(user)
                && existing.host.eq_ignore_ascii_case(host);
            if !same_owner {
                return Err(Error::ReverseTagConflict {
                    tag,
                    detail: format!("already assigned to {}@{}", existing.user_id, existing.host),
                });
            }
            if !existing.endpoint_tag.eq_ignore_ascii_case(endpoint_tag.trim()) {
                return Err(Error::ReverseTagConflict {
                    tag,
                    detail: format!("already routed via {}", existing.endpoint_tag),
                });
            }
            return Ok(existing.clone());
        }

        let channel = ReverseChannel {
            user_id: user.to_string(),
            host: host.to_string(),
            tag: tag.clone(),
            domain: tag.clone(),
            endpoint_tag: endpoint_tag.trim().to_string(),
        };
        self.reverse.insert(tag, channel.clone());
        Ok(channel)
    }

    /// Drop every channel routed through `endpoint_tag`
    pub fn remove_reverse_channels_by_endpoint(&mut self, endpoint_tag: &str) -> usize {
        let wanted = fold(endpoint_tag);
        if wanted.is_empty() {
            return 0;
        }
        let before = self.reverse.len();
        self.reverse
            .retain(|_, channel| fold(&channel.endpoint_tag) != wanted);
        before - self.reverse.len()
    }

    /// Channels ordered by tag
    pub fn reverse_channels(&self) -> impl Iterator<Item = &ReverseChannel> {
        self.reverse.values()
    }

    /// Listen ports held by existing forwards
    pub fn reserved_ports(&self) -> HashSet<u16> {
        self.forwards.iter().map(|rule| rule.listen_port).collect()
    }

    /// Append a forward; listen port, tag and remark must all be unused
    pub fn add_forward(&mut self, rule: ForwardRule) -> Result<()> {
        for existing in &self.forwards {
            if existing.listen_port == rule.listen_port {
                return Err(Error::PortUnavailable {
                    address: existing.listen_address.to_string(),
                    port: rule.listen_port,
                });
            }
            if existing.tag.eq_ignore_ascii_case(&rule.tag) {
                return Err(Error::conflict(format!("forward tag {} already exists", rule.tag)));
            }
            if existing.remark.eq_ignore_ascii_case(&rule.remark) {
                return Err(Error::conflict(format!(
                    "forward remark {} already exists",
                    rule.remark
                )));
            }
        }
        self.forwards.push(rule);
        Ok(())
    }

    /// Remove the first forward matching `selector`, returning it with its index
    pub fn remove_forward(&mut self, selector: &Selector) -> Option<(ForwardRule, usize)> {
        let idx = self.forwards.iter().position(|rule| selector.matches(rule))?;
        Some((self.forwards.remove(idx), idx))
    }

    /// Put a forward back at `idx`, appending when out of range
    pub fn insert_forward_at(&mut self, rule: ForwardRule, idx: usize) {
        if idx > self.forwards.len() {
            self.forwards.push(rule);
        } else {
            self.forwards.insert(idx, rule);
        }
    }
}
