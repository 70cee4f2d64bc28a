//! Redirect rule ledger
//!
//! Rules steer a CIDR or domain through a specific endpoint outbound. The
//! same destination may be bound to several tags; only exact
//! `(kind, value, tag)` duplicates are rejected.

mod rule;

pub use rule::{host_cidr, normalize_cidr, normalize_domain, RedirectRule, RuleKind, Target};

use crate::{Error, Result};
use std::net::IpAddr;

/// An endpoint tag paired with its hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub tag: String,
    pub host: String,
}

/// Resolve the endpoint a redirect is bound to from a tag hint, a host hint,
/// or both. A host hint takes priority; a tag given alongside it must agree.
pub fn resolve_binding(tag: &str, host: &str, bindings: &[Binding]) -> Result<Binding> {
    let tag = tag.trim();
    let host = host.trim();
    if tag.is_empty() && host.is_empty() {
        return Err(Error::BindingNotSpecified);
    }

    let matched = if !host.is_empty() {
        bindings
            .iter()
            .find(|b| b.host.eq_ignore_ascii_case(host))
            .ok_or_else(|| Error::BindingHostNotFound(host.to_string()))?
    } else {
        bindings
            .iter()
            .find(|b| b.tag.eq_ignore_ascii_case(tag))
            .ok_or_else(|| Error::BindingTagNotFound(tag.to_string()))?
    };

    if !tag.is_empty() && !tag.eq_ignore_ascii_case(&matched.tag) {
        return Err(Error::BindingTagMismatch {
            tag: tag.to_string(),
            host: matched.host.clone(),
        });
    }
    Ok(matched.clone())
}

/// Append a rule, rejecting an exact duplicate
pub fn add_rule(rules: &mut Vec<RedirectRule>, mut rule: RedirectRule) -> Result<()> {
    let tag = rule.outbound_tag.trim().to_string();
    if tag.is_empty() {
        return Err(Error::invalid_rule("outbound tag is required"));
    }
    if rules
        .iter()
        .any(|existing| existing.target.same_as(&rule.target) && existing.routes_via(&tag))
    {
        return Err(Error::DuplicateRedirect {
            target: rule.target.to_string(),
            tag,
        });
    }
    rule.outbound_tag = tag;
    rules.push(rule);
    Ok(())
}

/// Drop every rule matching `target`, optionally restricted to one tag.
///
/// Returns whether anything was removed; the slice is untouched otherwise.
pub fn remove_rule(rules: &mut Vec<RedirectRule>, target: &Target, tag_filter: &str) -> bool {
    let tag_filter = tag_filter.trim();
    let before = rules.len();
    rules.retain(|rule| {
        let matches_tag = tag_filter.is_empty() || rule.routes_via(tag_filter);
        !(rule.target.same_as(target) && matches_tag)
    });
    rules.len() != before
}

/// Drop every rule bound to `tag`, returning how many went
pub fn remove_by_tag(rules: &mut Vec<RedirectRule>, tag: &str) -> usize {
    if tag.trim().is_empty() {
        return 0;
    }
    let before = rules.len();
    rules.retain(|rule| !rule.routes_via(tag));
    before - rules.len()
}

/// Whether any CIDR rule covers `ip`
pub fn matches_ip(rules: &[RedirectRule], ip: &IpAddr) -> bool {
    rules.iter().any(|rule| rule.target.contains(ip))
}
