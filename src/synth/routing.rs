//! `routing.json` reconciliation
//!
//! Existing rules and bridges are classified as managed (regenerated here)
//! or foreign (kept verbatim, in order). Managed output is laid out as:
//! reverse rules, foreign rules, redirect rules, endpoint catch-alls.

use super::outbounds::DIRECT_TAG;
use crate::common::fs::{load_json_object, write_json};
use crate::common::naming::{fold, is_proxy_tag, is_reverse_tag};
use crate::redirect::{host_cidr, RedirectRule, Target};
use crate::state::{Endpoint, InstallState, ReverseChannel};
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Applied when the document has no usable `routing.domainStrategy`
pub const DEFAULT_DOMAIN_STRATEGY: &str = "IPOnDemand";

/// Counts produced by one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingSummary {
    /// Total rules written
    pub rules: usize,
    /// Foreign rules carried over
    pub foreign: usize,
    /// Total bridges written
    pub bridges: usize,
}

/// Reconcile `routing.json` at `path` against `state` and rewrite it
pub fn update_routing(path: &Path, state: &InstallState) -> Result<RoutingSummary> {
    let mut doc = load_json_object(path)?;
    let summary = reconcile(
        &mut doc,
        &state.endpoints,
        &state.redirects,
        state.reverse_channels(),
    );
    write_json(path, &doc)?;
    debug!(
        path = %path.display(),
        rules = summary.rules,
        foreign = summary.foreign,
        bridges = summary.bridges,
        "routing reconciled"
    );
    Ok(summary)
}

/// Rewrite the managed parts of a routing document in place
pub fn reconcile<'a, I>(
    doc: &mut Map<String, Value>,
    endpoints: &[Endpoint],
    redirects: &[RedirectRule],
    channels: I,
) -> RoutingSummary
where
    I: IntoIterator<Item = &'a ReverseChannel>,
{
    let mut channels: Vec<&ReverseChannel> = channels.into_iter().collect();
    channels.sort_by(|a, b| a.tag.cmp(&b.tag));

    let routing_slot = doc.entry("routing").or_insert(Value::Null);
    let mut routing = take_object(routing_slot);

    let has_strategy = routing
        .get("domainStrategy")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_strategy {
        routing.insert("domainStrategy".to_string(), json!(DEFAULT_DOMAIN_STRATEGY));
    }

    let existing = match routing.get_mut("rules").map(Value::take) {
        Some(Value::Array(rules)) => rules,
        _ => Vec::new(),
    };

    let managed = managed_outbounds(endpoints, redirects, &existing);
    let reverse_tags = managed_reverse_tags(&channels);

    let mut rules: Vec<Value> = channels.iter().flat_map(|c| reverse_rules(c)).collect();
    let before_foreign = rules.len();
    rules.extend(
        existing
            .into_iter()
            .filter(|rule| !is_managed_rule(rule, &managed, &reverse_tags)),
    );
    let foreign = rules.len() - before_foreign;
    rules.extend(redirects.iter().map(redirect_rule));
    rules.extend(endpoints.iter().map(endpoint_rule));

    let rule_count = rules.len();
    routing.insert("rules".to_string(), Value::Array(rules));
    *routing_slot = Value::Object(routing);

    let reverse_slot = doc.entry("reverse").or_insert(Value::Null);
    let mut reverse = take_object(reverse_slot);
    let mut bridges = match reverse.get_mut("bridges").map(Value::take) {
        Some(Value::Array(bridges)) => bridges,
        _ => Vec::new(),
    };
    bridges.retain(|bridge| {
        let owned = bridge
            .get("tag")
            .and_then(Value::as_str)
            .is_some_and(|tag| reverse_tags.contains(&fold(tag)));
        !owned && !is_orphan_bridge(bridge)
    });
    bridges.extend(
        channels
            .iter()
            .map(|c| json!({ "domain": c.domain, "tag": c.tag })),
    );
    let bridge_count = bridges.len();
    reverse.insert("bridges".to_string(), Value::Array(bridges));
    *reverse_slot = Value::Object(reverse);

    RoutingSummary {
        rules: rule_count,
        foreign,
        bridges: bridge_count,
    }
}

/// Outbound tags whose rules are regenerated: current endpoints, current
/// redirects, and any prefixed tag left behind by a removed endpoint.
fn managed_outbounds(
    endpoints: &[Endpoint],
    redirects: &[RedirectRule],
    existing: &[Value],
) -> HashSet<String> {
    let mut managed: HashSet<String> = endpoints
        .iter()
        .map(|ep| fold(&ep.tag))
        .chain(redirects.iter().map(|r| fold(&r.outbound_tag)))
        .filter(|tag| !tag.is_empty())
        .collect();
    for rule in existing {
        if let Some(tag) = rule.get("outboundTag").and_then(Value::as_str) {
            if is_proxy_tag(tag) {
                managed.insert(fold(tag));
            }
        }
    }
    managed
}

/// Inbound tags owned by the current reverse channels
fn managed_reverse_tags(channels: &[&ReverseChannel]) -> HashSet<String> {
    channels.iter().map(|c| fold(&c.tag)).collect()
}

/// A bridge left behind by a removed channel: reverse-suffixed tag whose
/// domain is the tag itself
fn is_orphan_bridge(bridge: &Value) -> bool {
    let field = |key: &str| bridge.get(key).and_then(Value::as_str).map(fold);
    match (field("tag"), field("domain")) {
        (Some(tag), Some(domain)) => is_reverse_tag(&tag) && tag == domain,
        _ => false,
    }
}

/// A rule left behind by a removed channel. Only the two shapes written by
/// `reverse_rules` qualify; anything else carrying a reverse-suffixed inbound
/// tag is foreign.
fn is_orphan_reverse_rule(rule: &Value) -> bool {
    let Some(obj) = rule.as_object() else {
        return false;
    };
    let tags = inbound_tags(rule);
    let [tag] = tags.as_slice() else {
        return false;
    };
    if !is_reverse_tag(tag) {
        return false;
    }
    let outbound = obj.get("outboundTag").and_then(Value::as_str).unwrap_or_default();
    if !outbound.trim().eq_ignore_ascii_case(DIRECT_TAG) && !is_proxy_tag(outbound) {
        return false;
    }
    let own_domain = format!("full:{}", fold(tag));
    obj.iter().all(|(key, value)| match key.as_str() {
        "type" | "inboundTag" | "outboundTag" => true,
        "domain" => match value.as_array().map(Vec::as_slice) {
            Some([Value::String(domain)]) => fold(domain) == own_domain,
            _ => false,
        },
        _ => false,
    })
}

fn is_managed_rule(
    rule: &Value,
    managed: &HashSet<String>,
    reverse_tags: &HashSet<String>,
) -> bool {
    if !rule.is_object() {
        return false;
    }
    let outbound = rule
        .get("outboundTag")
        .and_then(Value::as_str)
        .map(fold)
        .unwrap_or_default();
    if managed.contains(&outbound) {
        return true;
    }
    inbound_tags(rule)
        .iter()
        .any(|tag| reverse_tags.contains(&fold(tag)))
        || is_orphan_reverse_rule(rule)
}

/// `inboundTag` as a list, accepting a bare string
pub(crate) fn inbound_tags(rule: &Value) -> Vec<String> {
    match rule.get("inboundTag") {
        Some(Value::String(tag)) => vec![tag.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|tag| tag.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn reverse_rules(channel: &ReverseChannel) -> [Value; 2] {
    [
        json!({
            "type": "field",
            "domain": [format!("full:{}", channel.domain)],
            "inboundTag": [channel.tag],
            "outboundTag": channel.endpoint_tag
        }),
        json!({
            "type": "field",
            "inboundTag": [channel.tag],
            "outboundTag": DIRECT_TAG
        }),
    ]
}

fn redirect_rule(rule: &RedirectRule) -> Value {
    match &rule.target {
        Target::Cidr(net) => json!({
            "type": "field",
            "ip": [net.to_string()],
            "outboundTag": rule.outbound_tag
        }),
        Target::Domain(domain) => json!({
            "type": "field",
            "domain": [domain],
            "outboundTag": rule.outbound_tag
        }),
    }
}

/// Pin an endpoint's own address to its outbound so redirects never swallow
/// the tunnel itself. Hostnames go through `full:` domain matching since the
/// `ip` matcher only takes addresses and CIDRs.
fn endpoint_rule(ep: &Endpoint) -> Value {
    if host_cidr(&ep.address).is_some() {
        json!({
            "type": "field",
            "ip": [ep.address.trim()],
            "outboundTag": ep.tag
        })
    } else {
        json!({
            "type": "field",
            "domain": [format!("full:{}", ep.address.trim())],
            "outboundTag": ep.tag
        })
    }
}

fn take_object(slot: &mut Value) -> Map<String, Value> {
    match slot.take() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
