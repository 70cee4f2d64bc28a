//! Reverse channel workflows

use super::ClientInstall;
use crate::common::fs::load_json_object;
use crate::common::naming::fold;
use crate::state::ReverseChannel;
use crate::synth::{self, DIRECT_TAG};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Reverse channel listing row, with what `routing.json` currently holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReverseRecord {
    pub tag: String,
    pub host: String,
    pub user: String,
    pub domain: String,
    pub endpoint_tag: String,
    /// A bridge with this tag and domain exists
    pub bridge: bool,
    /// A direct-outbound rule exists for this inbound tag
    pub direct_rule: bool,
}

impl ClientInstall {
    /// Ensure a reverse channel for `user` through the endpoint named by
    /// hostname or tag
    pub fn add_reverse(&self, user: &str, endpoint: &str) -> Result<ReverseChannel> {
        let mut state = self.load_state()?;
        let ep = state
            .endpoint(endpoint)
            .ok_or_else(|| Error::not_found(format!("client endpoint {:?}", endpoint.trim())))?
            .clone();
        let channel = state.ensure_reverse_channel(user, &ep.hostname, &ep.tag)?;

        synth::update_routing(&self.paths.routing(), &state)?;
        self.save_state(&state)?;

        info!(tag = %channel.tag, endpoint = %channel.endpoint_tag, "reverse channel ensured");
        Ok(channel)
    }

    /// Channels sorted by tag
    pub fn list_reverse(&self) -> Result<Vec<ReverseRecord>> {
        let state = self.load_state()?;
        let doc = load_json_object(&self.paths.routing())?;
        let bridges = bridge_index(&doc);
        let direct = direct_inbounds(&doc);

        Ok(state
            .reverse_channels()
            .map(|channel| {
                let tag = fold(&channel.tag);
                ReverseRecord {
                    tag: channel.tag.clone(),
                    host: channel.host.clone(),
                    user: channel.user_id.clone(),
                    domain: channel.domain.clone(),
                    endpoint_tag: channel.endpoint_tag.clone(),
                    bridge: bridges.get(&tag) == Some(&fold(&channel.domain)),
                    direct_rule: direct.contains(&tag),
                }
            })
            .collect())
    }
}

/// Folded bridge tag to folded domain
fn bridge_index(doc: &Map<String, Value>) -> HashMap<String, String> {
    let Some(bridges) = doc
        .get("reverse")
        .and_then(|r| r.get("bridges"))
        .and_then(Value::as_array)
    else {
        return HashMap::new();
    };
    bridges
        .iter()
        .filter_map(|entry| {
            let tag = fold(entry.get("tag")?.as_str()?);
            let domain = fold(entry.get("domain")?.as_str()?);
            (!tag.is_empty() && !domain.is_empty()).then_some((tag, domain))
        })
        .collect()
}

/// Folded inbound tags routed to the direct outbound
fn direct_inbounds(doc: &Map<String, Value>) -> HashSet<String> {
    let Some(rules) = doc
        .get("routing")
        .and_then(|r| r.get("rules"))
        .and_then(Value::as_array)
    else {
        return HashSet::new();
    };
    rules
        .iter()
        .filter(|rule| {
            rule.get("outboundTag")
                .and_then(Value::as_str)
                .is_some_and(|tag| tag.trim().eq_ignore_ascii_case(DIRECT_TAG))
        })
        .flat_map(synth::inbound_tags)
        .map(|tag| fold(&tag))
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::client::tests::{client, request};
    use crate::common::fs::write_json;
    use serde_json::json;

    #[test]
    fn test_list_reverse_flags() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("b.example")).unwrap();
        client.install(&request("a.example")).unwrap();

        let records = client.list_reverse().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tag, "alicea-example.rev");
        assert_eq!(records[0].endpoint_tag, "proxy-a-example");
        assert!(records.iter().all(|r| r.bridge && r.direct_rule));

        // hand-edited routing lost the artifacts
        write_json(&client.paths().routing(), &json!({"routing": {"rules": []}})).unwrap();
        let records = client.list_reverse().unwrap();
        assert!(records.iter().all(|r| !r.bridge && !r.direct_rule));
    }

    #[test]
    fn test_add_reverse_for_second_user() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("a.example")).unwrap();

        let channel = client.add_reverse("bob", "proxy-a-example").unwrap();
        assert_eq!(channel.tag, "boba-example.rev");
        assert_eq!(channel.host, "a.example");

        let again = client.add_reverse("bob", "A.EXAMPLE").unwrap();
        assert_eq!(again, channel);
        assert_eq!(client.list_reverse().unwrap().len(), 2);

        assert!(client.add_reverse("bob", "missing.example").unwrap_err().is_not_found());
    }
}
