//! Redirect workflows

use super::ClientInstall;
use crate::redirect::{host_cidr, resolve_binding, RedirectRule, RuleKind, Target};
use crate::{synth, Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

/// Redirect selector plus the endpoint it is bound to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectRequest {
    pub cidr: Option<String>,
    pub domain: Option<String>,
    /// Outbound tag of the endpoint
    pub tag: String,
    /// Hostname of the endpoint
    pub host: String,
}

impl RedirectRequest {
    pub fn cidr(cidr: impl Into<String>) -> Self {
        RedirectRequest {
            cidr: Some(cidr.into()),
            ..Default::default()
        }
    }

    pub fn domain(domain: impl Into<String>) -> Self {
        RedirectRequest {
            domain: Some(domain.into()),
            ..Default::default()
        }
    }

    pub fn via_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn via_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn target(&self) -> Result<Target> {
        Target::resolve(self.cidr.as_deref(), self.domain.as_deref())
    }
}

/// Redirect listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectRecord {
    /// `CIDR` or `domain`
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub tag: String,
    /// Empty when the tag no longer maps to an endpoint
    pub hostname: String,
}

impl ClientInstall {
    pub fn add_redirect(&self, req: &RedirectRequest) -> Result<RedirectRule> {
        let mut state = self.load_state()?;
        if state.endpoints.is_empty() {
            return Err(Error::not_found(
                "client endpoints (run `peerlink install` first)",
            ));
        }

        let binding = resolve_binding(&req.tag, &req.host, &state.bindings())?;
        let rule = RedirectRule::new(req.target()?, binding.tag);
        state.add_redirect(rule.clone())?;

        synth::update_routing(&self.paths.routing(), &state)?;
        self.save_state(&state)?;

        info!(rule = %rule.target, tag = %rule.outbound_tag, "redirect added");
        Ok(rule)
    }

    /// Remove redirects matching the selector, optionally only those bound to
    /// the given tag or host.
    pub fn remove_redirect(&self, req: &RedirectRequest) -> Result<()> {
        let mut state = self.load_state()?;
        if state.redirects.is_empty() {
            return Err(Error::not_found("redirect rules"));
        }

        let target = req.target()?;
        let tag_filter = if req.host.trim().is_empty() {
            req.tag.trim().to_string()
        } else {
            resolve_binding(&req.tag, &req.host, &state.bindings())?.tag
        };

        if !state.remove_redirect(&target, &tag_filter) {
            return Err(Error::not_found(format!("redirect {}", target)));
        }

        synth::update_routing(&self.paths.routing(), &state)?;
        self.save_state(&state)?;

        info!(rule = %target, tag = %tag_filter, "redirect removed");
        Ok(())
    }

    /// Redirect rules followed by each endpoint's own address as an implicit
    /// host-sized CIDR row
    pub fn list_redirects(&self) -> Result<Vec<RedirectRecord>> {
        let state = self.load_state()?;
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        let mut push = |record: RedirectRecord| {
            if record.value.is_empty() || record.tag.is_empty() {
                return;
            }
            let key = (
                record.kind.to_ascii_lowercase(),
                record.value.to_ascii_lowercase(),
                record.tag.to_ascii_lowercase(),
            );
            if seen.insert(key) {
                records.push(record);
            }
        };

        for rule in &state.redirects {
            push(RedirectRecord {
                kind: rule.kind().to_string(),
                value: rule.value(),
                tag: rule.outbound_tag.clone(),
                hostname: state
                    .host_for_tag(&rule.outbound_tag)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        for ep in &state.endpoints {
            if let Some(net) = host_cidr(&ep.address) {
                push(RedirectRecord {
                    kind: RuleKind::Cidr.to_string(),
                    value: net.to_string(),
                    tag: ep.tag.clone(),
                    hostname: ep.hostname.clone(),
                });
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{client, request};
    use crate::common::fs::load_json_object;

    #[test]
    fn test_add_redirect_requires_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let err = client
            .add_redirect(&RedirectRequest::cidr("10.70.0.0/16").via_tag("proxy-x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_add_and_duplicate_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("server.example")).unwrap();
        client.install(&request("other.example")).unwrap();

        let req = RedirectRequest::cidr("10.70.1.2/16").via_tag("proxy-server-example");
        let rule = client.add_redirect(&req).unwrap();
        assert_eq!(rule.value(), "10.70.0.0/16");

        assert!(matches!(
            client.add_redirect(&req),
            Err(Error::DuplicateRedirect { .. })
        ));

        let other = RedirectRequest::cidr("10.70.0.0/16").via_host("other.example");
        client.add_redirect(&other).unwrap();
        assert_eq!(client.load_state().unwrap().redirects.len(), 2);

        let routing = load_json_object(&client.paths().routing()).unwrap();
        let rules = routing["routing"]["rules"].as_array().unwrap();
        // 4 reverse + 2 redirects + 2 endpoint catch-alls
        assert_eq!(rules.len(), 8);
        assert_eq!(rules[4]["ip"][0], "10.70.0.0/16");
    }

    #[test]
    fn test_add_redirect_binding_errors() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("server.example")).unwrap();

        let err = client.add_redirect(&RedirectRequest::domain("example.com")).unwrap_err();
        assert!(matches!(err, Error::BindingNotSpecified));

        let err = client
            .add_redirect(&RedirectRequest::domain("example.com").via_host("nope.example"))
            .unwrap_err();
        assert!(matches!(err, Error::BindingHostNotFound(_)));

        let err = client
            .add_redirect(
                &RedirectRequest::domain("example.com")
                    .via_tag("proxy-other")
                    .via_host("server.example"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::BindingTagMismatch { .. }));
    }

    #[test]
    fn test_remove_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("server.example")).unwrap();

        let err = client
            .remove_redirect(&RedirectRequest::cidr("10.0.0.0/8"))
            .unwrap_err();
        assert!(err.is_not_found());

        client
            .add_redirect(&RedirectRequest::domain("Example.com").via_host("server.example"))
            .unwrap();

        let err = client
            .remove_redirect(&RedirectRequest::cidr("10.0.0.0/8"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.load_state().unwrap().redirects.len(), 1);

        client
            .remove_redirect(&RedirectRequest::domain("example.COM").via_host("server.example"))
            .unwrap();
        assert!(client.load_state().unwrap().redirects.is_empty());
    }

    #[test]
    fn test_list_redirects_includes_endpoint_rows() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client.install(&request("198.51.100.7")).unwrap();
        client.install(&request("named.example")).unwrap();
        client
            .add_redirect(&RedirectRequest::cidr("10.1.0.0/16").via_host("198.51.100.7"))
            .unwrap();
        client
            .add_redirect(&RedirectRequest::cidr("198.51.100.7/32").via_host("198.51.100.7"))
            .unwrap();

        let records = client.list_redirects().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, "10.1.0.0/16");
        assert_eq!(records[0].hostname, "198.51.100.7");
        assert_eq!(records[1].kind, "CIDR");
        assert_eq!(records[1].value, "198.51.100.7/32");
    }
}
