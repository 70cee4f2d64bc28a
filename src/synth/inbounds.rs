//! `inbounds.json`: forward inbounds merged into whatever else the file holds

use crate::common::fs::{load_json_object, write_json};
use crate::forward::ForwardRule;
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

const INBOUNDS_KEY: &str = "inbounds";

/// Replace any inbound sharing the rule's tag or remark, appending the new one
pub fn upsert_forward(path: &Path, rule: &ForwardRule) -> Result<()> {
    let mut root = load_json_object(path)?;
    let mut entries = take_entries(&mut root, path)?;
    let before = entries.len();
    entries.retain(|entry| !claims(entry, rule));
    let replaced = before - entries.len();
    entries.push(rule.inbound());
    root.insert(INBOUNDS_KEY.to_string(), Value::Array(entries));
    write_json(path, &root)?;
    debug!(tag = %rule.tag, replaced, "forward inbound written");
    Ok(())
}

/// Drop the inbound(s) sharing the rule's tag or remark
pub fn remove_forward(path: &Path, rule: &ForwardRule) -> Result<()> {
    let mut root = load_json_object(path)?;
    let mut entries = take_entries(&mut root, path)?;
    let before = entries.len();
    entries.retain(|entry| !claims(entry, rule));
    if entries.len() == before {
        return Err(Error::InboundNotFound(rule.tag.clone()));
    }
    root.insert(INBOUNDS_KEY.to_string(), Value::Array(entries));
    write_json(path, &root)?;
    debug!(tag = %rule.tag, "forward inbound removed");
    Ok(())
}

fn take_entries(root: &mut Map<String, Value>, path: &Path) -> Result<Vec<Value>> {
    match root.get_mut(INBOUNDS_KEY).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries),
        Some(_) => Err(Error::parse(format!(
            "{}: \"inbounds\" is not an array",
            path.display()
        ))),
    }
}

fn claims(entry: &Value, rule: &ForwardRule) -> bool {
    let field = |key: &str| entry.get(key).and_then(Value::as_str).unwrap_or_default();
    field("tag").eq_ignore_ascii_case(&rule.tag)
        || field("remark").eq_ignore_ascii_case(&rule.remark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::{Protocol, DEFAULT_LISTEN_ADDRESS};
    use serde_json::json;

    fn rule(port: u16, target: &str) -> ForwardRule {
        ForwardRule::new(DEFAULT_LISTEN_ADDRESS, port, target.parse().unwrap(), 22, Protocol::Udp)
    }

    #[test]
    fn test_upsert_preserves_foreign_and_replaces_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbounds.json");
        write_json(
            &path,
            &json!({
                "inbounds": [
                    {"tag": "socks-in", "protocol": "socks", "port": 1080},
                    {"tag": "stale", "remark": "forward:10.0.0.5:22"}
                ],
                "extra": true
            }),
        )
        .unwrap();

        upsert_forward(&path, &rule(53331, "10.0.0.5")).unwrap();

        let doc = load_json_object(&path).unwrap();
        let entries = doc["inbounds"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["tag"], "socks-in");
        assert_eq!(entries[1]["tag"], "forward-53331");
        assert_eq!(entries[1]["settings"]["network"], "udp");
        assert_eq!(doc["extra"], true);
    }

    #[test]
    fn test_upsert_into_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbounds.json");
        upsert_forward(&path, &rule(53331, "10.0.0.5")).unwrap();
        let doc = load_json_object(&path).unwrap();
        assert_eq!(doc["inbounds"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_forward() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbounds.json");
        let r = rule(53331, "10.0.0.5");
        assert!(matches!(remove_forward(&path, &r), Err(Error::InboundNotFound(_))));

        upsert_forward(&path, &r).unwrap();
        upsert_forward(&path, &rule(53332, "10.0.0.6")).unwrap();
        remove_forward(&path, &r).unwrap();

        let doc = load_json_object(&path).unwrap();
        let entries = doc["inbounds"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["tag"], "forward-53332");
    }

    #[test]
    fn test_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbounds.json");
        std::fs::write(&path, r#"{"inbounds": {"tag": "x"}}"#).unwrap();
        assert!(matches!(
            upsert_forward(&path, &rule(53331, "10.0.0.5")),
            Err(Error::Parse(_))
        ));
    }
}
