//! `outbounds.json`: one Trojan outbound per endpoint plus the direct outbound.
//!
//! The file is fully owned and regenerated on every write.

use crate::common::fs::write_json;
use crate::state::Endpoint;
use crate::Result;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

/// Tag of the terminal freedom outbound
pub const DIRECT_TAG: &str = "direct";

pub fn build_outbounds(endpoints: &[Endpoint]) -> Value {
    let mut outbounds: Vec<Value> = endpoints.iter().map(trojan_outbound).collect();
    outbounds.push(freedom_outbound());
    json!({ "outbounds": outbounds })
}

pub fn write_outbounds(path: &Path, endpoints: &[Endpoint]) -> Result<()> {
    write_json(path, &build_outbounds(endpoints))?;
    debug!(path = %path.display(), endpoints = endpoints.len(), "outbounds written");
    Ok(())
}

fn trojan_outbound(ep: &Endpoint) -> Value {
    json!({
        "protocol": "trojan",
        "settings": {
            "servers": [{
                "address": ep.address,
                "port": ep.port,
                "password": ep.password,
                "email": ep.user
            }]
        },
        "streamSettings": {
            "network": "tcp",
            "security": "tls",
            "tlsSettings": {
                "allowInsecure": ep.allow_insecure,
                "serverName": ep.server_name
            },
            "tcpSettings": {
                "header": {
                    "type": "http",
                    "request": {
                        "version": "1.1",
                        "method": "GET",
                        "path": ["/"],
                        "headers": {
                            "Accept-Encoding": ["gzip, deflate"],
                            "Connection": ["keep-alive"],
                            "Host": ["www.bing.com", "www.apple.com"],
                            "User-Agent": ["Mozilla/5.0"]
                        }
                    }
                }
            }
        },
        "tag": ep.tag
    })
}

fn freedom_outbound() -> Value {
    json!({
        "protocol": "freedom",
        "settings": { "domainStrategy": "UseIP" },
        "tag": DIRECT_TAG
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbounds_order_and_shape() {
        let endpoints = vec![
            Endpoint::new("b.example", 8443, "bob", "pw-b", "sni.b.example", false),
            Endpoint::new("a.example", 9443, "alice", "pw-a", "a.example", true),
        ];
        let doc = build_outbounds(&endpoints);
        let outbounds = doc["outbounds"].as_array().unwrap();
        assert_eq!(outbounds.len(), 3);

        assert_eq!(outbounds[0]["tag"], "proxy-b-example");
        assert_eq!(outbounds[0]["settings"]["servers"][0]["email"], "bob");
        assert_eq!(outbounds[0]["settings"]["servers"][0]["port"], 8443);
        assert_eq!(
            outbounds[0]["streamSettings"]["tlsSettings"]["serverName"],
            "sni.b.example"
        );
        assert_eq!(outbounds[0]["streamSettings"]["tlsSettings"]["allowInsecure"], false);
        let header = &outbounds[0]["streamSettings"]["tcpSettings"]["header"];
        assert_eq!(
            header["request"]["headers"]["Host"][1],
            "www.apple.com"
        );
        assert_eq!(outbounds[1]["tag"], "proxy-a-example");
        assert_eq!(outbounds[2]["protocol"], "freedom");
        assert_eq!(outbounds[2]["tag"], "direct");
    }

    #[test]
    fn test_empty_endpoints_still_direct() {
        let doc = build_outbounds(&[]);
        assert_eq!(doc["outbounds"].as_array().unwrap().len(), 1);
    }
}
