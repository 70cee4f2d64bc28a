//! End-to-end client workflows against a temporary installation root
//!
//! These drive the public `ClientInstall` API and inspect the documents a
//! proxy engine would read.

use peerlink::client::{ForwardRequest, InstallRequest, RedirectRequest, RemoveOptions};
use peerlink::config::InstallPaths;
use peerlink::forward::{Protocol, Selector};
use peerlink::link::TrojanLink;
use peerlink::{ClientInstall, Error, Settings};
use serde_json::{json, Value};
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;

fn client(dir: &Path) -> ClientInstall {
    ClientInstall::new(InstallPaths::resolve(dir, None).unwrap())
}

fn request(address: &str, user: &str) -> InstallRequest {
    InstallRequest {
        address: address.to_string(),
        user: user.to_string(),
        password: "hunter2".to_string(),
        ..Default::default()
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn outbound_tags(doc: &Value) -> Vec<String> {
    doc["outbounds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["tag"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(dir.path()).with_base_port(free_port());

    client.install(&request("edge-a.example", "alice")).unwrap();
    client.install(&request("198.51.100.20", "alice")).unwrap();

    let outbounds = read_json(&client.paths().outbounds());
    assert_eq!(
        outbound_tags(&outbounds),
        vec!["proxy-edge-a-example", "proxy-198-51-100-20", "direct"]
    );

    client
        .add_redirect(&RedirectRequest::cidr("10.20.0.0/16").via_host("edge-a.example"))
        .unwrap();
    client
        .add_redirect(&RedirectRequest::domain("intra.example").via_tag("proxy-198-51-100-20"))
        .unwrap();

    let fwd = client
        .add_forward(&ForwardRequest::new("10.20.3.4:5432"))
        .unwrap();
    assert!(fwd.routed);

    // drop the first endpoint: its redirect and reverse channel follow it
    client.remove_endpoint("edge-a.example").unwrap();

    let state = client.load_state().unwrap();
    assert_eq!(state.endpoints.len(), 1);
    assert_eq!(state.redirects.len(), 1);
    assert_eq!(state.redirects[0].outbound_tag, "proxy-198-51-100-20");
    assert_eq!(state.reverse.len(), 1);
    assert_eq!(state.forwards.len(), 1);

    let routing = std::fs::read_to_string(client.paths().routing()).unwrap();
    assert!(!routing.contains("proxy-edge-a-example"));
    assert!(!routing.contains("aliceedge-a-example.rev"));

    let outbounds = read_json(&client.paths().outbounds());
    assert_eq!(outbound_tags(&outbounds), vec!["proxy-198-51-100-20", "direct"]);

    // the last endpoint takes the whole installation with it
    client.remove_endpoint("proxy-198-51-100-20").unwrap();
    assert!(!client.paths().state_file.exists());
    assert!(!client.paths().config_dir.exists());
}

#[test]
fn test_foreign_routing_content_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(dir.path());
    std::fs::create_dir_all(&client.paths().config_dir).unwrap();
    std::fs::write(
        client.paths().routing(),
        serde_json::to_string_pretty(&json!({
            "routing": {
                "domainStrategy": "AsIs",
                "rules": [
                    {"type": "field", "port": "53", "outboundTag": "dns-out"},
                    {"type": "field", "ip": ["geoip:private"], "outboundTag": "block"}
                ]
            },
            "reverse": {
                "bridges": [{"domain": "lab.internal", "tag": "lab-bridge"}]
            },
            "custom": {"keep": true}
        }))
        .unwrap(),
    )
    .unwrap();

    client.install(&request("edge.example", "carol")).unwrap();

    let routing = read_json(&client.paths().routing());
    assert_eq!(routing["routing"]["domainStrategy"], "AsIs");
    assert_eq!(routing["custom"]["keep"], true);

    let rules = routing["routing"]["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 5);
    assert_eq!(rules[0]["inboundTag"][0], "caroledge-example.rev");
    assert_eq!(rules[1]["outboundTag"], "direct");
    assert_eq!(rules[2]["outboundTag"], "dns-out");
    assert_eq!(rules[3]["outboundTag"], "block");
    assert_eq!(rules[4]["domain"][0], "full:edge.example");
    assert_eq!(rules[4]["outboundTag"], "proxy-edge-example");

    let bridges = routing["reverse"]["bridges"].as_array().unwrap();
    assert_eq!(bridges.len(), 2);
    assert_eq!(bridges[0]["tag"], "lab-bridge");
    assert_eq!(bridges[1]["tag"], "caroledge-example.rev");
}

#[test]
fn test_reconciliation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(dir.path());
    client.install(&request("edge.example", "dave")).unwrap();
    client
        .add_redirect(&RedirectRequest::cidr("172.16.0.0/12").via_host("edge.example"))
        .unwrap();

    let first = std::fs::read(client.paths().routing()).unwrap();
    // re-ensuring an existing channel regenerates routing.json
    client.add_reverse("dave", "edge.example").unwrap();
    let second = std::fs::read(client.paths().routing()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_state_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let first = client(dir.path());
    first.install(&request("edge.example", "erin")).unwrap();
    first
        .add_redirect(&RedirectRequest::domain("Wiki.Example").via_host("edge.example"))
        .unwrap();

    let second = client(dir.path());
    let endpoints = second.list_endpoints().unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].user, "erin");

    let redirects = second.list_redirects().unwrap();
    assert_eq!(redirects.len(), 1);
    assert_eq!(redirects[0].kind, "domain");
    assert_eq!(redirects[0].value, "wiki.example");
    assert_eq!(redirects[0].hostname, "edge.example");

    let raw = std::fs::read_to_string(&second.paths().state_file).unwrap();
    assert!(raw.ends_with('\n'));
}

#[test]
fn test_explicit_forward_port_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(dir.path());
    let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = busy.local_addr().unwrap().port();

    let req = ForwardRequest {
        listen_port: Some(port),
        protocol: Protocol::Tcp,
        ..ForwardRequest::new("10.0.0.9:80")
    };
    assert!(matches!(
        client.add_forward(&req),
        Err(Error::PortUnavailable { .. })
    ));
    assert!(client.list_forwards().unwrap().is_empty());
}

#[test]
fn test_forward_inbounds_follow_state() {
    let dir = tempfile::tempdir().unwrap();
    let client = client(dir.path()).with_base_port(free_port());
    client.install(&request("edge.example", "frank")).unwrap();

    let added = client
        .add_forward(&ForwardRequest {
            protocol: Protocol::Udp,
            ..ForwardRequest::new("10.9.9.9:53")
        })
        .unwrap();

    let inbounds = read_json(&client.paths().inbounds());
    let entry = &inbounds["inbounds"][0];
    assert_eq!(entry["tag"], added.rule.tag.as_str());
    assert_eq!(entry["remark"], "forward:10.9.9.9:53");
    assert_eq!(entry["listen"], "127.0.0.1");
    assert_eq!(entry["protocol"], "dokodemo-door");
    assert_eq!(entry["settings"]["network"], "udp");
    assert_eq!(entry["settings"]["followRedirect"], false);

    client
        .remove_forward(&Selector::by_port(added.rule.listen_port))
        .unwrap();
    let inbounds = read_json(&client.paths().inbounds());
    assert!(inbounds["inbounds"].as_array().unwrap().is_empty());
}

#[test]
fn test_install_from_link_and_settings() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "client:\n  install-dir: {}\n  config-dir: engine\n",
        dir.path().display()
    );
    let settings = Settings::from_str(&yaml).unwrap();
    let client = ClientInstall::from_settings(&settings).unwrap();
    assert_eq!(client.paths().config_dir, dir.path().join("engine"));

    let link = TrojanLink::parse(
        "trojan://pa%24%24@edge.example:9443?sni=front.example&allowInsecure=0#grace%40corp",
    )
    .unwrap();
    let endpoint = client.install(&InstallRequest::from(link)).unwrap();
    assert_eq!(endpoint.port, 9443);
    assert_eq!(endpoint.password, "pa$$");

    let outbounds = read_json(&client.paths().outbounds());
    let tls = &outbounds["outbounds"][0]["streamSettings"]["tlsSettings"];
    assert_eq!(tls["serverName"], "front.example");
    assert_eq!(tls["allowInsecure"], false);
    assert_eq!(
        outbounds["outbounds"][0]["settings"]["servers"][0]["email"],
        "grace@corp"
    );

    client.remove(RemoveOptions::default()).unwrap();
    assert!(!dir.path().join("engine").exists());
}
