//! `trojan://` share links
//!
//! Format: `trojan://<password>@<host>:<port>?sni=..&allowInsecure=..#<user>`

use crate::config::parse_bool;
use crate::{Error, Result};
use url::{Host, Url};

/// Query keys checked, in order, when the fragment carries no user
const USER_KEYS: &[&str] = &["email", "user", "username", "name", "remark", "remarks", "peer"];

/// Endpoint credentials carried by a share link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrojanLink {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Empty when the link disables TLS (`security=none`)
    pub server_name: String,
    pub allow_insecure: bool,
}

impl TrojanLink {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(Error::validation("trojan link is empty"));
        }
        let url = Url::parse(value)
            .map_err(|e| Error::validation(format!("parse trojan link: {}", e)))?;
        if !url.scheme().eq_ignore_ascii_case("trojan") {
            return Err(Error::validation(format!(
                "unsupported scheme {:?} (expected trojan)",
                url.scheme()
            )));
        }

        let address = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(Error::validation("missing host in trojan link")),
        };
        let port = url
            .port()
            .ok_or_else(|| Error::validation("missing port in trojan link"))?;

        let encoded = url.password().unwrap_or_else(|| url.username());
        let password = decode(encoded)?.trim().to_string();
        if password.is_empty() {
            return Err(Error::validation("missing password in trojan link"));
        }

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            query
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim())
                .unwrap_or_default()
        };

        let user = match url.fragment().map(decode).transpose()? {
            Some(user) if !user.trim().is_empty() => user.trim().to_string(),
            _ => USER_KEYS
                .iter()
                .map(|key| get(*key))
                .find(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| missing_user(&url))?,
        };

        let mut allow_insecure = match get("allowInsecure") {
            "" => false,
            flag => parse_bool(flag)
                .map_err(|_| Error::validation(format!("invalid allowInsecure value {:?}", flag)))?,
        };

        let server_name = if get("security").eq_ignore_ascii_case("none") {
            allow_insecure = false;
            String::new()
        } else {
            match get("sni") {
                "" => address.clone(),
                sni => sni.to_string(),
            }
        };

        Ok(TrojanLink {
            address,
            port,
            user,
            password,
            server_name,
            allow_insecure,
        })
    }
}

fn decode(value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|e| Error::validation(format!("decode trojan link: {}", e)))
}

fn missing_user(url: &Url) -> Error {
    // an unquoted `&` in a shell swallows everything after it, fragment included
    if url.query().is_some_and(|q| q.contains('&')) {
        Error::validation(
            "trojan link missing user/email (wrap the URL in quotes or escape '&' on Windows)",
        )
    } else {
        Error::validation(
            "trojan link missing user/email (expected #email or email query parameter)",
        )
    }
}
