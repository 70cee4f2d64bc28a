//! Proxy engine config synthesis
//!
//! Projects the install state onto `outbounds.json`, `inbounds.json` and
//! `routing.json` without discarding content this crate does not own.

mod inbounds;
mod outbounds;
mod routing;

pub use inbounds::{remove_forward, upsert_forward};
pub use outbounds::{build_outbounds, write_outbounds, DIRECT_TAG};
pub use routing::{reconcile, update_routing, RoutingSummary, DEFAULT_DOMAIN_STRATEGY};

pub(crate) use routing::inbound_tags;

use crate::common::fs::write_json;
use crate::config::InstallPaths;
use crate::state::InstallState;
use crate::Result;
use serde_json::{json, Value};
use std::path::Path;

/// Initial `inbounds.json`
pub fn default_inbounds() -> Value {
    json!({ "inbounds": [] })
}

/// Initial `logs.json`
pub fn default_logs() -> Value {
    json!({
        "log": {
            "access": "",
            "error": "",
            "loglevel": "warning"
        }
    })
}

/// Write `value` to `path` only if nothing is there yet
pub fn ensure_document(path: &Path, value: &Value) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_json(path, value)?;
    Ok(true)
}

/// Regenerate outbounds and reconcile routing for the current state
pub fn sync_endpoints(paths: &InstallPaths, state: &InstallState) -> Result<RoutingSummary> {
    write_outbounds(&paths.outbounds(), &state.endpoints)?;
    update_routing(&paths.routing(), state)
}
