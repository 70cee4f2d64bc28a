//! Peerlink - client-side provisioning for Trojan tunnel overlays
//!
//! Keeps a small install-state registry and reconciles it into the JSON
//! documents a proxy engine consumes:
//! - Endpoint registry (one Trojan outbound per remote server)
//! - Redirect ledger (CIDR/domain rules bound to an endpoint)
//! - Reverse channels (bridge + direct rule per user and endpoint)
//! - Forward allocator (local dokodemo-door listeners on probed ports)
//!
//! # Architecture
//!
//! ```text
//!                  +------------------+
//!                  |  main.rs (clap)  |
//!                  +--------+---------+
//!                           |
//!                  +--------v---------+
//!                  |     client/      |
//!                  |   (workflows)    |
//!                  +--------+---------+
//!                           |
//!     +----------+----------+----------+----------+
//!     |          |          |          |          |
//! +---v----+ +---v----+ +---v-----+ +--v-----+ +--v----+
//! | state/ | |redirect| | forward/| | synth/ | | link/ |
//! |        | |        | | (probe) | | (json) | |       |
//! +---+----+ +--------+ +---------+ +---+----+ +-------+
//!     |                                 |
//!     +---------------+-----------------+
//!                     |
//!              +------v------+
//!              |   common/   |
//!              | (fs, names) |
//!              +-------------+
//! ```

pub mod client;
pub mod common;
pub mod config;
pub mod forward;
pub mod link;
pub mod redirect;
pub mod state;
pub mod synth;

pub use client::ClientInstall;
pub use common::error::{Error, Result};
pub use config::Settings;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
