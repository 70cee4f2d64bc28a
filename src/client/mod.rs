//! Client operations
//!
//! Every mutating operation runs as one sequence: load state, mutate,
//! regenerate the affected proxy engine documents, save state.

mod forwards;
mod redirects;
mod reverse;

pub use forwards::{ForwardOutcome, ForwardRequest};
pub use redirects::{RedirectRecord, RedirectRequest};
pub use reverse::ReverseRecord;

use crate::config::{InstallPaths, Settings, DEFAULT_SERVER_PORT};
use crate::forward::DEFAULT_BASE_PORT;
use crate::link::TrojanLink;
use crate::state::{Endpoint, InstallState};
use crate::{synth, Error, Result};
use serde::Serialize;
use std::fs;
use std::io;
use tracing::info;

/// Credentials and options for adding an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Defaults to the address when empty
    pub server_name: String,
    pub allow_insecure: bool,
    /// Replace an endpoint with the same hostname
    pub force: bool,
}

impl Default for InstallRequest {
    fn default() -> Self {
        InstallRequest {
            address: String::new(),
            port: DEFAULT_SERVER_PORT,
            user: String::new(),
            password: String::new(),
            server_name: String::new(),
            allow_insecure: true,
            force: false,
        }
    }
}

impl From<TrojanLink> for InstallRequest {
    fn from(link: TrojanLink) -> Self {
        InstallRequest {
            address: link.address,
            port: link.port,
            user: link.user,
            password: link.password,
            server_name: link.server_name,
            allow_insecure: link.allow_insecure,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Leave files in place, only log
    pub keep_files: bool,
    /// Do not fail when there is no state file
    pub ignore_missing: bool,
}

/// Endpoint listing row; the password is never exposed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointRecord {
    pub hostname: String,
    pub tag: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub server_name: String,
    pub allow_insecure: bool,
}

impl From<&Endpoint> for EndpointRecord {
    fn from(ep: &Endpoint) -> Self {
        EndpointRecord {
            hostname: ep.hostname.clone(),
            tag: ep.tag.clone(),
            address: ep.address.clone(),
            port: ep.port,
            user: ep.user.clone(),
            server_name: ep.server_name.clone(),
            allow_insecure: ep.allow_insecure,
        }
    }
}

/// Handle on one client installation
#[derive(Debug, Clone)]
pub struct ClientInstall {
    paths: InstallPaths,
    forward_base_port: u16,
}

impl ClientInstall {
    pub fn new(paths: InstallPaths) -> Self {
        ClientInstall {
            paths,
            forward_base_port: DEFAULT_BASE_PORT,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(ClientInstall::new(settings.paths()?).with_base_port(settings.client.forward_base_port))
    }

    /// First port probed when a forward has no explicit listen port
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.forward_base_port = port;
        self
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    pub fn load_state(&self) -> Result<InstallState> {
        InstallState::load(&self.paths.state_file)
    }

    fn save_state(&self, state: &InstallState) -> Result<()> {
        state.save(&self.paths.state_file)
    }

    /// Add (or with `force`, update) an endpoint and its reverse channel
    pub fn install(&self, req: &InstallRequest) -> Result<Endpoint> {
        let address = req.address.trim();
        if address.is_empty() {
            return Err(Error::validation("client server address is required"));
        }
        if req.port == 0 {
            return Err(Error::validation("client server port must be between 1 and 65535"));
        }
        if req.user.trim().is_empty() {
            return Err(Error::validation("client user email is required"));
        }
        if req.password.trim().is_empty() {
            return Err(Error::validation("client password is required"));
        }
        let server_name = match req.server_name.trim() {
            "" => address,
            name => name,
        };

        info!(
            install_dir = %self.paths.install_dir.display(),
            config_dir = %self.paths.config_dir.display(),
            server_address = address,
            server_port = req.port,
            allow_insecure = req.allow_insecure,
            "client install starting"
        );

        let config_dir = &self.paths.config_dir;
        fs::create_dir_all(config_dir)
            .map_err(|e| Error::persist("create config directory", config_dir, e))?;
        synth::ensure_document(&self.paths.inbounds(), &synth::default_inbounds())?;
        synth::ensure_document(&self.paths.logs(), &synth::default_logs())?;

        let mut state = self.load_state()?;
        let endpoint = Endpoint::new(
            address,
            req.port,
            &req.user,
            &req.password,
            server_name,
            req.allow_insecure,
        );
        state.upsert_endpoint(endpoint.clone(), req.force)?;
        let channel =
            state.ensure_reverse_channel(&endpoint.user, &endpoint.hostname, &endpoint.tag)?;

        synth::sync_endpoints(&self.paths, &state)?;
        self.save_state(&state)?;

        info!(
            hostname = %endpoint.hostname,
            tag = %endpoint.tag,
            reverse = %channel.tag,
            "client endpoint installed"
        );
        Ok(endpoint)
    }

    /// Tear down the config directory and state file
    pub fn remove(&self, opts: RemoveOptions) -> Result<()> {
        let install_dir = &self.paths.install_dir;
        if opts.keep_files {
            info!(install_dir = %install_dir.display(), "client remove skipping files");
            return Ok(());
        }

        let config_dir = &self.paths.config_dir;
        match fs::remove_dir_all(config_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::persist("remove client config dir", config_dir, e)),
        }

        let removed = crate::common::fs::remove_file_if_exists(&self.paths.state_file)?;
        if !removed && !opts.ignore_missing {
            return Err(Error::not_found(format!(
                "client state file {}",
                self.paths.state_file.display()
            )));
        }

        info!(
            install_dir = %install_dir.display(),
            config_dir = %config_dir.display(),
            "client configuration removed"
        );
        Ok(())
    }

    /// Remove one endpoint with its redirects and reverse channels; removing
    /// the last endpoint tears the installation down.
    pub fn remove_endpoint(&self, target: &str) -> Result<Endpoint> {
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::validation("endpoint hostname or tag is required"));
        }

        let mut state = self.load_state()?;
        let record = state
            .remove_endpoint(target)
            .ok_or_else(|| Error::not_found(format!("client endpoint {:?}", target)))?;

        let redirects = state.remove_redirects_by_tag(&record.tag);
        let channels = state.remove_reverse_channels_by_endpoint(&record.tag);
        info!(
            hostname = %record.hostname,
            tag = %record.tag,
            redirects,
            channels,
            "client endpoint removed"
        );

        if state.is_empty() {
            self.remove(RemoveOptions {
                keep_files: false,
                ignore_missing: true,
            })?;
            return Ok(record);
        }

        synth::sync_endpoints(&self.paths, &state)?;
        self.save_state(&state)?;
        Ok(record)
    }

    pub fn list_endpoints(&self) -> Result<Vec<EndpointRecord>> {
        let state = self.load_state()?;
        Ok(state.endpoints.iter().map(EndpointRecord::from).collect())
    }
}
