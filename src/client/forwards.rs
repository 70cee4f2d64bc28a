//! Forward workflows
//!
//! `inbounds.json` is kept in step with the state: the inbound is written
//! before the state is saved, and a failed step puts the in-memory rule back
//! where it was.

use super::ClientInstall;
use crate::forward::{
    check_port, find_available_port, normalize_listen_address, parse_target, ForwardRule,
    Protocol, Selector,
};
use crate::redirect::matches_ip;
use crate::state::InstallState;
use crate::{synth, Error, Result};
use tracing::{info, warn};

/// Forward creation input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Remote `ip:port`
    pub target: String,
    /// Loopback when blank
    pub listen_address: String,
    /// Allocated from the base port when unset
    pub listen_port: Option<u16>,
    pub protocol: Protocol,
    /// Overrides the installation's base port for this request
    pub base_port: Option<u16>,
}

impl ForwardRequest {
    pub fn new(target: impl Into<String>) -> Self {
        ForwardRequest {
            target: target.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub rule: ForwardRule,
    /// The target is covered by a redirect rule rather than the default tunnel
    pub routed: bool,
}

impl ClientInstall {
    pub fn add_forward(&self, req: &ForwardRequest) -> Result<ForwardOutcome> {
        let mut state = self.load_state()?;
        let rule = self.add_forward_in(&mut state, req)?;

        if let Err(e) = self.save_state(&state) {
            warn!(tag = %rule.tag, error = %e, "state save failed, withdrawing forward inbound");
            self.withdraw_inbound(&rule);
            return Err(e);
        }

        let routed = matches_ip(&state.redirects, &rule.target_ip);
        info!(
            tag = %rule.tag,
            listen = %rule.listen_address,
            port = rule.listen_port,
            remote = %rule.target(),
            protocol = %rule.protocol,
            routed,
            "forward added"
        );
        Ok(ForwardOutcome { rule, routed })
    }

    fn add_forward_in(
        &self,
        state: &mut InstallState,
        req: &ForwardRequest,
    ) -> Result<ForwardRule> {
        let (target_ip, target_port) = parse_target(&req.target)?;
        let listen = normalize_listen_address(&req.listen_address)?;
        let proto = req.protocol;

        let reserved = state.reserved_ports();
        let listen_port = match req.listen_port.filter(|p| *p > 0) {
            Some(port) => {
                if reserved.contains(&port) {
                    return Err(Error::PortUnavailable {
                        address: listen.to_string(),
                        port,
                    });
                }
                check_port(listen, port, proto)?;
                port
            }
            None => {
                let base = req.base_port.unwrap_or(self.forward_base_port);
                find_available_port(listen, base, proto, &reserved)?
            }
        };

        let rule = ForwardRule::new(listen, listen_port, target_ip, target_port, proto);
        state.add_forward(rule.clone())?;
        if let Err(e) = synth::upsert_forward(&self.paths.inbounds(), &rule) {
            state.forwards.pop();
            return Err(e);
        }
        Ok(rule)
    }

    pub fn remove_forward(&self, selector: &Selector) -> Result<ForwardRule> {
        let mut state = self.load_state()?;
        let (rule, idx) = self.remove_forward_in(&mut state, selector)?;

        if let Err(e) = self.save_state(&state) {
            warn!(tag = %rule.tag, error = %e, "state save failed, restoring forward inbound");
            self.restore_inbound(&rule);
            state.insert_forward_at(rule, idx);
            return Err(e);
        }

        info!(tag = %rule.tag, port = rule.listen_port, "forward removed");
        Ok(rule)
    }

    fn remove_forward_in(
        &self,
        state: &mut InstallState,
        selector: &Selector,
    ) -> Result<(ForwardRule, usize)> {
        if selector.is_empty() {
            return Err(Error::validation("--listen-port, --tag, or --remark is required"));
        }
        let (rule, idx) = state
            .remove_forward(selector)
            .ok_or_else(|| Error::not_found(selector.to_string()))?;

        if let Err(e) = synth::remove_forward(&self.paths.inbounds(), &rule) {
            state.insert_forward_at(rule, idx);
            return Err(e);
        }
        Ok((rule, idx))
    }

    pub fn list_forwards(&self) -> Result<Vec<ForwardRule>> {
        Ok(self.load_state()?.forwards)
    }

    /// Undo an inbound written for a forward whose state never landed.
    /// Returns false when inbounds.json could not be rewritten.
    fn withdraw_inbound(&self, rule: &ForwardRule) -> bool {
        match synth::remove_forward(&self.paths.inbounds(), rule) {
            Ok(()) => true,
            Err(e) => {
                warn!(tag = %rule.tag, error = %e, "forward inbound left in place");
                false
            }
        }
    }

    fn restore_inbound(&self, rule: &ForwardRule) -> bool {
        match synth::upsert_forward(&self.paths.inbounds(), rule) {
            Ok(()) => true,
            Err(e) => {
                warn!(tag = %rule.tag, error = %e, "forward inbound could not be restored");
                false
            }
        }
    }
}
