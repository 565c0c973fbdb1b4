//! `initialize` handshake, protocol version negotiation, and capability gating.
//!
//! One [`Negotiator`] exists per connection. Its lifecycle only moves
//! forward: `Uninitialized → Initializing → Ready`.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::protocol::capabilities::Capabilities;
use crate::protocol::lifecycle::{
    is_supported_version, negotiate_version, Implementation, InitializeParams, InitializeResult,
};
use crate::protocol::message::ErrorObject;
use crate::protocol::methods::{self, allowed_before_ready, required_capability};
use crate::{AppError, Result};

/// Which end of the protocol this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `initialize`.
    Client,
    /// Answers `initialize`.
    Server,
}

impl Role {
    /// Name used in capability errors.
    #[must_use]
    pub fn side(self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Server => "Server",
        }
    }

    /// The opposite role.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing exchanged yet.
    Uninitialized,
    /// `initialize` sent or received.
    Initializing,
    /// Handshake complete.
    Ready,
}

/// What the handshake learned about the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Capabilities the peer advertised.
    pub capabilities: Capabilities,
    /// Peer identity.
    pub info: Implementation,
    /// Server instructions (client side only).
    pub instructions: Option<String>,
}

/// Per-connection handshake state and gating rules.
#[derive(Debug)]
pub struct Negotiator {
    role: Role,
    strict: bool,
    local_info: Implementation,
    local_capabilities: Capabilities,
    instructions: Option<String>,
    preferred_version: String,
    pinned_version: Option<String>,
    state: Mutex<LifecycleState>,
    peer: Mutex<Option<PeerInfo>>,
}

impl Negotiator {
    /// Build a negotiator for `role` advertising `capabilities`.
    #[must_use]
    pub fn new(role: Role, info: Implementation, capabilities: Capabilities) -> Self {
        Self {
            role,
            strict: false,
            local_info: info,
            local_capabilities: capabilities,
            instructions: None,
            preferred_version: crate::protocol::lifecycle::LATEST_PROTOCOL_VERSION.to_owned(),
            pinned_version: None,
            state: Mutex::new(LifecycleState::Uninitialized),
            peer: Mutex::new(None),
        }
    }

    /// Enforce the lifecycle before `Ready`.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Server: usage hints returned from `initialize`.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Version a server falls back to, or a client requests.
    #[must_use]
    pub fn with_preferred_version(mut self, version: impl Into<String>) -> Self {
        self.preferred_version = version.into();
        self
    }

    /// Client: require the server to choose exactly `version`.
    #[must_use]
    pub fn with_pinned_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.preferred_version.clone_from(&version);
        self.pinned_version = Some(version);
        self
    }

    /// This side's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether strict lifecycle enforcement is on.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Capabilities this side advertises.
    #[must_use]
    pub fn local_capabilities(&self) -> &Capabilities {
        &self.local_capabilities
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the handshake has completed. Permanent once true.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// What the handshake learned about the peer.
    #[must_use]
    pub fn peer(&self) -> Option<PeerInfo> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Negotiated protocol version, once known.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.peer().map(|peer| peer.protocol_version)
    }

    fn advance(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != LifecycleState::Ready {
            debug!(from = ?*state, to = ?next, "lifecycle transition");
            *state = next;
        }
    }

    // ── Server handshake ────────────────────────────────────────────────────

    /// Answer an inbound `initialize`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the connection was already initialized.
    pub fn handle_initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != LifecycleState::Uninitialized {
                return Err(AppError::Rpc(ErrorObject::invalid_request("already initialized")));
            }
            *state = LifecycleState::Initializing;
        }

        let version = negotiate_version(&params.protocol_version, &self.preferred_version);
        if version != params.protocol_version {
            warn!(
                requested = %params.protocol_version,
                chosen = %version,
                "client requested an unsupported protocol version"
            );
        }
        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %version,
            "initialize received"
        );

        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(PeerInfo {
            protocol_version: version.clone(),
            capabilities: params.capabilities,
            info: params.client_info,
            instructions: None,
        });

        Ok(InitializeResult {
            protocol_version: version,
            capabilities: self.local_capabilities.clone(),
            server_info: self.local_info.clone(),
            instructions: self.instructions.clone(),
        })
    }

    /// Record `notifications/initialized` from the client. Only an answered
    /// `initialize` can be confirmed; an early notification is ignored.
    /// Returns whether the connection is now `Ready`.
    pub fn mark_peer_initialized(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            LifecycleState::Initializing => {
                debug!(from = ?*state, to = ?LifecycleState::Ready, "lifecycle transition");
                *state = LifecycleState::Ready;
                true
            }
            LifecycleState::Ready => true,
            LifecycleState::Uninitialized => {
                warn!("initialized notification before initialize; ignored");
                false
            }
        }
    }

    // ── Client handshake ────────────────────────────────────────────────────

    /// Build the outbound `initialize` params and enter `Initializing`.
    #[must_use]
    pub fn initialize_params(&self) -> InitializeParams {
        self.advance(LifecycleState::Initializing);
        InitializeParams {
            protocol_version: self.preferred_version.clone(),
            capabilities: self.local_capabilities.clone(),
            client_info: self.local_info.clone(),
        }
    }

    /// Check the server's `initialize` result and enter `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Handshake`] when the server chose a version other
    /// than the pinned one, or one this crate does not know.
    pub fn accept_initialize_result(&self, result: InitializeResult) -> Result<PeerInfo> {
        if let Some(pinned) = &self.pinned_version {
            if &result.protocol_version != pinned {
                return Err(AppError::Handshake(format!(
                    "server chose protocol version {}, pinned {pinned}",
                    result.protocol_version
                )));
            }
        }
        if !is_supported_version(&result.protocol_version) {
            return Err(AppError::Handshake(format!(
                "unsupported protocol version {}",
                result.protocol_version
            )));
        }

        let peer = PeerInfo {
            protocol_version: result.protocol_version,
            capabilities: result.capabilities,
            info: result.server_info,
            instructions: result.instructions,
        };
        info!(
            server = %peer.info.name,
            server_version = %peer.info.version,
            protocol_version = %peer.protocol_version,
            "initialize accepted"
        );
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer.clone());
        self.advance(LifecycleState::Ready);
        Ok(peer)
    }

    // ── Gating ──────────────────────────────────────────────────────────────

    /// Check an inbound request against the lifecycle and this side's capabilities.
    ///
    /// # Errors
    ///
    /// [`AppError::NotInitialized`] before `Ready` in strict mode, or
    /// [`AppError::MissingCapability`] when this side did not advertise what
    /// `method` needs.
    pub fn gate_inbound_request(&self, method: &str) -> Result<()> {
        if self.strict && !allowed_before_ready(method) && !self.is_initialized() {
            return Err(AppError::NotInitialized(method.to_owned()));
        }
        check_capability(method, &self.local_capabilities, self.role.side())
    }

    /// Check an inbound notification. Failing notifications are dropped.
    ///
    /// # Errors
    ///
    /// [`AppError::NotInitialized`] before `Ready` in strict mode, or
    /// [`AppError::MissingCapability`] when the peer did not advertise what
    /// `method` implies.
    pub fn gate_inbound_notification(&self, method: &str) -> Result<()> {
        if self.strict && method != methods::NOTIFICATIONS_INITIALIZED && !self.is_initialized() {
            return Err(AppError::NotInitialized(method.to_owned()));
        }
        match self.peer() {
            Some(peer) => check_capability(method, &peer.capabilities, self.role.peer().side()),
            None => Ok(()),
        }
    }

    /// Check an outbound request. Lenient engines send anything.
    ///
    /// # Errors
    ///
    /// [`AppError::NotInitialized`] before `Ready`, or
    /// [`AppError::MissingCapability`] when the peer did not advertise what
    /// `method` needs.
    pub fn gate_outbound_request(&self, method: &str) -> Result<()> {
        if !self.strict || allowed_before_ready(method) {
            return Ok(());
        }
        let Some(peer) = self.peer().filter(|_| self.is_initialized()) else {
            return Err(AppError::NotInitialized(method.to_owned()));
        };
        check_capability(method, &peer.capabilities, self.role.peer().side())
    }

    /// Check an outbound notification against this side's capabilities.
    ///
    /// # Errors
    ///
    /// [`AppError::MissingCapability`] in strict mode when this side did not
    /// advertise what `method` implies.
    pub fn gate_outbound_notification(&self, method: &str) -> Result<()> {
        if !self.strict {
            return Ok(());
        }
        check_capability(method, &self.local_capabilities, self.role.side())
    }
}

fn check_capability(method: &str, capabilities: &Capabilities, side: &'static str) -> Result<()> {
    let Some(required) = required_capability(method) else {
        return Ok(());
    };
    match capabilities.missing(required) {
        Some(capability) => Err(AppError::MissingCapability {
            method: method.to_owned(),
            capability: capability.to_owned(),
            side,
        }),
        None => Ok(()),
    }
}
