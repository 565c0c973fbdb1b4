//! Unit tests for lifecycle and capability gating.
//!
//! | Direction            | Checked against          | Strict only |
//! |----------------------|--------------------------|-------------|
//! | inbound request      | local capabilities       | lifecycle   |
//! | inbound notification | peer capabilities (known)| lifecycle   |
//! | outbound request     | peer capabilities        | yes         |
//! | outbound notification| local capabilities       | yes         |

use mcp_engine::engine::{LifecycleState, Negotiator, Role};
use mcp_engine::protocol::capabilities::Capabilities;
use mcp_engine::protocol::lifecycle::{
    Implementation, InitializeParams, InitializeResult, LATEST_PROTOCOL_VERSION,
};
use mcp_engine::protocol::methods;
use mcp_engine::AppError;

fn client(strict: bool) -> Negotiator {
    Negotiator::new(
        Role::Client,
        Implementation::new("cli", "0.1"),
        Capabilities::default(),
    )
    .with_strict(strict)
}

fn server_result(capabilities: Capabilities) -> InitializeResult {
    InitializeResult {
        protocol_version: LATEST_PROTOCOL_VERSION.to_owned(),
        capabilities,
        server_info: Implementation::new("srv", "1.0"),
        instructions: None,
    }
}

fn missing(result: mcp_engine::Result<()>) -> Option<(String, &'static str)> {
    match result {
        Err(AppError::MissingCapability {
            capability, side, ..
        }) => Some((capability, side)),
        _ => None,
    }
}

// ── Outbound requests ─────────────────────────────────────────────────────────

#[test]
fn lenient_client_sends_anything_before_ready() {
    let negotiator = client(false);
    assert!(negotiator.gate_outbound_request(methods::TOOLS_CALL).is_ok());
    assert!(negotiator.gate_outbound_request("vendor/custom").is_ok());
}

#[test]
fn strict_client_must_finish_handshake_first() {
    let negotiator = client(true);
    assert!(matches!(
        negotiator.gate_outbound_request(methods::TOOLS_LIST),
        Err(AppError::NotInitialized(ref m)) if m == methods::TOOLS_LIST
    ));
    assert!(negotiator.gate_outbound_request(methods::PING).is_ok());
    assert!(negotiator.gate_outbound_request(methods::INITIALIZE).is_ok());
}

#[test]
fn strict_client_checks_server_capabilities() {
    let negotiator = client(true);
    let _ = negotiator.initialize_params();
    negotiator
        .accept_initialize_result(server_result(Capabilities::default().with_tools(false)))
        .expect("accept");
    assert_eq!(negotiator.state(), LifecycleState::Ready);

    assert!(negotiator.gate_outbound_request(methods::TOOLS_CALL).is_ok());
    assert_eq!(
        missing(negotiator.gate_outbound_request(methods::PROMPTS_GET)),
        Some(("prompts".to_owned(), "Server"))
    );
    assert!(negotiator.gate_outbound_request("vendor/custom").is_ok());
}

#[test]
fn subscribe_needs_resources_then_the_nested_flag() {
    let negotiator = client(true);
    let _ = negotiator.initialize_params();
    negotiator
        .accept_initialize_result(server_result(Capabilities::default()))
        .expect("accept");
    assert_eq!(
        missing(negotiator.gate_outbound_request(methods::RESOURCES_SUBSCRIBE)),
        Some(("resources".to_owned(), "Server"))
    );

    let negotiator = client(true);
    let _ = negotiator.initialize_params();
    negotiator
        .accept_initialize_result(server_result(
            Capabilities::default().with_resources(false, false),
        ))
        .expect("accept");
    assert!(negotiator.gate_outbound_request(methods::RESOURCES_READ).is_ok());
    assert_eq!(
        missing(negotiator.gate_outbound_request(methods::RESOURCES_SUBSCRIBE)),
        Some(("resources.subscribe".to_owned(), "Server"))
    );
}

// ── Inbound ───────────────────────────────────────────────────────────────────

#[test]
fn client_serves_roots_only_when_advertised() {
    let plain = client(false);
    assert_eq!(
        missing(plain.gate_inbound_request(methods::ROOTS_LIST)),
        Some(("roots".to_owned(), "Client"))
    );

    let with_roots = Negotiator::new(
        Role::Client,
        Implementation::new("cli", "0.1"),
        Capabilities::default().with_roots(true),
    );
    assert!(with_roots.gate_inbound_request(methods::ROOTS_LIST).is_ok());
}

#[test]
fn server_drops_notifications_the_client_cannot_send() {
    let negotiator = Negotiator::new(
        Role::Server,
        Implementation::new("srv", "1.0"),
        Capabilities::default(),
    );
    // Peer unknown: nothing to check against.
    assert!(negotiator
        .gate_inbound_notification(methods::NOTIFICATIONS_ROOTS_LIST_CHANGED)
        .is_ok());

    negotiator
        .handle_initialize(InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_owned(),
            capabilities: Capabilities::default(),
            client_info: Implementation::new("cli", "0.1"),
        })
        .expect("initialize");
    assert_eq!(
        missing(negotiator.gate_inbound_notification(methods::NOTIFICATIONS_ROOTS_LIST_CHANGED)),
        Some(("roots".to_owned(), "Client"))
    );
    assert!(negotiator
        .gate_inbound_notification(methods::NOTIFICATIONS_CANCELLED)
        .is_ok());
}

#[test]
fn strict_server_accepts_only_initialized_before_ready() {
    let negotiator = Negotiator::new(
        Role::Server,
        Implementation::new("srv", "1.0"),
        Capabilities::default(),
    )
    .with_strict(true);
    assert!(negotiator
        .gate_inbound_notification(methods::NOTIFICATIONS_INITIALIZED)
        .is_ok());
    assert!(matches!(
        negotiator.gate_inbound_notification(methods::NOTIFICATIONS_CANCELLED),
        Err(AppError::NotInitialized(_))
    ));
}

// ── Outbound notifications ────────────────────────────────────────────────────

#[test]
fn strict_server_cannot_announce_unadvertised_lists() {
    let strict = Negotiator::new(
        Role::Server,
        Implementation::new("srv", "1.0"),
        Capabilities::default().with_tools(true),
    )
    .with_strict(true);
    assert!(strict
        .gate_outbound_notification(methods::NOTIFICATIONS_TOOLS_LIST_CHANGED)
        .is_ok());
    assert_eq!(
        missing(strict.gate_outbound_notification(methods::NOTIFICATIONS_PROMPTS_LIST_CHANGED)),
        Some(("prompts".to_owned(), "Server"))
    );

    let lenient = Negotiator::new(
        Role::Server,
        Implementation::new("srv", "1.0"),
        Capabilities::default(),
    );
    assert!(lenient
        .gate_outbound_notification(methods::NOTIFICATIONS_PROMPTS_LIST_CHANGED)
        .is_ok());
}
