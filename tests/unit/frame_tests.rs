//! Unit tests for JSON-RPC frame classification and encoding.

use mcp_engine::protocol::message::{
    ErrorObject, Frame, Message, Notification, Outcome, Request, RequestId, Response,
    INTERNAL_ERROR, METHOD_NOT_FOUND,
};
use serde_json::{json, Value};

#[test]
fn notification_has_no_id() {
    let msg = Message::parse(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .expect("parse");
    assert!(matches!(msg, Message::Notification(_)));
    assert_eq!(msg.id(), None);
    assert_eq!(msg.method(), Some("notifications/initialized"));
}

#[test]
fn null_id_with_method_is_a_notification() {
    let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "x"}))
        .expect("classify");
    assert!(matches!(msg, Message::Notification(_)));
}

#[test]
fn error_response_decodes_into_rpc_error() {
    let msg = Message::parse(
        r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Method not found"}}"#,
    )
    .expect("parse");
    let Message::Response(response) = msg else {
        panic!("expected a response");
    };
    assert_eq!(response.id, Some(RequestId::Number(4)));
    let err = response.into_result().expect_err("error outcome");
    assert!(matches!(
        err,
        mcp_engine::AppError::Rpc(ErrorObject { code: METHOD_NOT_FOUND, .. })
    ));
}

#[test]
fn response_with_result_and_error_is_malformed() {
    let err = Message::from_value(json!({
        "jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}
    }))
    .expect_err("both members");
    assert_eq!(err.id, Some(RequestId::Number(1)));
}

#[test]
fn batch_frame_encodes_as_array_in_order() {
    let frame = Frame::Batch(vec![
        Message::Request(Request::new(RequestId::Number(1), "ping", None)),
        Message::Notification(Notification::new("notifications/progress", Some(json!({})))),
    ]);
    let text = frame.encode().expect("encode");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value[0]["id"], json!(1));
    assert_eq!(value[0]["method"], json!("ping"));
    assert_eq!(value[1]["method"], json!("notifications/progress"));
    assert!(value[1].get("id").is_none());
    assert!(!text.contains('\n'));
}

#[test]
fn empty_batch_does_not_decode() {
    assert!(Frame::decode("[]").is_err());
}

#[test]
fn batch_with_one_bad_member_does_not_decode() {
    let raw = r#"[{"jsonrpc":"2.0","id":1,"method":"a"},{"jsonrpc":"2.0","id":2}]"#;
    assert!(Frame::decode(raw).is_err());
}

#[test]
fn request_without_params_omits_the_member() {
    let text = Frame::Single(Message::Request(Request::new(
        RequestId::from("a-1"),
        "tools/list",
        None,
    )))
    .encode()
    .expect("encode");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value, json!({"jsonrpc": "2.0", "id": "a-1", "method": "tools/list"}));
}

#[test]
fn success_response_round_trips_outcome() {
    let text = serde_json::to_string(&Response::success(RequestId::Number(9), json!({"ok": 1})))
        .expect("encode");
    let Message::Response(response) = Message::parse(&text).expect("parse") else {
        panic!("expected a response");
    };
    assert_eq!(response.outcome, Outcome::Result(json!({"ok": 1})));
}

#[test]
fn internal_error_keeps_data() {
    let err = ErrorObject::internal_error("Internal error").with_data(json!("Tool not found x"));
    let value = serde_json::to_value(&err).expect("encode");
    assert_eq!(value["code"], json!(INTERNAL_ERROR));
    assert_eq!(value["data"], json!("Tool not found x"));
}

#[test]
fn frames_survive_encode_then_decode() {
    let request = Message::Request(Request::new(
        RequestId::Number(3),
        "tools/call",
        Some(json!({"name": "echo", "arguments": {"text": "hi"}, "_meta": {"progressToken": 3}})),
    ));
    let notification = Message::Notification(Notification::new("notifications/initialized", None));
    let failure = Message::Response(Response::error(
        Some(RequestId::from("r-7")),
        ErrorObject::internal_error("Internal error").with_data(json!("boom")),
    ));

    for frame in [
        Frame::Single(request.clone()),
        Frame::Single(notification.clone()),
        Frame::Batch(vec![request, notification, failure]),
    ] {
        let text = frame.encode().expect("encode");
        assert_eq!(Frame::decode(&text).expect("decode"), frame);
    }
}
