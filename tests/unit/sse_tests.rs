//! Unit tests for the client-side SSE decoder.

use mcp_engine::transport::sse::{decode_sse_events, SseDecoder};

#[test]
fn crlf_line_endings_are_accepted() {
    let events = decode_sse_events("event: message\r\ndata: {}\r\n\r\n");
    assert_eq!(events, vec!["{}".to_owned()]);
}

#[test]
fn trailing_event_without_blank_line_is_flushed() {
    let events = decode_sse_events("data: {\"last\":true}");
    assert_eq!(events, vec!["{\"last\":true}".to_owned()]);
}

#[test]
fn several_events_in_one_chunk_keep_their_order() {
    let mut decoder = SseDecoder::default();
    let events = decoder.push("data: 1\n\nid: 7\ndata: 2\n\ndata: 3\n\n");
    assert_eq!(events, vec!["1", "2", "3"]);
    assert_eq!(decoder.finish(), None);
}
