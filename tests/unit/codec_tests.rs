//! Unit tests for the NDJSON line codec.

use bytes::BytesMut;
use mcp_engine::transport::codec::{LineCodec, MAX_LINE_BYTES};
use mcp_engine::AppError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(r#"{"jsonrpc":"2.0","#);
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);

    buf.extend_from_slice(b"\"method\":\"x\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("decode").as_deref(),
        Some(r#"{"jsonrpc":"2.0","method":"x"}"#)
    );
}

#[test]
fn blank_lines_are_skipped() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("\n\r\n{}\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("{}"));
}

#[test]
fn crlf_terminator_is_stripped() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\r\n");
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("{\"a\":1}"));
}

#[test]
fn oversized_line_is_discarded_and_next_frame_survives() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::with_capacity(MAX_LINE_BYTES + 16);
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 1]);
    buf.extend_from_slice(b"\n{}\n");

    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf).expect("decode") {
        frames.push(frame);
    }
    assert_eq!(frames, vec!["{}".to_owned()]);
}

#[test]
fn non_utf8_line_is_discarded_and_next_frame_survives() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(&b"{\"bad\":\"\xff\"}\n{}\n"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode").as_deref(), Some("{}"));
    assert!(buf.is_empty());
}

#[test]
fn trailing_frame_without_newline_flushes_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{}");
    assert_eq!(codec.decode_eof(&mut buf).expect("decode").as_deref(), Some("{}"));
}

#[test]
fn encoder_appends_newline() {
    let mut codec = LineCodec::new();
    let mut dst = BytesMut::new();
    codec.encode("{}".to_owned(), &mut dst).expect("encode");
    assert_eq!(&dst[..], b"{}\n");
}

#[test]
fn encoder_rejects_embedded_newline() {
    let mut codec = LineCodec::new();
    let mut dst = BytesMut::new();
    let err = codec
        .encode("{\n}".to_owned(), &mut dst)
        .expect_err("newline");
    assert!(matches!(err, AppError::Transport(_)));
    assert!(dst.is_empty());
}
