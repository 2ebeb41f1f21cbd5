use std::time::Duration;

use serde_json::json;

use super::sse::*;

fn decode_all(decoder: &mut FrameDecoder, wire: &[u8], chunk_size: usize) -> Vec<Frame> {
    let mut frames = Vec::new();
    for chunk in wire.chunks(chunk_size) {
        frames.extend(decoder.feed(chunk));
    }
    frames
}

#[test]
fn test_single_frame() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"event: message\ndata: {\"a\":1}\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event_type, "message");
    assert_eq!(frames[0].raw_data, "{\"a\":1}");
    assert!(frames[0].id.is_none());
    assert!(frames[0].retry.is_none());
}

#[test]
fn test_default_event_type() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"data: hello\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event_type, EVENT_MESSAGE);
    assert_eq!(frames[0].raw_data, "hello");
}

#[test]
fn test_dataless_block_emits_nothing() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"event: ping\n\n");
    assert!(frames.is_empty());

    // the blank line reset the pending event type as well
    let frames = decoder.feed(b"data: x\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event_type, EVENT_MESSAGE);
}

#[test]
fn test_multiline_data_concatenation() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"data: foo\ndata: bar\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw_data, "foo\nbar");
}

#[test]
fn test_leading_space_stripped_once() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"data:  two spaces\n\n");
    assert_eq!(frames[0].raw_data, " two spaces");

    let frames = decoder.feed(b"data:unspaced\n\n");
    assert_eq!(frames[0].raw_data, "unspaced");
}

#[test]
fn test_event_type_last_writer_wins() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"event: first\nevent: second\ndata: x\n\n");
    assert_eq!(frames[0].event_type, "second");
}

#[test]
fn test_id_and_retry_passthrough() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"id: 42\nretry: 3000\ndata: x\n\n");
    assert_eq!(frames[0].id.as_deref(), Some("42"));
    assert_eq!(frames[0].retry.as_deref(), Some("3000"));
}

#[test]
fn test_comment_lines_ignored() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b": keepalive\ndata: x\n: another comment\n\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw_data, "x");
}

#[test]
fn test_crlf_line_endings() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"event: update\r\ndata: foo\r\n\r\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event_type, "update");
    assert_eq!(frames[0].raw_data, "foo");
}

#[test]
fn test_unterminated_trailing_block_not_emitted() {
    let mut decoder = FrameDecoder::new();
    let frames = decoder.feed(b"data: complete\n\ndata: partial\n");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw_data, "complete");
}

#[test]
fn test_chunk_boundary_invariance() {
    let wire = "event: update\ndata: h\u{e9}llo \u{1f980} world\n\n\
                data: {\"content\": \"caf\u{e9}\"}\ndata: second line\n\n\
                event: done\ndata: [DONE]\n\n"
        .as_bytes();

    let mut reference = FrameDecoder::new();
    let expected = reference.feed(wire);
    assert_eq!(expected.len(), 3);

    for chunk_size in [1, 2, 3, 5, 7, 11, 64] {
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, wire, chunk_size);
        assert_eq!(frames, expected, "chunk size {chunk_size}");
    }
}

#[test]
fn test_utf8_split_across_chunks() {
    let wire = "data: \u{1f980}\n\n".as_bytes();
    // split inside the 4-byte emoji
    let mid = wire.len() - 4;
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.feed(&wire[..mid]);
    frames.extend(decoder.feed(&wire[mid..]));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw_data, "\u{1f980}");
}

#[test]
fn test_decode_payload_json() {
    let payload = decode_payload(r#"{"message_type": "assistant_message", "content": "hi"}"#);
    assert_eq!(payload["message_type"], "assistant_message");
    assert_eq!(payload["content"], "hi");
}

#[test]
fn test_decode_payload_plain_text_wraps() {
    let payload = decode_payload("not json at all");
    assert_eq!(payload, json!({"content": "not json at all"}));

    let payload = decode_payload("[DONE]");
    assert_eq!(payload, json!({"content": "[DONE]"}));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let client = SseClient::new(
        "http://localhost:0",
        Some("token".into()),
        Duration::from_millis(100),
    );
    // never connected
    client.disconnect();
    client.disconnect();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connect_failure_rejects() {
    // nothing listens on port 1; connect must fail, not hang
    let client = SseClient::new("http://127.0.0.1:1", None, Duration::from_secs(5));
    let result = client.connect("/v1/agents/a/messages/stream", &[], None).await;
    assert!(result.is_err());
    assert!(!client.is_connected());
    // disconnect after a failed connect is still safe
    client.disconnect();
}

#[tokio::test]
async fn test_listener_registration() {
    let client = SseClient::new("http://localhost:0", None, Duration::from_millis(100));
    let id = client.on(EVENT_MESSAGE, |_payload, _frame| {});
    assert!(client.off(EVENT_MESSAGE, id));
    // second removal is a no-op
    assert!(!client.off(EVENT_MESSAGE, id));
    // unknown event type
    assert!(!client.off(EVENT_DONE, id));
}
