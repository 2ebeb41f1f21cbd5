use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::*;
use crate::api::chat::{ChatBackend, MessageQuery, SendOptions};
use crate::core::config::AppConfig;
use crate::core::error::{ApiError, ChatClientError};
use crate::core::fragment::Fragment;

struct MockBackend {
    /// Pages handed out per fetch, newest-first like the server
    pages: Mutex<VecDeque<Vec<Value>>>,
    send_result: Result<Value, ApiError>,
    queries: Mutex<Vec<MessageQuery>>,
}

impl MockBackend {
    fn with_pages(pages: Vec<Vec<Value>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            send_result: Ok(Value::Null),
            queries: Mutex::new(Vec::new()),
        })
    }

    fn with_send_result(result: Result<Value, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(VecDeque::new()),
            send_result: result,
            queries: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn fetch_messages(
        &self,
        _agent_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Fragment>, ApiError> {
        self.queries.lock().unwrap().push(query.clone());
        let page = self.pages.lock().unwrap().pop_front().unwrap_or_default();
        Ok(page.iter().map(Fragment::from_value).collect())
    }

    async fn send_message(
        &self,
        _agent_id: &str,
        _text: &str,
        _options: &SendOptions,
    ) -> Result<Value, ApiError> {
        self.send_result.clone()
    }
}

fn wire_user(id: &str, content: &str, date: &str) -> Value {
    json!({"id": id, "message_type": "user_message", "content": content, "date": date})
}

fn wire_assistant(id: &str, content: &str, date: &str) -> Value {
    json!({"id": id, "message_type": "assistant_message", "content": content, "date": date})
}

fn wire_reasoning(id: &str, text: &str, date: &str) -> Value {
    json!({"id": id, "message_type": "reasoning_message", "reasoning": text, "date": date})
}

fn session_with(backend: Arc<dyn ChatBackend>, config: AppConfig) -> ChatSession {
    ChatSession::new(backend, config, "agent-1".into())
}

#[tokio::test]
async fn test_load_history_sorts_and_groups() {
    // server pages are newest-first
    let backend = MockBackend::with_pages(vec![vec![
        wire_assistant("a1", "the answer", "2025-06-01T10:00:03Z"),
        wire_reasoning("r1", "thinking", "2025-06-01T10:00:02Z"),
        wire_user("u1", "the question", "2025-06-01T10:00:01Z"),
    ]]);
    let session = session_with(backend, AppConfig::default());

    session.load_history().await.unwrap();
    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].id(), "u1");
    match &turns[1] {
        Turn::Grouped(group) => {
            assert_eq!(group.id, "a1");
            assert_eq!(group.blocks.len(), 2);
        }
        other => panic!("expected grouped turn, got {other:?}"),
    }
    // short page: no more history
    assert!(!session.has_more());
}

#[tokio::test]
async fn test_load_history_filters_hidden_traffic() {
    let backend = MockBackend::with_pages(vec![vec![
        wire_assistant("a1", "visible", "2025-06-01T10:00:03Z"),
        json!({
            "id": "s1", "message_type": "system_message",
            "content": "internal prompt", "date": "2025-06-01T10:00:02Z",
        }),
        json!({
            "id": "h1", "message_type": "user_message",
            "content": "{\"type\": \"heartbeat\", \"reason\": \"timer\"}",
            "date": "2025-06-01T10:00:01Z",
        }),
    ]]);
    let session = session_with(backend, AppConfig::default());

    session.load_history().await.unwrap();
    let turns = session.turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].id(), "a1");
}

#[tokio::test]
async fn test_load_more_prepends_older_page() {
    let config = AppConfig {
        page_size: 2,
        ..AppConfig::default()
    };
    let backend = MockBackend::with_pages(vec![
        vec![
            wire_assistant("a2", "second answer", "2025-06-01T10:00:04Z"),
            wire_user("u2", "second question", "2025-06-01T10:00:03Z"),
        ],
        vec![
            wire_assistant("a1", "first answer", "2025-06-01T10:00:02Z"),
            wire_user("u1", "first question", "2025-06-01T10:00:01Z"),
        ],
        vec![],
    ]);
    let session = session_with(backend.clone(), config);

    session.load_history().await.unwrap();
    assert!(session.has_more());

    session.load_more().await.unwrap();
    let ids: Vec<String> = session.turns().iter().map(|t| t.id().to_string()).collect();
    assert_eq!(ids, vec!["u1", "a1", "u2", "a2"]);

    // pagination cursor was the oldest id of the first page
    let queries = backend.queries.lock().unwrap();
    assert_eq!(queries[1].before.as_deref(), Some("u2"));
    drop(queries);

    // empty page flips has_more off
    session.load_more().await.unwrap();
    assert!(!session.has_more());
}

#[tokio::test]
async fn test_send_message_appends_grouped_response() {
    let backend = MockBackend::with_send_result(Ok(json!({
        "messages": [
            wire_reasoning("r1", "thinking", "2025-06-01T10:00:01Z"),
            wire_assistant("a1", "the answer", "2025-06-01T10:00:02Z"),
        ],
    })));
    let session = session_with(backend, AppConfig::default());

    session.send_message("question").await.unwrap();
    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    // provisional user turn stays when the server does not echo it
    assert!(matches!(&turns[0], Turn::Single(f) if f.is_provisional()));
    assert!(matches!(&turns[1], Turn::Grouped(g) if g.id == "a1"));
}

#[tokio::test]
async fn test_send_message_reconciles_echoed_user() {
    let backend = MockBackend::with_send_result(Ok(json!({
        "messages": [
            wire_user("u-real", "question", "2025-06-01T10:00:01Z"),
            wire_assistant("a1", "the answer", "2025-06-01T10:00:02Z"),
        ],
    })));
    let session = session_with(backend, AppConfig::default());

    session.send_message("question").await.unwrap();
    let turns = session.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].id(), "u-real");
    assert!(turns.iter().all(|t| match t {
        Turn::Single(f) => !f.is_provisional(),
        Turn::Grouped(_) => true,
    }));
}

#[tokio::test]
async fn test_send_message_rolls_back_on_error() {
    let backend = MockBackend::with_send_result(Err(ApiError::Server {
        status: 500,
        message: "boom".into(),
    }));
    let session = session_with(backend, AppConfig::default());

    let result = session.send_message("question").await;
    assert!(result.is_err());
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn test_send_message_rejects_empty() {
    let backend = MockBackend::with_send_result(Ok(Value::Null));
    let session = session_with(backend, AppConfig::default());

    let result = session.send_message("   ").await;
    assert!(matches!(result, Err(ChatClientError::EmptyMessage)));
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn test_stream_reply_requires_token() {
    let backend = MockBackend::with_send_result(Ok(Value::Null));
    let session = session_with(backend, AppConfig::default());

    let result = session.stream_reply("question").await;
    assert!(matches!(result, Err(ChatClientError::MissingToken)));
    assert!(session.turns().is_empty());
    assert!(!session.is_streaming());
}

#[tokio::test]
async fn test_stream_reply_connect_failure_rolls_back() {
    let backend = MockBackend::with_send_result(Ok(Value::Null));
    let config = AppConfig {
        // nothing listens here; connect fails fast
        base_url: "http://127.0.0.1:1".into(),
        api_token: Some("token".into()),
        ..AppConfig::default()
    };
    let session = session_with(backend, config);

    let result = session.stream_reply("question").await;
    assert!(result.is_err());
    assert!(session.turns().is_empty());
    assert!(!session.is_streaming());
}

// ---- streaming internals, driven directly ----

fn streaming_state(provisional_id: &str) -> Arc<Mutex<SessionState>> {
    Arc::new(Mutex::new(SessionState {
        turns: vec![Turn::Single(Fragment {
            id: provisional_id.to_string(),
            content: "question".into(),
            body: FragmentBody::User,
            ..Fragment::unknown(None)
        })],
        oldest_id: None,
        has_more: false,
        streaming: Some(StreamingState {
            accumulator: TurnAccumulator::new(),
            provisional_user_id: provisional_id.to_string(),
        }),
    }))
}

#[tokio::test]
async fn test_handle_fragment_updates_accumulator() {
    let state = streaming_state("temp-1");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let fragment = Fragment::from_value(&json!({
        "id": "a1", "message_type": "assistant_message", "content": "Hello",
    }));
    handle_fragment(&state, &tx, fragment);

    match rx.try_recv().unwrap() {
        SessionEvent::TurnUpdated(acc) => {
            assert_eq!(acc.content, "Hello");
            assert_eq!(acc.id, "a1");
        }
        other => panic!("expected TurnUpdated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handle_fragment_reconciles_user_turn() {
    let state = streaming_state("temp-1");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let confirmed = Fragment::from_value(&json!({
        "id": "u-real", "message_type": "user_message", "content": "question",
    }));
    handle_fragment(&state, &tx, confirmed);

    match rx.try_recv().unwrap() {
        SessionEvent::UserConfirmed {
            provisional_id,
            fragment,
        } => {
            assert_eq!(provisional_id, "temp-1");
            assert_eq!(fragment.id, "u-real");
        }
        other => panic!("expected UserConfirmed, got {other:?}"),
    }

    let st = state.lock().unwrap();
    assert_eq!(st.turns[0].id(), "u-real");
    // the accumulator is untouched by user fragments
    assert!(st.streaming.as_ref().unwrap().accumulator.is_empty());
}

#[tokio::test]
async fn test_complete_stream_finalizes_once() {
    let state = streaming_state("temp-1");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let fragment = Fragment::from_value(&json!({
        "id": "a1", "message_type": "assistant_message", "content": "Done deal",
    }));
    handle_fragment(&state, &tx, fragment);
    let _ = rx.try_recv();

    // done arrives both as sentinel payload and as the stream-end event
    complete_stream(&state, &tx);
    complete_stream(&state, &tx);

    match rx.try_recv().unwrap() {
        SessionEvent::Completed(Some(group)) => {
            assert_eq!(group.assistant_text(), "Done deal");
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "second completion must not fire");

    let st = state.lock().unwrap();
    assert!(st.streaming.is_none());
    assert_eq!(st.turns.len(), 2);
}

#[tokio::test]
async fn test_complete_stream_without_content_keeps_no_turn() {
    let state = streaming_state("temp-1");
    let (tx, mut rx) = mpsc::unbounded_channel();

    complete_stream(&state, &tx);
    match rx.try_recv().unwrap() {
        SessionEvent::Completed(None) => {}
        other => panic!("expected empty completion, got {other:?}"),
    }
    // only the user turn remains; done without content is not an error
    assert_eq!(state.lock().unwrap().turns.len(), 1);
}

#[tokio::test]
async fn test_fail_stream_drops_in_progress_turn() {
    let state = streaming_state("temp-1");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let fragment = Fragment::from_value(&json!({
        "id": "a1", "message_type": "assistant_message", "content": "partial",
    }));
    handle_fragment(&state, &tx, fragment);
    let _ = rx.try_recv();

    fail_stream(&state, &tx, &json!({"error": "connection reset"}));
    match rx.try_recv().unwrap() {
        SessionEvent::Failed { message } => assert_eq!(message, "connection reset"),
        other => panic!("expected Failed, got {other:?}"),
    }

    let st = state.lock().unwrap();
    assert!(st.streaming.is_none());
    // the in-progress agent turn was discarded
    assert_eq!(st.turns.len(), 1);
    drop(st);

    // a late done after the failure is a no-op
    complete_stream(&state, &tx);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_done_payload_detection() {
    assert!(is_done_payload(&json!("[DONE]")));
    assert!(is_done_payload(&json!({"content": "[DONE]"})));
    assert!(!is_done_payload(&json!({"content": "text"})));
    assert!(!is_done_payload(&json!({"message_type": "assistant_message"})));
}

#[test]
fn test_hidden_fragment_detection() {
    let heartbeat = Fragment::from_value(&json!({
        "id": "h1", "message_type": "user_message",
        "content": "{\"type\": \"heartbeat\"}",
    }));
    assert!(is_hidden_fragment(&heartbeat));

    let automated = Fragment::from_value(&json!({
        "id": "h2", "message_type": "user_message",
        "content": "[This is an automated system message hidden from the user] wake up",
    }));
    assert!(is_hidden_fragment(&automated));

    let normal = Fragment::from_value(&json!({
        "id": "u1", "message_type": "user_message", "content": "hello",
    }));
    assert!(!is_hidden_fragment(&normal));
}
