use super::chat::*;
use super::client::ApiClient;

#[test]
fn test_message_query_page() {
    let query = MessageQuery::page(50);
    assert_eq!(query.query_string(), "?limit=50&order=desc&include_err=false");
}

#[test]
fn test_message_query_with_cursor() {
    let query = MessageQuery::page(25).before("msg-100");
    assert_eq!(
        query.query_string(),
        "?before=msg-100&limit=25&order=desc&include_err=false"
    );
}

#[test]
fn test_message_query_full() {
    let query = MessageQuery {
        before: Some("b".into()),
        after: Some("a".into()),
        limit: Some(10),
        order: Some("asc".into()),
        order_by: Some("created_at".into()),
        group_id: Some("g1".into()),
        include_err: true,
    };
    assert_eq!(
        query.query_string(),
        "?before=b&after=a&limit=10&order=asc&order_by=created_at&group_id=g1&include_err=true"
    );
}

#[test]
fn test_send_options_defaults() {
    let options = SendOptions::default();
    assert_eq!(options.max_steps, 50);
    assert!(options.enable_thinking);
    assert!(!options.background);
    assert!(options.group_id.is_none());
}

#[test]
fn test_user_message_payload_shape() {
    let payload = user_message_payload("what's the weather?");
    let message = &payload["messages"][0];
    assert_eq!(message["role"], "user");
    assert_eq!(message["content"][0]["type"], "text");
    assert_eq!(message["content"][0]["text"], "what's the weather?");
}

#[test]
fn test_stream_request_construction() {
    let options = crate::core::config::StreamOptions::default();
    let request = stream_request("agent-1", "hello", &options);

    assert!(request.endpoint.starts_with("/v1/agents/agent-1/messages/stream?"));
    assert!(request.endpoint.contains("max_steps=50"));
    assert!(request.endpoint.contains("enable_thinking=true"));
    assert!(request.endpoint.contains("stream_tokens=true"));
    assert!(request.endpoint.contains("include_pings=false"));
    assert!(request.endpoint.contains("background=false"));
    assert_eq!(request.payload["messages"][0]["content"][0]["text"], "hello");
}

#[test]
fn test_api_client_holds_auth() {
    let client = ApiClient::new("https://backend.example.com", Some("secret".into()));
    assert_eq!(client.base_url(), "https://backend.example.com");
    assert_eq!(client.auth_token(), Some("secret"));

    let anonymous = ApiClient::new("https://backend.example.com", None);
    assert!(anonymous.auth_token().is_none());
}
