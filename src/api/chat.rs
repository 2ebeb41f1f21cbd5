use async_trait::async_trait;
use serde_json::Value;

use crate::api::client::ApiClient;
use crate::core::config::StreamOptions;
use crate::core::error::ApiError;
use crate::core::fragment::Fragment;

/// Pagination and filtering options for a history fetch.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: Option<u32>,
    pub order: Option<String>,
    pub order_by: Option<String>,
    pub group_id: Option<String>,
    pub include_err: bool,
}

impl MessageQuery {
    /// Newest-first page of the given size, the shape the session uses.
    pub fn page(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            order: Some("desc".into()),
            ..Self::default()
        }
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(before) = &self.before {
            params.push(format!("before={before}"));
        }
        if let Some(after) = &self.after {
            params.push(format!("after={after}"));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        if let Some(order) = &self.order {
            params.push(format!("order={order}"));
        }
        if let Some(order_by) = &self.order_by {
            params.push(format!("order_by={order_by}"));
        }
        if let Some(group_id) = &self.group_id {
            params.push(format!("group_id={group_id}"));
        }
        params.push(format!("include_err={}", self.include_err));
        join_params(&params)
    }
}

/// Options for a non-streaming send.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub group_id: Option<String>,
    pub max_steps: u32,
    pub include_return_message_types: Option<Vec<String>>,
    pub enable_thinking: bool,
    pub background: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            group_id: None,
            max_steps: 50,
            include_return_message_types: None,
            enable_thinking: true,
            background: false,
        }
    }
}

impl SendOptions {
    fn query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(group_id) = &self.group_id {
            params.push(format!("group_id={group_id}"));
        }
        params.push(format!("max_steps={}", self.max_steps));
        if let Some(types) = &self.include_return_message_types {
            params.push(format!(
                "include_return_message_types={}",
                types.join(",")
            ));
        }
        params.push(format!("enable_thinking={}", self.enable_thinking));
        params.push(format!("background={}", self.background));
        join_params(&params)
    }
}

/// A prepared streaming request: the endpoint and body the SSE client
/// should POST.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub endpoint: String,
    pub payload: Value,
}

/// Build the streaming-send request for one user message.
pub fn stream_request(agent_id: &str, text: &str, options: &StreamOptions) -> StreamRequest {
    let params = vec![
        format!("max_steps={}", options.max_steps),
        format!("enable_thinking={}", options.enable_thinking),
        format!("stream_tokens={}", options.stream_tokens),
        format!("include_pings={}", options.include_pings),
        format!("background={}", options.background),
    ];
    StreamRequest {
        endpoint: format!(
            "/v1/agents/{agent_id}/messages/stream{}",
            join_params(&params)
        ),
        payload: user_message_payload(text),
    }
}

/// Wire payload for sending one user message.
pub fn user_message_payload(text: &str) -> Value {
    serde_json::json!({
        "messages": [
            {
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": text,
                    }
                ],
            }
        ],
    })
}

fn join_params(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

/// What the session controller needs from the backend; kept as a trait so
/// tests can script it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_messages(
        &self,
        agent_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Fragment>, ApiError>;

    async fn send_message(
        &self,
        agent_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<Value, ApiError>;
}

/// REST chat operations against the agent backend.
pub struct ChatApi {
    client: ApiClient,
}

impl ChatApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Fetch one page of message history.
    pub async fn get_messages(
        &self,
        agent_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Fragment>, ApiError> {
        let endpoint = format!("/v1/agents/{agent_id}/messages{}", query.query_string());
        let value = self.client.get(&endpoint).await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().map(Fragment::from_value).collect())
            .unwrap_or_default())
    }

    /// Send a user message and wait for the complete response.
    pub async fn send_message(
        &self,
        agent_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<Value, ApiError> {
        let endpoint = format!("/v1/agents/{agent_id}/messages{}", options.query_string());
        self.client
            .post(&endpoint, Some(&user_message_payload(text)))
            .await
    }

    /// Fetch a single message by id.
    pub async fn get_message(&self, agent_id: &str, message_id: &str) -> Result<Value, ApiError> {
        self.client
            .get(&format!("/v1/agents/{agent_id}/messages/{message_id}"))
            .await
    }

    /// Delete a single message.
    pub async fn delete_message(
        &self,
        agent_id: &str,
        message_id: &str,
    ) -> Result<Value, ApiError> {
        self.client
            .delete(&format!("/v1/agents/{agent_id}/messages/{message_id}"))
            .await
    }

    /// Clear the agent's message history on the server.
    pub async fn reset_messages(
        &self,
        agent_id: &str,
        add_default_initial_messages: bool,
    ) -> Result<Value, ApiError> {
        let endpoint = format!(
            "/v1/agents/{agent_id}/reset-messages?add_default_initial_messages={add_default_initial_messages}"
        );
        self.client.patch(&endpoint, None).await
    }
}

#[async_trait]
impl ChatBackend for ChatApi {
    async fn fetch_messages(
        &self,
        agent_id: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Fragment>, ApiError> {
        self.get_messages(agent_id, query).await
    }

    async fn send_message(
        &self,
        agent_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<Value, ApiError> {
        ChatApi::send_message(self, agent_id, text, options).await
    }
}
