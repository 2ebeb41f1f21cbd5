use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::api::chat::{self, ChatBackend, MessageQuery, SendOptions};
use crate::core::config::AppConfig;
use crate::core::error::ChatClientError;
use crate::core::fragment::{Fragment, FragmentBody};
use crate::core::turn::{GroupedTurn, Turn};
use crate::reducer::{apply_fragment, group_fragments, TurnAccumulator};
use crate::stream::{Frame, SseClient, DONE_SENTINEL, EVENT_DONE, EVENT_ERROR, EVENT_MESSAGE};

/// Progress notifications for one streamed reply.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The in-progress turn changed; carries the full accumulator snapshot
    TurnUpdated(TurnAccumulator),
    /// The server confirmed the provisional user message
    UserConfirmed {
        provisional_id: String,
        fragment: Fragment,
    },
    /// Stream finished; the grouped turn, if anything arrived
    Completed(Option<GroupedTurn>),
    Failed {
        message: String,
    },
}

/// Keeps a streamed reply alive; dropping it cancels the stream.
pub struct StreamHandle {
    client: SseClient,
}

impl StreamHandle {
    pub fn cancel(&self) {
        self.client.disconnect();
    }

    pub fn is_active(&self) -> bool {
        self.client.is_connected()
    }
}

struct StreamingState {
    accumulator: TurnAccumulator,
    provisional_user_id: String,
}

#[derive(Default)]
struct SessionState {
    turns: Vec<Turn>,
    oldest_id: Option<String>,
    has_more: bool,
    streaming: Option<StreamingState>,
}

/// Orchestrates one chat view: history pages, optimistic sends, and the
/// streaming pipeline (frame parser feeding the fragment reducer).
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    config: AppConfig,
    agent_id: String,
    state: Arc<Mutex<SessionState>>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, config: AppConfig, agent_id: String) -> Self {
        Self {
            backend,
            config,
            agent_id,
            state: Arc::new(Mutex::new(SessionState {
                has_more: true,
                ..SessionState::default()
            })),
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        lock(&self.state).turns.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming.is_some()
    }

    pub fn has_more(&self) -> bool {
        lock(&self.state).has_more
    }

    /// Replace the turn list with the most recent history page.
    pub async fn load_history(&self) -> Result<(), ChatClientError> {
        let query = MessageQuery::page(self.config.page_size);
        let fragments = self
            .backend
            .fetch_messages(&self.agent_id, &query)
            .await?;

        let page_len = fragments.len();
        // newest-first page: the last element is the oldest, our cursor
        let cursor = fragments.last().map(|f| f.id.clone());

        let turns = prepare_turns(fragments);
        let mut st = lock(&self.state);
        st.turns = turns;
        st.oldest_id = cursor;
        st.has_more = page_len == self.config.page_size as usize;
        Ok(())
    }

    /// Prepend the next (older) history page.
    pub async fn load_more(&self) -> Result<(), ChatClientError> {
        let cursor = {
            let st = lock(&self.state);
            if !st.has_more {
                return Ok(());
            }
            st.oldest_id.clone()
        };

        let mut query = MessageQuery::page(self.config.page_size);
        if let Some(cursor) = cursor {
            query = query.before(cursor);
        }
        let fragments = self
            .backend
            .fetch_messages(&self.agent_id, &query)
            .await?;

        let page_len = fragments.len();
        if page_len == 0 {
            lock(&self.state).has_more = false;
            return Ok(());
        }
        let cursor = fragments.last().map(|f| f.id.clone());

        let mut turns = prepare_turns(fragments);
        let mut st = lock(&self.state);
        turns.append(&mut st.turns);
        st.turns = turns;
        st.oldest_id = cursor;
        st.has_more = page_len == self.config.page_size as usize;
        Ok(())
    }

    /// Send a message and wait for the complete response. The user turn is
    /// inserted optimistically and rolled back if the request fails.
    pub async fn send_message(&self, text: &str) -> Result<(), ChatClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatClientError::EmptyMessage);
        }

        let provisional = Fragment::provisional_user(text);
        let provisional_id = provisional.id.clone();
        lock(&self.state).turns.push(Turn::Single(provisional));

        let options = self.send_options();
        let response = match self
            .backend
            .send_message(&self.agent_id, text, &options)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.remove_turn(&provisional_id);
                return Err(e.into());
            }
        };

        let fragments: Vec<Fragment> = response
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Fragment::from_value).collect())
            .unwrap_or_default();

        if fragments.is_empty() {
            debug!("response carried no messages, reloading history");
            return self.load_history().await;
        }

        // the provisional turn stays unless the server echoed the user
        // message back
        if fragments
            .iter()
            .any(|f| matches!(f.body, FragmentBody::User))
        {
            self.remove_turn(&provisional_id);
        }

        let mut turns = prepare_turns(fragments);
        lock(&self.state).turns.append(&mut turns);
        Ok(())
    }

    /// Send a message and stream the reply. Fragments are applied to the
    /// in-progress turn as they arrive; progress flows through the
    /// returned channel. The handle cancels the stream when dropped.
    pub async fn stream_reply(
        &self,
        text: &str,
    ) -> Result<(UnboundedReceiver<SessionEvent>, StreamHandle), ChatClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatClientError::EmptyMessage);
        }
        if self.is_streaming() {
            return Err(ChatClientError::StreamInProgress);
        }
        let Some(token) = self.config.api_token.clone().filter(|t| !t.is_empty()) else {
            return Err(ChatClientError::MissingToken);
        };

        let provisional = Fragment::provisional_user(text);
        let provisional_id = provisional.id.clone();
        {
            let mut st = lock(&self.state);
            st.turns.push(Turn::Single(provisional));
            st.streaming = Some(StreamingState {
                accumulator: TurnAccumulator::new(),
                provisional_user_id: provisional_id.clone(),
            });
        }

        let request = chat::stream_request(&self.agent_id, text, &self.config.stream);
        let client = SseClient::new(
            self.config.base_url.clone(),
            Some(token),
            self.config.connect_timeout(),
        );

        // listeners go in before the connect so the very first frame of a
        // fast stream cannot slip past them
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let state = self.state.clone();
            let tx = tx.clone();
            client.on(EVENT_MESSAGE, move |payload, _frame: &Frame| {
                if is_done_payload(payload) {
                    complete_stream(&state, &tx);
                } else {
                    handle_fragment(&state, &tx, Fragment::from_value(payload));
                }
            });
        }
        {
            let state = self.state.clone();
            let tx = tx.clone();
            client.on(EVENT_DONE, move |_payload, _frame: &Frame| {
                complete_stream(&state, &tx);
            });
        }
        {
            let state = self.state.clone();
            client.on(EVENT_ERROR, move |payload, _frame: &Frame| {
                fail_stream(&state, &tx, payload);
            });
        }

        if let Err(e) = client
            .connect(&request.endpoint, &[], Some(&request.payload))
            .await
        {
            let mut st = lock(&self.state);
            st.streaming = None;
            st.turns.retain(|t| t.id() != provisional_id);
            return Err(e.into());
        }

        Ok((rx, StreamHandle { client }))
    }

    fn send_options(&self) -> SendOptions {
        SendOptions {
            max_steps: self.config.stream.max_steps,
            enable_thinking: self.config.stream.enable_thinking,
            background: self.config.stream.background,
            ..SendOptions::default()
        }
    }

    fn remove_turn(&self, id: &str) {
        lock(&self.state).turns.retain(|t| t.id() != id);
    }
}

/// Sort fragments chronologically, drop hidden system traffic, and group
/// them into turns.
fn prepare_turns(mut fragments: Vec<Fragment>) -> Vec<Turn> {
    fragments.retain(|f| !is_hidden_fragment(f));
    fragments.sort_by(|a, b| a.date.cmp(&b.date).then(a.seq_id.cmp(&b.seq_id)));
    group_fragments(&fragments)
}

const HIDDEN_MARKER: &str = "[This is an automated system message hidden from the user]";

/// Internal server traffic that must never reach the conversation view:
/// system fragments, and heartbeat/login/alert payloads disguised as user
/// messages.
fn is_hidden_fragment(fragment: &Fragment) -> bool {
    if matches!(fragment.body, FragmentBody::System) {
        return true;
    }
    if fragment.content.is_empty() {
        return false;
    }
    if let Ok(inner) = serde_json::from_str::<Value>(&fragment.content) {
        let inner_type = inner.get("type").and_then(Value::as_str);
        if matches!(inner_type, Some("heartbeat" | "login" | "system_alert")) {
            return true;
        }
        if inner
            .get("reason")
            .and_then(Value::as_str)
            .is_some_and(|r| r.contains(HIDDEN_MARKER))
        {
            return true;
        }
    }
    fragment.content.contains(HIDDEN_MARKER)
}

fn is_done_payload(payload: &Value) -> bool {
    payload.as_str() == Some(DONE_SENTINEL)
        || payload.get("content").and_then(Value::as_str) == Some(DONE_SENTINEL)
}

fn handle_fragment(
    state: &Arc<Mutex<SessionState>>,
    tx: &UnboundedSender<SessionEvent>,
    fragment: Fragment,
) {
    let mut st = lock(state);
    if st.streaming.is_none() {
        return;
    }

    if matches!(fragment.body, FragmentBody::User) {
        // server confirmation of the optimistic user turn
        let provisional_id = st
            .streaming
            .as_ref()
            .map(|s| s.provisional_user_id.clone())
            .unwrap_or_default();
        if let Some(turn) = st.turns.iter_mut().find(|t| t.id() == provisional_id) {
            *turn = Turn::Single(fragment.clone());
        }
        let _ = tx.send(SessionEvent::UserConfirmed {
            provisional_id,
            fragment,
        });
        return;
    }

    if let Some(streaming) = st.streaming.as_mut() {
        streaming.accumulator =
            apply_fragment(std::mem::take(&mut streaming.accumulator), &fragment);
        let snapshot = streaming.accumulator.clone();
        let _ = tx.send(SessionEvent::TurnUpdated(snapshot));
    }
}

fn complete_stream(state: &Arc<Mutex<SessionState>>, tx: &UnboundedSender<SessionEvent>) {
    let Some(streaming) = lock(state).streaming.take() else {
        // done can arrive both as a sentinel payload and as the stream-end
        // event; only the first one finalizes
        return;
    };

    let turn = streaming.accumulator.finalize();
    if let Some(group) = &turn {
        lock(state).turns.push(Turn::Grouped(group.clone()));
    }
    let _ = tx.send(SessionEvent::Completed(turn));
}

fn fail_stream(
    state: &Arc<Mutex<SessionState>>,
    tx: &UnboundedSender<SessionEvent>,
    payload: &Value,
) {
    let message = payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("streaming error")
        .to_string();

    if lock(state).streaming.take().is_none() {
        return;
    }
    warn!(error = %message, "stream failed, dropping in-progress turn");
    let _ = tx.send(SessionEvent::Failed { message });
}

fn lock(state: &Arc<Mutex<SessionState>>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
