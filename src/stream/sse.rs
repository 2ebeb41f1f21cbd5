use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::error::StreamError;

/// Default event type when a frame carries no `event:` line.
pub const EVENT_MESSAGE: &str = "message";
/// Fired once when the stream ends without error.
pub const EVENT_DONE: &str = "done";
/// Fired once when the read loop fails.
pub const EVENT_ERROR: &str = "error";
/// Completion marker handed to `done` listeners.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded SSE protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event_type: String,
    pub raw_data: String,
    pub id: Option<String>,
    pub retry: Option<String>,
}

/// Incremental SSE framing parser.
///
/// Feed it arbitrarily-chunked bytes; it returns every frame completed by
/// the chunk. Chunk boundaries need not align with line or frame
/// boundaries, and UTF-8 sequences split across chunks are carried over
/// intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Incomplete UTF-8 tail from the previous chunk
    carry: Vec<u8>,
    /// Incomplete line tail from the previous chunk
    line_buf: String,
    event_type: Option<String>,
    data: String,
    id: Option<String>,
    retry: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of raw bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let text = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(err) => {
                let utf8_err = err.utf8_error();
                let mut bytes = err.into_bytes();
                if utf8_err.error_len().is_none() {
                    // character split across the chunk boundary: keep the
                    // tail for the next chunk
                    self.carry = bytes.split_off(utf8_err.valid_up_to());
                    String::from_utf8(bytes).unwrap_or_default()
                } else {
                    // invalid bytes mid-stream: decode lossily rather than
                    // stall the parser
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            }
        };

        self.feed_str(&text)
    }

    /// Feed already-decoded text.
    pub fn feed_str(&mut self, text: &str) -> Vec<Frame> {
        self.line_buf.push_str(text);

        let mut frames = Vec::new();
        while let Some(pos) = self.line_buf.find('\n') {
            let mut line: String = self.line_buf.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(frame) = self.take_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn take_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.finish_block();
        }
        if line.starts_with(':') {
            // comment line
            return None;
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event_type = Some(strip_field_space(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push_str(strip_field_space(rest));
            self.data.push('\n');
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.id = Some(strip_field_space(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("retry:") {
            self.retry = Some(strip_field_space(rest).to_string());
        }
        None
    }

    /// Blank line: emit the accumulated frame if it has data, reset either way.
    fn finish_block(&mut self) -> Option<Frame> {
        let event_type = self
            .event_type
            .take()
            .unwrap_or_else(|| EVENT_MESSAGE.to_string());
        let mut data = std::mem::take(&mut self.data);
        let id = self.id.take();
        let retry = self.retry.take();

        if data.is_empty() {
            return None;
        }
        if data.ends_with('\n') {
            data.pop();
        }
        Some(Frame {
            event_type,
            raw_data: data,
            id,
            retry,
        })
    }
}

/// SSE spec strips one leading space after the field colon.
fn strip_field_space(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}

/// JSON-decode a frame payload. Plain text and malformed JSON wrap as
/// `{"content": <raw>}` instead of failing.
pub fn decode_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "content": raw }))
}

/// Handle returned by `SseClient::on`, used to deregister the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Value, &Frame) + Send + Sync>;

struct Shared {
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Listener)>>>,
    connected: AtomicBool,
    /// Once-guard for the terminal `done`/`error` event of a connection
    finished: AtomicBool,
}

impl Shared {
    fn emit(&self, event_type: &str, payload: &Value, frame: &Frame) {
        let listeners: Vec<Listener> = {
            let map = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            map.get(event_type)
                .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in listeners {
            listener(payload, frame);
        }
    }

    fn emit_frame(&self, frame: &Frame) {
        let payload = decode_payload(&frame.raw_data);
        self.emit(&frame.event_type, &payload, frame);
    }

    fn finish_done(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        trace!("sse stream ended");
        let frame = Frame {
            event_type: EVENT_DONE.to_string(),
            raw_data: DONE_SENTINEL.to_string(),
            id: None,
            retry: None,
        };
        self.emit(EVENT_DONE, &Value::String(DONE_SENTINEL.to_string()), &frame);
    }

    fn finish_error(&self, message: String) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        debug!(error = %message, "sse stream failed");
        let frame = Frame {
            event_type: EVENT_ERROR.to_string(),
            raw_data: message.clone(),
            id: None,
            retry: None,
        };
        self.emit(EVENT_ERROR, &serde_json::json!({ "error": message }), &frame);
    }
}

/// SSE client over a plain POST request/response transport.
///
/// The native browser-style event source cannot attach a JSON body or an
/// authorization header, so this client issues the request itself and runs
/// the framing parser over the chunked response body.
pub struct SseClient {
    base_url: String,
    auth_token: Option<String>,
    connect_timeout: Duration,
    http: reqwest::Client,
    shared: Arc<Shared>,
    next_listener: AtomicU64,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SseClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token,
            connect_timeout,
            http: reqwest::Client::new(),
            shared: Arc::new(Shared {
                listeners: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
            next_listener: AtomicU64::new(0),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Register a listener for an event type. Listeners run in
    /// registration order on the read-loop task.
    pub fn on<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value, &Frame) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut map = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Deregister a listener. Returns whether it was registered.
    pub fn off(&self, event_type: &str, id: ListenerId) -> bool {
        let mut map = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = map.get_mut(event_type) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            map.remove(event_type);
        }
        removed
    }

    /// Open the stream: POST the endpoint with SSE headers and an optional
    /// JSON body, validate the response, then spawn the read loop. Resolves
    /// as soon as the loop is running; it does not wait for the stream to
    /// finish.
    pub async fn connect(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<(), StreamError> {
        // only one stream per client; drop any previous one first, keeping
        // listeners registered ahead of the connect
        self.teardown(false);
        self.shared.finished.store(false, Ordering::SeqCst);

        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self
            .http
            .post(&url)
            .header("Accept", "text/event-stream")
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache");
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = tokio::time::timeout(self.connect_timeout, request.send())
            .await
            .map_err(|_| StreamError::ConnectTimeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| StreamError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let cancel = CancellationToken::new();
        self.shared.connected.store(true, Ordering::SeqCst);
        *self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        trace!(url = %url, "sse connection opened");
        let shared = self.shared.clone();
        let handle = tokio::spawn(read_loop(response, shared, cancel));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    /// Tear down the connection. Idempotent and safe from any state:
    /// cancels the read loop, aborts the in-flight request, clears all
    /// listeners, and never propagates teardown errors.
    pub fn disconnect(&self) {
        self.teardown(true);
    }

    fn teardown(&self, clear_listeners: bool) {
        self.shared.connected.store(false, Ordering::SeqCst);

        if clear_listeners {
            self.shared
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        if let Some(cancel) = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            // dropping the task drops the response body, which aborts the
            // underlying request
            task.abort();
        }
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn read_loop(response: reqwest::Response, shared: Arc<Shared>, cancel: CancellationToken) {
    use tokio_stream::StreamExt;

    let mut bytes = Box::pin(response.bytes_stream());
    let mut decoder = FrameDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                // cooperative cancellation is a clean end of stream
                shared.finish_done();
                return;
            }
            chunk = bytes.next() => chunk,
        };

        match chunk {
            None => {
                shared.finish_done();
                return;
            }
            Some(Err(e)) => {
                shared.finish_error(e.to_string());
                return;
            }
            Some(Ok(chunk)) => {
                for frame in decoder.feed(&chunk) {
                    shared.emit_frame(&frame);
                }
            }
        }
    }
}
