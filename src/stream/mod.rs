pub mod sse;

pub use sse::{
    decode_payload, Frame, FrameDecoder, ListenerId, SseClient, DONE_SENTINEL, EVENT_DONE,
    EVENT_ERROR, EVENT_MESSAGE,
};

#[cfg(test)]
mod tests;
