//! Streaming chat client for agent servers.
//!
//! The heart of the crate is the streaming message-assembly pipeline: an
//! SSE framing parser over a plain POST transport ([`stream`]), and a
//! fragment reducer that reassembles the decoded fragment sequence into
//! display-ready conversational turns ([`reducer`]). The [`api`] layer
//! builds the REST requests that feed it and [`session`] orchestrates the
//! whole flow for one chat view.

pub mod api;
pub mod cli;
pub mod core;
pub mod reducer;
pub mod session;
pub mod stream;
