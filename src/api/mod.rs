pub mod chat;
pub mod client;

pub use chat::{ChatApi, ChatBackend, MessageQuery, SendOptions, StreamRequest};
pub use client::ApiClient;

#[cfg(test)]
mod tests;
