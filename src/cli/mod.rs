use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiClient, ChatApi};
use crate::core::config::AppConfig;
use crate::core::fragment::{FragmentBody, Role};
use crate::core::turn::{Block, Turn};
use crate::session::{ChatSession, SessionEvent};

#[derive(Parser, Debug)]
#[command(
    name = "heron-chat",
    version,
    about = "Streaming chat client for agent servers"
)]
struct Cli {
    /// Agent to talk to
    #[arg(long, env = "HERON_AGENT_ID")]
    agent: Option<String>,

    /// Backend base URL
    #[arg(long, env = "HERON_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, env = "HERON_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print recent history instead of sending a prompt
    #[arg(long)]
    history: bool,

    /// Wait for the complete response instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Prompt to send
    prompt: Option<String>,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    if let Some(token) = cli.token {
        config.api_token = Some(token);
    }
    if let Some(agent) = cli.agent {
        config.agent_id = Some(agent);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.debug { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(agent_id) = config.agent_id.clone() else {
        bail!("no agent selected; pass --agent or set HERON_AGENT_ID");
    };

    let client = ApiClient::new(config.base_url.clone(), config.api_token.clone());
    let api = Arc::new(ChatApi::new(client));
    let session = ChatSession::new(api, config, agent_id);

    if cli.history {
        session.load_history().await?;
        render_turns(&session.turns());
        return Ok(());
    }

    let Some(prompt) = cli.prompt else {
        bail!("prompt required (or pass --history)");
    };

    if cli.no_stream {
        session.send_message(&prompt).await?;
        render_turns(&session.turns());
        return Ok(());
    }

    stream_once(&session, &prompt).await
}

/// Stream one reply, printing content deltas as they arrive.
async fn stream_once(session: &ChatSession, prompt: &str) -> Result<()> {
    let (mut rx, _handle) = session.stream_reply(prompt).await?;

    let mut printed = String::new();
    let mut seen_tool_calls = 0;

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::TurnUpdated(acc) => {
                for tc in acc.tool_calls.iter().skip(seen_tool_calls) {
                    if let FragmentBody::ToolCall { call: Some(call) } = &tc.call.body {
                        eprintln!("[tool] {}", call.name);
                    }
                }
                seen_tool_calls = acc.tool_calls.len();

                if acc.content.starts_with(&printed) {
                    print!("{}", &acc.content[printed.len()..]);
                } else {
                    // full-message resend replaced the content; restart
                    println!();
                    print!("{}", acc.content);
                }
                std::io::stdout().flush()?;
                printed = acc.content.clone();
            }
            SessionEvent::UserConfirmed { .. } => {}
            SessionEvent::Completed(_) => {
                println!();
                return Ok(());
            }
            SessionEvent::Failed { message } => {
                println!();
                bail!("streaming error: {message}");
            }
        }
    }

    println!();
    Ok(())
}

fn render_turns(turns: &[Turn]) {
    for turn in turns {
        match turn {
            Turn::Single(fragment) => {
                let label = match fragment.role() {
                    Role::User => "you",
                    Role::System => "system",
                    _ => "message",
                };
                println!("{label}> {}", fragment.content);
            }
            Turn::Grouped(group) => {
                for block in &group.blocks {
                    match block {
                        Block::Reasoning { data } => {
                            if let FragmentBody::Reasoning { reasoning } = &data.body {
                                println!("  [thinking] {reasoning}");
                            }
                        }
                        Block::ToolCall { data, result } => {
                            if let FragmentBody::ToolCall { call: Some(call) } = &data.body {
                                println!("  [tool] {}({})", call.name, call.arguments);
                            }
                            if let Some(result) = result {
                                if let FragmentBody::ToolReturn { ret } = &result.body {
                                    println!("    -> {}", ret.value);
                                }
                            }
                        }
                        Block::Assistant { data } => {
                            println!("agent> {}", data.content);
                        }
                    }
                }
            }
        }
        println!();
    }
}
