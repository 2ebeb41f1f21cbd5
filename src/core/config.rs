use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::ConfigError;

const DEFAULT_BASE_URL: &str = "http://localhost:8283";

/// Query options applied to streaming sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Maximum agent steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Ask the server to emit reasoning fragments
    #[serde(default = "default_true")]
    pub enable_thinking: bool,

    /// Token-level deltas instead of whole fragments
    #[serde(default = "default_true")]
    pub stream_tokens: bool,

    /// Keep-alive ping frames
    #[serde(default)]
    pub include_pings: bool,

    /// Run the request in the background on the server
    #[serde(default)]
    pub background: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            enable_thinking: true,
            stream_tokens: true,
            include_pings: false,
            background: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the agent backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the backend (HERON_API_TOKEN overrides)
    #[serde(default)]
    pub api_token: Option<String>,

    /// Default agent to talk to
    #[serde(default)]
    pub agent_id: Option<String>,

    /// Timeout until response headers arrive; the open stream itself is not timed out
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// History page size
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub stream: StreamOptions,

    #[serde(default)]
    pub debug: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_page_size() -> u32 {
    50
}

fn default_max_steps() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            agent_id: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            page_size: default_page_size(),
            stream: StreamOptions::default(),
            debug: false,
        }
    }
}

impl AppConfig {
    /// Load from the config file if present, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::File(format!("{}: {e}", path.display())))?;
                serde_json::from_str(&contents)
                    .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// HERON_CONFIG overrides the default location under the user config dir.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("HERON_CONFIG") {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::config_dir().map(|d| d.join("heron-chat").join("config.json"))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("HERON_BASE_URL") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("HERON_API_TOKEN") {
            if !token.is_empty() {
                self.api_token = Some(token);
            }
        }
        if let Ok(agent) = std::env::var("HERON_AGENT_ID") {
            if !agent.is_empty() {
                self.agent_id = Some(agent);
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn has_token(&self) -> bool {
        self.api_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}
