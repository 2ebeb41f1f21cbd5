use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatClientError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing authentication token")]
    MissingToken,

    #[error("No agent selected")]
    MissingAgent,

    #[error("Message content is required")]
    EmptyMessage,

    #[error("A stream is already in progress")]
    StreamInProgress,
}

#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Response carried no readable body")]
    MissingBody,

    #[error("Connection timed out after {0}ms")]
    ConnectTimeout(u64),
}

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
