/// Result alias that carries the custom [`JumpBeatError`] type.
pub type Result<T> = std::result::Result<T, JumpBeatError>;

/// Common error type for the core crate.
///
/// None of these are fatal to the engine. The actor logs them and keeps the
/// state it already had until the next scheduler tick.
#[derive(Debug, thiserror::Error)]
pub enum JumpBeatError {
    /// Free-form failure message.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Connection error, timeout or any other transport level failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with something other than `200 OK`.
    #[error("server answered with status {0}")]
    Status(u16),
    /// The response body was not a valid server update.
    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A track or cover path that does not resolve to a usable URI.
    #[error("invalid resource `{0}`")]
    InvalidResource(String),
    /// A configuration value was rejected while loading or validating.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The engine actor is gone; its handle can no longer deliver messages.
    #[error("engine has stopped")]
    EngineStopped,
}

impl JumpBeatError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a configuration error with the given description.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for JumpBeatError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for JumpBeatError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
