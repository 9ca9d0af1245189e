use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing/invalid module configuration, or a tool-name collision.
    #[error("Config error: {0}")]
    Config(String),

    /// A module's constructor failed or it declared malformed tools.
    #[error("Load error: {0}")]
    Load(String),

    #[error("Provider error: {0}")]
    Provider(String),

    /// A 5xx-class provider response. Only the gateway's retry loop should
    /// ever see this; it is converted to `Provider` once retries run out.
    #[error("Transient provider error: {0}")]
    ProviderTransient(String),

    #[error("Tool argument error: {0}")]
    ToolArgument(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable tag used in structured failure replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Load(_) => "load_error",
            Error::Provider(_) | Error::ProviderTransient(_) => "provider_error",
            Error::ToolArgument(_) => "tool_argument_error",
            Error::Schedule(_) => "schedule_error",
            Error::Connection(_) => "connection_error",
            Error::Cancelled(_) => "cancelled",
            Error::Io(_) | Error::Json(_) | Error::Yaml(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }

    /// True when the caller may simply try again later; false when the
    /// failure points at configuration that a retry will not fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider(_)
                | Error::ProviderTransient(_)
                | Error::Schedule(_)
                | Error::Connection(_)
                | Error::Cancelled(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
