use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Webex API {method} {path} failed: HTTP {status}: {message}")]
    Api {
        method: String,
        path: String,
        status: u16,
        message: String,
        tracking_id: Option<String>,
    },
    #[error("Webex API {path} still rate limited after {retries} retries")]
    RateLimited { path: String, retries: u32 },
    #[error("invalid Webex API base URL {url:?}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("malformed webhook payload: {0}")]
    Payload(String),
}

impl ChannelError {
    /// HTTP status of an API failure
    pub fn status(&self) -> Option<u16> {
        match self {
            ChannelError::Api { status, .. } => Some(*status),
            ChannelError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}
