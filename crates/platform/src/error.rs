use thiserror::Error;

use taskbridge_core::classify::{ErrorDomain, RawFailure};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("request to {endpoint} failed: {source}")]
    Transport { endpoint: String, source: reqwest::Error },
    #[error("{endpoint} returned status {status}: {message}")]
    Status { endpoint: String, status: u16, message: String },
    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("circuit open for the Platform API")]
    CircuitOpen,
}

impl PlatformError {
    /// Shapes the error for the classifier. Transport errors carry no code
    /// and key off their message phrases; status errors carry the HTTP code.
    pub fn to_raw_failure(&self) -> RawFailure {
        match self {
            Self::Transport { source, .. } => {
                let name = if source.is_timeout() { "TimeoutError" } else { "NetworkError" };
                let message = if source.is_timeout() {
                    "request timeout".to_owned()
                } else if source.is_connect() {
                    "connect ECONNREFUSED".to_owned()
                } else {
                    source.to_string()
                };
                RawFailure::new(ErrorDomain::Api, None, name, &message)
            }
            Self::Status { status, message, .. } => {
                RawFailure::new(ErrorDomain::Api, Some(u32::from(*status)), "HttpError", message)
            }
            Self::Decode { message, .. } => {
                RawFailure::new(ErrorDomain::Api, None, "DecodeError", message)
            }
            Self::CircuitOpen => RawFailure::new(
                ErrorDomain::Api,
                None,
                "CircuitOpen",
                "requests suppressed while the Platform circuit is open",
            ),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
