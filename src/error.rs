use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({platform}): {message}")]
    Api {
        platform: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{var} is not set. {hint}")]
    MissingCredential { var: &'static str, hint: String },

    #[error("Rate limited by {platform}")]
    RateLimit {
        platform: String,
        retry_after_secs: Option<u64>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    pub fn api(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            platform: platform.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn api_with_status(
        platform: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::Api {
            platform: platform.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_credential(var: &'static str, hint: impl Into<String>) -> Self {
        Self::MissingCredential {
            var,
            hint: hint.into(),
        }
    }

    /// Worth another attempt: transport failures, rate limits, server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimit { .. } => true,
            Self::Api {
                status_code: Some(code),
                ..
            } => *code >= 500,
            _ => false,
        }
    }

    /// The endpoint rejected a request parameter (e.g. an unsupported
    /// `response_format`). Auth failures and rate limits don't count.
    pub fn is_unsupported_request(&self) -> bool {
        match self {
            Self::Api {
                status_code: Some(code),
                ..
            } => (400..500).contains(code) && !matches!(code, 401 | 403 | 408 | 429),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(Error::api_with_status("openrouter.ai", "boom", 502).is_transient());
        assert!(Error::http("connection reset").is_transient());
        assert!(!Error::api_with_status("openrouter.ai", "bad", 400).is_transient());
    }

    #[test]
    fn auth_failures_are_not_unsupported_requests() {
        assert!(Error::api_with_status("x", "no json_schema", 400).is_unsupported_request());
        assert!(Error::api_with_status("x", "unprocessable", 422).is_unsupported_request());
        assert!(!Error::api_with_status("x", "bad key", 401).is_unsupported_request());
        assert!(!Error::api_with_status("x", "slow down", 429).is_unsupported_request());
        assert!(!Error::api("x", "no status").is_unsupported_request());
    }

    #[test]
    fn missing_credential_message_names_variable() {
        let err = Error::missing_credential("OPENROUTER_API_KEY", "Export it.");
        assert_eq!(err.to_string(), "OPENROUTER_API_KEY is not set. Export it.");
    }
}
