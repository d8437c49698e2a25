use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdoError {
    #[error("Azure DevOps request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Azure DevOps returned HTTP {status} for {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("unexpected response shape while reading {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("access token was rejected for '{0}'")]
    Unauthorized(String),
}

impl AdoError {
    pub fn decode(context: &'static str, source: serde_json::Error) -> Self {
        AdoError::Decode { context, source }
    }

    /// Whether the failure is a 404 from the platform, used by callers that
    /// treat a missing resource as an empty result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdoError::Api { status: 404, .. } | AdoError::NotFound(_))
    }
}
