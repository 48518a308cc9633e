use thiserror::Error;

/// Per-ticker upstream failure. Never request-fatal on its own; the pipeline decides.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("upstream HTTP {status}")]
    UpstreamHttp { status: u16 },

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Missing columns: {names:?}")]
    MissingColumns { names: Vec<String> },

    #[error("No data returned")]
    EmptyResult,

    #[error("upstream fetch failed after retries: {last_error}")]
    UpstreamFetchFailed { last_error: Box<FetchError> },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("tabular source failed ({tabular}); chart source failed ({chart})")]
    AllSourcesFailed {
        tabular: Box<FetchError>,
        chart: Box<FetchError>,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::UpstreamHttp {
                status: status.as_u16(),
            },
            None => FetchError::Transport(err.to_string()),
        }
    }
}
