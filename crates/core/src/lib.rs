pub mod domain;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod time;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_CHART_BASE_URL: &str = "https://query2.finance.yahoo.com";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_MAX_TICKERS_CEILING: usize = 200;

    /// Process-wide configuration, read once at startup and shared read-only.
    #[derive(Debug, Clone)]
    pub struct Settings {
        pub api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub chart_base_url: String,
        pub tabular_base_url: Option<String>,
        pub upstream_timeout_secs: u64,
        pub max_tickers_ceiling: usize,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                api_key: None,
                sentry_dsn: None,
                chart_base_url: DEFAULT_CHART_BASE_URL.to_string(),
                tabular_base_url: None,
                upstream_timeout_secs: DEFAULT_TIMEOUT_SECS,
                max_tickers_ceiling: DEFAULT_MAX_TICKERS_CEILING,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                api_key: non_empty_var("API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                chart_base_url: non_empty_var("CHART_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_CHART_BASE_URL.to_string()),
                tabular_base_url: non_empty_var("TABULAR_BASE_URL"),
                upstream_timeout_secs: parsed_var("UPSTREAM_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
                max_tickers_ceiling: parsed_var("MAX_TICKERS_CEILING")?
                    .unwrap_or(DEFAULT_MAX_TICKERS_CEILING),
            })
        }

        /// `None` means API-key enforcement is off.
        pub fn expected_api_key(&self) -> Option<&str> {
            self.api_key.as_deref()
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parsed_var<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        non_empty_var(key)
            .map(|s| s.parse::<T>().with_context(|| format!("{key} is not valid: {s:?}")))
            .transpose()
    }
}
