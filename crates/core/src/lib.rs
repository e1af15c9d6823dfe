pub mod aggregation;
pub mod aggregator;
pub mod chat;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod report;
pub mod storage;
pub mod sync;
pub mod time;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 30;

    /// Text-generation tuning, all optional in the environment.
    #[derive(Debug, Clone)]
    pub struct LlmSettings {
        pub base_url: String,
        pub model: String,
        pub max_tokens: u32,
        pub timeout: Duration,
    }

    impl LlmSettings {
        fn from_env() -> Self {
            Self {
                base_url: non_empty_var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                model: non_empty_var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|| "claude-3-5-sonnet-latest".to_string()),
                max_tokens: parsed_var("ANTHROPIC_MAX_TOKENS").unwrap_or(2048),
                timeout: Duration::from_secs(parsed_var("ANTHROPIC_TIMEOUT_SECS").unwrap_or(60)),
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub plaid_client_id: Option<String>,
        pub plaid_secret: Option<String>,
        pub plaid_env: Option<String>,
        pub plaid_base_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub chat_timeout: Duration,
        pub llm: LlmSettings,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let chat_timeout_secs = match std::env::var("CHAT_TIMEOUT_SECS") {
                Ok(s) => s
                    .parse::<u64>()
                    .with_context(|| format!("CHAT_TIMEOUT_SECS is not a number: {s}"))?,
                Err(_) => DEFAULT_CHAT_TIMEOUT_SECS,
            };

            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                plaid_client_id: non_empty_var("PLAID_CLIENT_ID"),
                plaid_secret: non_empty_var("PLAID_SECRET"),
                plaid_env: non_empty_var("PLAID_ENV"),
                plaid_base_url: non_empty_var("PLAID_BASE_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                chat_timeout: Duration::from_secs(chat_timeout_secs),
                llm: LlmSettings::from_env(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_plaid_credentials(&self) -> anyhow::Result<(&str, &str)> {
            let client_id = self
                .plaid_client_id
                .as_deref()
                .context("PLAID_CLIENT_ID is required")?;
            let secret = self
                .plaid_secret
                .as_deref()
                .context("PLAID_SECRET is required")?;
            Ok((client_id, secret))
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
        non_empty_var(key).and_then(|v| v.trim().parse().ok())
    }
}
