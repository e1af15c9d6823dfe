use crate::aggregator::types::{
    AggregatorTransaction, ItemAccounts, LinkToken, TokenExchange,
};
use crate::aggregator::AggregatorClient;
use crate::config::Settings;
use crate::domain::account::{Account, Institution};
use crate::domain::transaction::UserId;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PAGE_SIZE: usize = 500;
const CLIENT_NAME: &str = "Finverse";
const COUNTRY_CODES: [&str; 1] = ["US"];

fn base_url_for_env(env: &str) -> Result<&'static str> {
    match env.trim().to_lowercase().as_str() {
        "sandbox" => Ok("https://sandbox.plaid.com"),
        "development" => Ok("https://development.plaid.com"),
        "production" => Ok("https://production.plaid.com"),
        other => anyhow::bail!("unknown PLAID_ENV: {other}"),
    }
}

#[derive(Debug, Clone)]
pub struct PlaidClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
}

impl PlaidClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (client_id, secret) = settings.require_plaid_credentials()?;

        let base_url = match settings.plaid_base_url.as_deref() {
            Some(url) => url.to_string(),
            None => base_url_for_env(settings.plaid_env.as_deref().unwrap_or("sandbox"))?
                .to_string(),
        };

        let timeout_secs = std::env::var("PLAID_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build Plaid http client")?;

        Ok(Self {
            http,
            base_url,
            client_id: client_id.to_string(),
            secret: secret.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// POSTs `body` with the client credentials merged in and decodes the
    /// reply. Error bodies are reduced to Plaid's error code and message.
    async fn post<T: DeserializeOwned>(&self, path: &str, mut body: Value) -> Result<T> {
        if let Value::Object(map) = &mut body {
            map.insert("client_id".into(), Value::String(self.client_id.clone()));
            map.insert("secret".into(), Value::String(self.secret.clone()));
        }

        let res = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Plaid request failed (path={path})"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read Plaid response (path={path})"))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<PlaidError>(&text)
                .map(|e| format!("{}: {}", e.error_code, e.error_message))
                .unwrap_or_else(|_| text.clone());
            anyhow::bail!("Plaid HTTP {status} (path={path}): {detail}");
        }

        serde_json::from_str::<T>(&text)
            .with_context(|| format!("failed to decode Plaid response (path={path})"))
    }

    async fn fetch_institution(&self, institution_id: &str) -> Result<Institution> {
        let res: InstitutionResponse = self
            .post(
                "/institutions/get_by_id",
                json!({
                    "institution_id": institution_id,
                    "country_codes": COUNTRY_CODES,
                }),
            )
            .await?;
        Ok(res.institution)
    }
}

#[async_trait::async_trait]
impl AggregatorClient for PlaidClient {
    fn provider_name(&self) -> &'static str {
        "plaid"
    }

    async fn create_link_token(&self, user: &UserId) -> Result<LinkToken> {
        self.post(
            "/link/token/create",
            json!({
                "client_name": CLIENT_NAME,
                "user": { "client_user_id": user.as_str() },
                "products": ["transactions"],
                "country_codes": COUNTRY_CODES,
                "language": "en",
            }),
        )
        .await
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange> {
        self.post(
            "/item/public_token/exchange",
            json!({ "public_token": public_token }),
        )
        .await
    }

    async fn fetch_accounts(&self, access_token: &str) -> Result<ItemAccounts> {
        let res: BalanceResponse = self
            .post(
                "/accounts/balance/get",
                json!({ "access_token": access_token }),
            )
            .await?;

        // A missing institution is not fatal; the link still works without a name.
        let institution = match res.item.institution_id.as_deref() {
            Some(id) => match self.fetch_institution(id).await {
                Ok(inst) => Some(inst),
                Err(err) => {
                    tracing::warn!(institution_id = %id, error = %err, "institution lookup failed");
                    None
                }
            },
            None => None,
        };

        Ok(ItemAccounts {
            item_id: res.item.item_id,
            institution,
            accounts: res.accounts,
        })
    }

    async fn fetch_settled_transactions(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AggregatorTransaction>> {
        let mut out: Vec<AggregatorTransaction> = Vec::new();
        loop {
            let page: TransactionsPage = self
                .post(
                    "/transactions/get",
                    json!({
                        "access_token": access_token,
                        "start_date": start.to_string(),
                        "end_date": end.to_string(),
                        "options": { "count": PAGE_SIZE, "offset": out.len() },
                    }),
                )
                .await?;

            let received = page.transactions.len();
            out.extend(page.transactions);
            tracing::debug!(
                fetched = out.len(),
                total = page.total_transactions,
                "Plaid transactions page"
            );

            if received == 0 || out.len() >= page.total_transactions {
                break;
            }
        }
        Ok(out)
    }

    async fn fetch_pending_transactions(
        &self,
        access_token: &str,
    ) -> Result<Vec<AggregatorTransaction>> {
        let mut out: Vec<AggregatorTransaction> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "access_token": access_token });
            if let Some(c) = &cursor {
                body["cursor"] = Value::String(c.clone());
            }
            let page: SyncPage = self.post("/transactions/sync", body).await?;

            out.extend(
                page.added
                    .into_iter()
                    .chain(page.modified)
                    .filter(|t| t.pending.unwrap_or(false)),
            );

            if !page.has_more {
                break;
            }
            cursor = Some(page.next_cursor);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct PlaidError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    accounts: Vec<Account>,
    item: ItemInfo,
}

#[derive(Debug, Deserialize)]
struct ItemInfo {
    item_id: String,
    #[serde(default)]
    institution_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstitutionResponse {
    institution: Institution,
}

#[derive(Debug, Deserialize)]
struct TransactionsPage {
    #[serde(default)]
    transactions: Vec<AggregatorTransaction>,
    #[serde(default)]
    total_transactions: usize,
}

#[derive(Debug, Deserialize)]
struct SyncPage {
    #[serde(default)]
    added: Vec<AggregatorTransaction>,
    #[serde(default)]
    modified: Vec<AggregatorTransaction>,
    #[serde(default)]
    next_cursor: String,
    #[serde(default)]
    has_more: bool,
}
