use crate::error::ApiError;
use crate::routes;
use axum::routing::{get, post, put};
use axum::Router;
use finverse_core::aggregator::AggregatorClient;
use finverse_core::llm::LlmClient;
use finverse_core::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handles. A `None` service answers 503 on the routes that need it.
#[derive(Clone)]
pub struct AppState {
    pub store: Option<Arc<dyn Store>>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub aggregator: Option<Arc<dyn AggregatorClient>>,
    pub chat_timeout: Duration,
}

impl AppState {
    pub fn store(&self) -> Result<&dyn Store, ApiError> {
        self.store.as_deref().ok_or(ApiError::Unavailable("database"))
    }

    pub fn llm(&self) -> Result<&dyn LlmClient, ApiError> {
        self.llm.as_deref().ok_or(ApiError::Unavailable("text generation"))
    }

    pub fn aggregator(&self) -> Result<&dyn AggregatorClient, ApiError> {
        self.aggregator
            .as_deref()
            .ok_or(ApiError::Unavailable("bank aggregator"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/onboarding",
            get(routes::onboarding::status).post(routes::onboarding::complete),
        )
        .route(
            "/transactions",
            get(routes::transactions::list).post(routes::transactions::add),
        )
        .route(
            "/transactions/categories",
            get(routes::transactions::categories),
        )
        .route(
            "/transactions/:id",
            put(routes::transactions::edit).delete(routes::transactions::delete),
        )
        .route("/dashboard", get(routes::dashboard::overview))
        .route("/dashboard/refresh", post(routes::dashboard::refresh))
        .route("/dashboard/recent", get(routes::dashboard::recent))
        .route("/dashboard/daily", get(routes::dashboard::daily))
        .route("/dashboard/monthly", get(routes::dashboard::monthly))
        .route("/dashboard/categories", get(routes::dashboard::categories))
        .route("/accounts", get(routes::aggregator::accounts))
        .route(
            "/aggregator/link-token",
            post(routes::aggregator::link_token),
        )
        .route("/aggregator/exchange", post(routes::aggregator::exchange))
        .route("/aggregator/sync", post(routes::aggregator::sync_now))
        .route(
            "/reports",
            get(routes::reports::history).post(routes::reports::generate),
        )
        .route(
            "/chat",
            get(routes::chat::history).post(routes::chat::ask),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use finverse_core::aggregator::types::{
        AggregatorTransaction, ItemAccounts, LinkToken, TokenExchange,
    };
    use finverse_core::domain::account::{Account, Balances, Institution};
    use finverse_core::domain::transaction::UserId;
    use finverse_core::llm::CompletionRequest;
    use finverse_core::storage::memory::MemoryStore;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use std::str::FromStr;

    struct CannedLlm;

    #[async_trait::async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<String> {
            Ok("```markdown\n# Spending\nMostly dining.\n```".to_string())
        }
    }

    struct OneBank;

    #[async_trait::async_trait]
    impl AggregatorClient for OneBank {
        fn provider_name(&self) -> &'static str {
            "one-bank"
        }

        async fn create_link_token(&self, user: &UserId) -> anyhow::Result<LinkToken> {
            Ok(LinkToken {
                link_token: format!("link-{user}"),
                expiration: None,
            })
        }

        async fn exchange_public_token(&self, _public_token: &str) -> anyhow::Result<TokenExchange> {
            Ok(TokenExchange {
                access_token: "access-1".into(),
                item_id: "item-1".into(),
            })
        }

        async fn fetch_accounts(&self, _access_token: &str) -> anyhow::Result<ItemAccounts> {
            Ok(ItemAccounts {
                item_id: "item-1".into(),
                institution: Some(Institution {
                    institution_id: "ins_1".into(),
                    name: "First Bank".into(),
                }),
                accounts: vec![Account {
                    account_id: "acc-1".into(),
                    name: "Checking".into(),
                    mask: None,
                    kind: Some("depository".into()),
                    subtype: None,
                    balances: Balances {
                        available: Some(Decimal::new(1234, 1)),
                        current: None,
                        limit: None,
                    },
                }],
            })
        }

        async fn fetch_settled_transactions(
            &self,
            _access_token: &str,
            _start: chrono::NaiveDate,
            _end: chrono::NaiveDate,
        ) -> anyhow::Result<Vec<AggregatorTransaction>> {
            Ok(vec![serde_json::from_value(json!({
                "transaction_id": "bank-1",
                "amount": 30,
                "date": "2024-03-02",
                "category": ["Groceries"]
            }))?])
        }

        async fn fetch_pending_transactions(
            &self,
            _access_token: &str,
        ) -> anyhow::Result<Vec<AggregatorTransaction>> {
            Ok(Vec::new())
        }
    }

    fn server_with(state: AppState) -> TestServer {
        TestServer::new(router(state)).expect("Could not create test server.")
    }

    fn full_server() -> TestServer {
        server_with(AppState {
            store: Some(Arc::new(MemoryStore::new())),
            llm: Some(Arc::new(CannedLlm)),
            aggregator: Some(Arc::new(OneBank)),
            chat_timeout: Duration::from_secs(5),
        })
    }

    fn caller() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("user_1"),
        )
    }

    fn dec(v: &Value) -> Decimal {
        Decimal::from_str(v.as_str().expect("decimal as string")).unwrap()
    }

    async fn onboard(server: &TestServer) {
        let (name, value) = caller();
        server
            .post("/onboarding")
            .add_header(name, value)
            .json(&json!({ "method": "manual" }))
            .await
            .assert_status_ok();
    }

    async fn add(server: &TestServer, body: Value) -> Value {
        let (name, value) = caller();
        let response = server
            .post("/transactions")
            .add_header(name, value)
            .json(&body)
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()
    }

    #[tokio::test]
    async fn healthz_needs_no_identity() {
        let server = full_server();
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("ok");
    }

    #[tokio::test]
    async fn requests_without_identity_are_rejected() {
        let server = full_server();
        let response = server.get("/transactions").await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn onboarding_starts_out_incomplete() {
        let server = full_server();
        let (name, value) = caller();
        let status = server
            .get("/onboarding")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(status["complete"], false);

        onboard(&server).await;

        let (name, value) = caller();
        let status = server
            .get("/onboarding")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(status["complete"], true);
        assert_eq!(status["method"], "manual");
    }

    #[tokio::test]
    async fn unknown_onboarding_methods_are_invalid() {
        let server = full_server();
        let (name, value) = caller();
        let response = server
            .post("/onboarding")
            .add_header(name, value)
            .json(&json!({ "method": "carrier-pigeon" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "validation_failed");
    }

    #[tokio::test]
    async fn adding_a_transaction_returns_the_rebuilt_snapshot() {
        let server = full_server();
        onboard(&server).await;

        add(
            &server,
            json!({ "amount": 1000, "date": "2024-01-05", "name": "Payroll", "category": "Salary", "isIncome": true }),
        )
        .await;
        let body = add(
            &server,
            json!({ "amount": "45.20", "date": "2024-01-06", "name": "Diner", "category": ["Dining"] }),
        )
        .await;

        assert_eq!(dec(&body["snapshot"]["total_income"]), Decimal::new(1000, 0));
        assert_eq!(dec(&body["snapshot"]["total_expenses"]), Decimal::new(4520, 2));
        assert!(body["transaction"]["transaction_id"]
            .as_str()
            .unwrap()
            .starts_with("manual-"));

        let (name, value) = caller();
        let list = server
            .get("/transactions")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(list["count"], 2);
        assert_eq!(list["transactions"][0]["type"], "Expense");
        assert_eq!(list["transactions"][1]["type"], "Income");
    }

    #[tokio::test]
    async fn missing_fields_are_a_validation_error() {
        let server = full_server();
        onboard(&server).await;

        let (name, value) = caller();
        let response = server
            .post("/transactions")
            .add_header(name, value)
            .json(&json!({ "date": "2024-01-06" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "validation_failed");
    }

    #[tokio::test]
    async fn amounts_beyond_the_ledger_limit_are_a_validation_error() {
        let server = full_server();
        onboard(&server).await;

        for amount in [json!("1000000000000"), json!("50000000000000000000000000000")] {
            let (name, value) = caller();
            let response = server
                .post("/transactions")
                .add_header(name, value)
                .json(&json!({ "amount": amount, "date": "2024-01-06", "name": "Typo" }))
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
            assert_eq!(response.json::<Value>()["error"], "validation_failed");
        }

        let (name, value) = caller();
        let list = server
            .get("/transactions")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(list["count"], 0);
    }

    #[tokio::test]
    async fn edit_and_delete_keep_the_snapshot_current() {
        let server = full_server();
        onboard(&server).await;
        let added = add(
            &server,
            json!({ "amount": 20, "date": "2024-01-06", "name": "Cafe", "category": "Dining" }),
        )
        .await;
        let id = added["transaction"]["transaction_id"].as_str().unwrap().to_string();

        let (name, value) = caller();
        let edited = server
            .put(&format!("/transactions/{id}"))
            .add_header(name, value)
            .json(&json!({ "amount": 25, "date": "2024-01-06", "name": "Cafe", "type": "Expense", "category": "Coffee" }))
            .await;
        edited.assert_status_ok();
        let edited = edited.json::<Value>();
        assert_eq!(dec(&edited["snapshot"]["total_expenses"]), Decimal::new(25, 0));
        assert!(edited["snapshot"]["expenses_by_category"]["Coffee"].is_string());

        let (name, value) = caller();
        let deleted = server
            .delete(&format!("/transactions/{id}"))
            .add_header(name, value)
            .await;
        deleted.assert_status_ok();
        let deleted = deleted.json::<Value>();
        assert_eq!(deleted["deleted"], id.as_str());
        assert_eq!(deleted["snapshot"]["transaction_count"], 0);

        let (name, value) = caller();
        server
            .delete(&format!("/transactions/{id}"))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_views_follow_the_snapshot() {
        let server = full_server();
        onboard(&server).await;
        add(
            &server,
            json!({ "amount": 500, "date": "2024-02-01", "name": "Payroll", "category": "Salary", "isIncome": true }),
        )
        .await;
        add(
            &server,
            json!({ "amount": 80, "date": "2024-02-03", "name": "Market", "category": "FOOD_AND_DRINK" }),
        )
        .await;

        let (name, value) = caller();
        let monthly = server
            .get("/dashboard/monthly")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(monthly[0]["month"], "Feb 2024");

        let (name, value) = caller();
        let categories = server
            .get("/dashboard/categories")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(categories[0]["name"], "Food And Drink");

        let (name, value) = caller();
        let recent = server
            .get("/dashboard/recent")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(recent[0]["amount"], "-$80.00");
        assert_eq!(recent[1]["amount"], "+$500.00");
    }

    #[tokio::test]
    async fn linking_a_bank_imports_and_exposes_accounts() {
        let server = full_server();

        let (name, value) = caller();
        let token = server
            .post("/aggregator/link-token")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(token["link_token"], "link-user_1");

        let (name, value) = caller();
        let linked = server
            .post("/aggregator/exchange")
            .add_header(name, value)
            .json(&json!({ "public_token": "public-sandbox" }))
            .await;
        linked.assert_status_ok();
        let linked = linked.json::<Value>();
        assert_eq!(linked["onboarding"]["method"], "aggregator");
        assert_eq!(linked["imported"], 1);
        assert!(linked["item"].get("access_token").is_none());

        let (name, value) = caller();
        let accounts = server
            .get("/accounts")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(accounts["institution"]["name"], "First Bank");

        let (name, value) = caller();
        let overview = server
            .get("/dashboard")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(dec(&overview["balance"]), Decimal::new(1234, 1));
        assert_eq!(dec(&overview["snapshot"]["total_expenses"]), Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn reports_with_no_matching_data_say_so() {
        let server = full_server();
        onboard(&server).await;

        let (name, value) = caller();
        let response = server
            .post("/reports")
            .add_header(name, value)
            .json(&json!({ "timeRange": "All Time", "categories": ["Travel"] }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "no_data");
        assert!(body["message"].as_str().unwrap().contains("Travel"));
    }

    #[tokio::test]
    async fn generated_reports_are_kept() {
        let server = full_server();
        onboard(&server).await;
        add(
            &server,
            json!({ "amount": 45, "date": "2024-01-06", "name": "Diner", "category": "Dining" }),
        )
        .await;

        let (name, value) = caller();
        let generated = server
            .post("/reports")
            .add_header(name, value)
            .json(&json!({ "timeRange": "All Time" }))
            .await;
        generated.assert_status_ok();
        assert_eq!(
            generated.json::<Value>()["report"],
            "# Spending\nMostly dining."
        );

        let (name, value) = caller();
        let history = server
            .get("/reports")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(history["reports"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_turns_are_logged_by_id() {
        let server = full_server();
        onboard(&server).await;

        let (name, value) = caller();
        let reply = server
            .post("/chat")
            .add_header(name, value)
            .json(&json!({ "messages": [{ "role": "user", "content": "How am I doing?" }] }))
            .await;
        reply.assert_status_ok();
        let reply = reply.json::<Value>();

        let (name, value) = caller();
        let history = server
            .get("/chat")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(history["turns"][0]["id"], reply["turn_id"]);
        assert_eq!(history["turns"][0]["question"], "How am I doing?");
    }

    #[tokio::test]
    async fn missing_services_answer_unavailable() {
        let server = server_with(AppState {
            store: None,
            llm: None,
            aggregator: None,
            chat_timeout: Duration::from_secs(5),
        });

        let (name, value) = caller();
        let response = server.get("/transactions").add_header(name, value).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.json::<Value>()["message"],
            "database is not available"
        );

        let (name, value) = caller();
        server
            .post("/aggregator/link-token")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }
}
