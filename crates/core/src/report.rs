//! Natural-language spending summaries over a filtered slice of a user's
//! transactions.

use crate::domain::account::Account;
use crate::domain::chat::{ChatMessage, Role};
use crate::domain::report::Report;
use crate::domain::transaction::{Provenance, Transaction, UserId};
use crate::error::FinanceError;
use crate::llm::text::strip_markdown_fence;
use crate::llm::{CompletionRequest, LlmClient};
use crate::storage::Store;
use crate::time::window::{today_utc, TimeRange};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReportRequest {
    #[serde(default, alias = "timeRange")]
    pub time_range: TimeRange,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A transaction as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportLine {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category: String,
    pub notes: String,
    pub is_manual: bool,
}

impl From<&Transaction> for ReportLine {
    fn from(t: &Transaction) -> Self {
        Self {
            date: t.date,
            amount: t.amount,
            category: t.canonical_category().to_string(),
            notes: t.notes.clone(),
            is_manual: t.source == Provenance::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountLine {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub current_balance: Decimal,
}

impl From<&Account> for AccountLine {
    fn from(a: &Account) -> Self {
        Self {
            name: if a.name.trim().is_empty() {
                "Unknown Account".to_string()
            } else {
                a.name.clone()
            },
            kind: a.kind.clone().unwrap_or_else(|| "Unknown Type".to_string()),
            current_balance: a.balances.current.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportData {
    pub transactions: Vec<ReportLine>,
    pub accounts: Vec<AccountLine>,
    pub time_range: TimeRange,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedReport {
    #[serde(flatten)]
    pub report: Report,
    pub data: ReportData,
}

/// Transactions inside the preset's window whose labels meet the category
/// filter. An empty filter keeps every category.
pub fn filter_transactions<'a>(
    transactions: &'a [Transaction],
    request: &ReportRequest,
    today: NaiveDate,
) -> Vec<&'a Transaction> {
    let window = request.time_range.window(today);
    transactions
        .iter()
        .filter(|t| window.contains(t.date))
        .filter(|t| t.matches_any_category(&request.categories))
        .collect()
}

fn category_focus(requested: &[String], lines: &[ReportLine]) -> String {
    let present: BTreeSet<&str> = lines.iter().map(|l| l.category.as_str()).collect();

    if requested.is_empty() {
        let listed: Vec<&str> = present.into_iter().collect();
        return format!(
            "The user has not filtered by any specific categories. Transactions are present in these categories: {}.",
            listed.join(", ")
        );
    }

    let selected: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|c| present.contains(c))
        .collect();
    if selected.is_empty() {
        "Although the user selected specific categories, provide a general overview of the transactions below."
            .to_string()
    } else {
        format!(
            "Focus specifically on these categories that the user selected and that have transaction data: {}.",
            selected.join(", ")
        )
    }
}

const SYSTEM_PROMPT: &str = "You are a personal finance assistant that writes accurate, friendly financial summaries in Markdown.";

fn report_prompt(data: &ReportData) -> anyhow::Result<String> {
    let transactions =
        serde_json::to_string(&data.transactions).context("serialize report transactions failed")?;
    let accounts =
        serde_json::to_string(&data.accounts).context("serialize report accounts failed")?;
    let range = data.time_range;

    Ok([
        format!("Write a Financial Summary for the {range} time range."),
        category_focus(&data.categories, &data.transactions),
        String::new(),
        "Include:".to_string(),
        "1. Overall overview: total spent vs. total income, the net difference, notable patterns and outliers.".to_string(),
        format!("2. Time range analysis: trends suited to a {range} report."),
        "3. Category breakdown: spending per category, highlighting the top one or two.".to_string(),
        "4. Custom insights tailored to this user.".to_string(),
        String::new(),
        "Rules:".to_string(),
        "- Negative amounts are income, positive amounts are expenses.".to_string(),
        "- The data is below; do not ask for more and do not output a template.".to_string(),
        "- If the data is limited, work with what there is without apologising.".to_string(),
        "- Use Markdown headers, bullet points and emphasis.".to_string(),
        String::new(),
        format!("transactions: {transactions}"),
        format!("accounts: {accounts}"),
    ]
    .join("\n"))
}

pub async fn generate_report(
    store: &dyn Store,
    llm: &dyn LlmClient,
    user: &UserId,
    request: ReportRequest,
    now: DateTime<Utc>,
) -> Result<GeneratedReport, FinanceError> {
    let transactions = store.transactions(user).await?;
    let selected = filter_transactions(&transactions, &request, today_utc(now));
    if selected.is_empty() {
        return Err(FinanceError::NoData {
            time_range: request.time_range,
            categories: request.categories,
        });
    }

    let accounts: Vec<AccountLine> = store
        .linked_item(user)
        .await?
        .map(|item| item.accounts.iter().map(AccountLine::from).collect())
        .unwrap_or_default();

    let data = ReportData {
        transactions: selected.into_iter().map(ReportLine::from).collect(),
        accounts,
        time_range: request.time_range,
        categories: request.categories,
    };

    let prompt = report_prompt(&data)?;
    let text = llm
        .complete(CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: prompt,
            }],
            max_tokens: None,
        })
        .await?;

    let report = Report {
        id: Uuid::new_v4(),
        report: strip_markdown_fence(&text),
        time_range: data.time_range,
        categories: data.categories.clone(),
        generated_at: now,
        transaction_count: data.transactions.len(),
    };

    // The caller still gets the report when it could not be kept.
    if let Err(err) = store.append_report(user, &report).await {
        tracing::warn!(user_id = %user, report_id = %report.id, error = %err, "failed to store report");
    } else {
        tracing::info!(
            user_id = %user,
            report_id = %report.id,
            transactions = report.transaction_count,
            "report generated"
        );
    }

    Ok(GeneratedReport { report, data })
}

/// Newest first.
pub async fn report_history(store: &dyn Store, user: &UserId) -> Result<Vec<Report>, FinanceError> {
    let mut reports = store.reports(user).await?;
    reports.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
    Ok(reports)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregation::tests::tx;
    use crate::domain::account::OnboardingMethod;
    use crate::error::Missing;
    use crate::storage::memory::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Answers every completion with the same text and records the prompts.
    pub(crate) struct ScriptedLlm {
        pub reply: String,
        pub prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .complete_onboarding(&user(), OnboardingMethod::Manual, now())
            .await
            .unwrap();
        for t in [
            tx("a", "-1000", "2024-01-05", "Salary"),
            tx("b", "45.20", "2024-01-06", "Dining"),
            tx("c", "12.00", "2024-01-10", "Dining"),
            tx("d", "80.00", "2023-11-01", "Travel"),
        ] {
            store.insert_transaction(&user(), &t).await.unwrap();
        }
        store
    }

    fn ids(v: &[&Transaction]) -> Vec<String> {
        v.iter().map(|t| t.transaction_id.clone()).collect()
    }

    #[test]
    fn filters_by_window_and_category() {
        let list = vec![
            tx("a", "-1000", "2024-01-05", "Salary"),
            tx("b", "45.20", "2024-01-06", "Dining"),
            tx("c", "12.00", "2024-01-10", "Dining"),
            tx("d", "80.00", "2023-11-01", "Travel"),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let req = |range: TimeRange, cats: &[&str]| ReportRequest {
            time_range: range,
            categories: cats.iter().map(|c| c.to_string()).collect(),
        };

        assert_eq!(ids(&filter_transactions(&list, &req(TimeRange::Daily, &[]), today)), vec!["c"]);
        assert_eq!(
            ids(&filter_transactions(&list, &req(TimeRange::Weekly, &[]), today)),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            ids(&filter_transactions(&list, &req(TimeRange::AllTime, &["Dining", "Travel"]), today)),
            vec!["b", "c", "d"]
        );
    }

    #[tokio::test]
    async fn empty_selection_reports_no_data() {
        let store = seeded().await;
        let llm = ScriptedLlm::new("unused");
        let err = generate_report(
            &store,
            &llm,
            &user(),
            ReportRequest {
                time_range: TimeRange::Weekly,
                categories: vec!["Travel".into()],
            },
            now(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FinanceError::NoData { time_range: TimeRange::Weekly, .. }));
        assert!(llm.prompts.lock().unwrap().is_empty());
        assert!(report_history(&store, &user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generated_reports_are_unwrapped_and_kept() {
        let store = seeded().await;
        let llm = ScriptedLlm::new("```markdown\n# Summary\n```");
        let out = generate_report(
            &store,
            &llm,
            &user(),
            ReportRequest {
                time_range: TimeRange::Weekly,
                categories: vec!["Dining".into()],
            },
            now(),
        )
        .await
        .unwrap();

        assert_eq!(out.report.report, "# Summary");
        assert_eq!(out.report.transaction_count, 2);
        assert_eq!(out.data.transactions.len(), 2);

        let prompts = llm.prompts.lock().unwrap();
        let prompt = &prompts[0].messages[0].content;
        assert!(prompt.contains("weekly"));
        assert!(prompt.contains("Dining"));
        assert!(!prompt.contains("Salary"));

        drop(prompts);

        let history = report_history(&store, &user()).await.unwrap();
        assert_eq!(history, vec![out.report]);
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = seeded().await;
        let llm = ScriptedLlm::new("report");
        let earlier = now() - chrono::Duration::days(1);
        for at in [earlier, now()] {
            let request = ReportRequest {
                time_range: TimeRange::AllTime,
                categories: Vec::new(),
            };
            generate_report(&store, &llm, &user(), request, at)
                .await
                .unwrap();
        }
        let history = report_history(&store, &user()).await.unwrap();
        assert_eq!(history[0].generated_at, now());
        assert_eq!(history[1].generated_at, earlier);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = MemoryStore::new();
        let llm = ScriptedLlm::new("report");
        let err = generate_report(&store, &llm, &user(), ReportRequest::default(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, FinanceError::NotFound(Missing::User)));
    }

    #[test]
    fn category_focus_mentions_present_categories() {
        let lines = vec![ReportLine::from(&tx("b", "1", "2024-01-01", "Dining"))];
        assert!(category_focus(&[], &lines).contains("Dining"));
        assert!(category_focus(&["Travel".into()], &lines).starts_with("Although"));
        assert!(category_focus(&["Dining".into()], &lines).starts_with("Focus"));
    }
}
