//! The assistant: answers questions with the user's full financial context in
//! the system prompt and keeps a question/answer log keyed by turn id.

use crate::dashboard::current_snapshot;
use crate::domain::account::Account;
use crate::domain::chat::{ChatMessage, ChatTurn, Role};
use crate::domain::report::Report;
use crate::domain::snapshot::Snapshot;
use crate::domain::transaction::{Transaction, UserId};
use crate::error::FinanceError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::storage::Store;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub turn_id: Uuid,
    pub answer: String,
}

#[derive(Serialize)]
struct UserContext<'a> {
    transactions: &'a [Transaction],
    accounts: &'a [Account],
    snapshot: &'a Snapshot,
    reports: &'a [Report],
}

const ASSISTANT_BRIEF: &str = "\
You are a helpful financial assistant for Finverse, a personal finance management application.
Use the user's financial data below to give personalised answers.
Finverse has a dashboard with charts of the user's finances, a transactions page listing manual and bank-imported transactions, \
a reports page where the user picks a time period and categories to generate a report, and this assistant.";

const ANSWER_RULES: &str = "\
When answering:
- Be concise and clear.
- Use specific figures from the data when possible.
- If the data cannot answer the question, say so.
- Format money with currency symbols.
- Never invent information that is not in the data.
- Negative transaction amounts are income, positive amounts are expenses.
- Use the data naturally; do not mention that you have been given it.";

fn system_prompt(context: &UserContext<'_>) -> anyhow::Result<String> {
    let data = serde_json::to_string_pretty(context).context("serialize chat context failed")?;
    Ok(format!("{ASSISTANT_BRIEF}\n\nUSER DATA:\n{data}\n\n{ANSWER_RULES}"))
}

/// The question is the last message, which must come from the user.
fn question_of(messages: &[ChatMessage]) -> Result<&str, FinanceError> {
    match messages.last() {
        Some(m) if m.role == Role::User && !m.content.trim().is_empty() => Ok(m.content.trim()),
        Some(_) => Err(FinanceError::validation(
            "the last message must be a non-empty user message",
        )),
        None => Err(FinanceError::validation("messages must not be empty")),
    }
}

/// Stores the question before anything else, asks the model within `timeout`,
/// then attaches the answer to the stored turn by its id. A question whose
/// context fails to load or whose completion times out stays unanswered in
/// the log.
pub async fn answer(
    store: &dyn Store,
    llm: &dyn LlmClient,
    user: &UserId,
    request: ChatRequest,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<ChatReply, FinanceError> {
    let question = question_of(&request.messages)?.to_string();

    let turn = ChatTurn::new(question, now);
    store.start_chat_turn(user, &turn).await?;

    let transactions = store.transactions(user).await?;
    let accounts = store
        .linked_item(user)
        .await?
        .map(|item| item.accounts)
        .unwrap_or_default();
    let snapshot = current_snapshot(store, user).await?.snapshot;
    let reports = store.reports(user).await?;

    let system = system_prompt(&UserContext {
        transactions: &transactions,
        accounts: &accounts,
        snapshot: &snapshot,
        reports: &reports,
    })?;

    let completion = llm.complete(CompletionRequest {
        system,
        messages: request.messages,
        max_tokens: None,
    });
    let answer = match tokio::time::timeout(timeout, completion).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(user_id = %user, turn_id = %turn.id, ?timeout, "chat completion timed out");
            return Err(anyhow::anyhow!("chat completion timed out after {timeout:?}").into());
        }
    };

    store
        .finish_chat_turn(user, turn.id, &answer, Utc::now())
        .await?;
    tracing::info!(user_id = %user, turn_id = %turn.id, "chat turn answered");

    Ok(ChatReply {
        turn_id: turn.id,
        answer,
    })
}

/// Newest first.
pub async fn chat_history(store: &dyn Store, user: &UserId) -> Result<Vec<ChatTurn>, FinanceError> {
    let mut turns = store.chat_turns(user).await?;
    turns.sort_by(|a, b| b.asked_at.cmp(&a.asked_at));
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::tests::tx;
    use crate::domain::account::{LinkedItem, OnboardingMethod, OnboardingStatus};
    use crate::domain::snapshot::SnapshotRecord;
    use crate::report::tests::ScriptedLlm;
    use crate::storage::memory::MemoryStore;
    use crate::storage::StoreError;

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    fn ask(q: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: q.to_string(),
            }],
        }
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .complete_onboarding(&user(), OnboardingMethod::Manual, Utc::now())
            .await
            .unwrap();
        store
            .insert_transaction(&user(), &tx("a", "45.20", "2024-01-06", "Dining"))
            .await
            .unwrap();
        store
    }

    struct SlowLlm;

    #[async_trait::async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    /// A memory store whose report history cannot be read.
    struct ReportsDown(MemoryStore);

    #[async_trait::async_trait]
    impl Store for ReportsDown {
        async fn onboarding_status(&self, user: &UserId) -> Result<Option<OnboardingStatus>, StoreError> {
            self.0.onboarding_status(user).await
        }

        async fn complete_onboarding(
            &self,
            user: &UserId,
            method: OnboardingMethod,
            at: DateTime<Utc>,
        ) -> Result<OnboardingStatus, StoreError> {
            self.0.complete_onboarding(user, method, at).await
        }

        async fn transactions(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError> {
            self.0.transactions(user).await
        }

        async fn insert_transaction(&self, user: &UserId, t: &Transaction) -> Result<Snapshot, StoreError> {
            self.0.insert_transaction(user, t).await
        }

        async fn replace_transaction(&self, user: &UserId, t: &Transaction) -> Result<Snapshot, StoreError> {
            self.0.replace_transaction(user, t).await
        }

        async fn remove_transaction(&self, user: &UserId, id: &str) -> Result<Snapshot, StoreError> {
            self.0.remove_transaction(user, id).await
        }

        async fn replace_aggregator_transactions(
            &self,
            user: &UserId,
            transactions: &[Transaction],
        ) -> Result<Snapshot, StoreError> {
            self.0.replace_aggregator_transactions(user, transactions).await
        }

        async fn snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StoreError> {
            self.0.snapshot(user).await
        }

        async fn rebuild_snapshot(&self, user: &UserId) -> Result<Snapshot, StoreError> {
            self.0.rebuild_snapshot(user).await
        }

        async fn save_linked_item(&self, user: &UserId, item: &LinkedItem) -> Result<(), StoreError> {
            self.0.save_linked_item(user, item).await
        }

        async fn linked_item(&self, user: &UserId) -> Result<Option<LinkedItem>, StoreError> {
            self.0.linked_item(user).await
        }

        async fn linked_users(&self) -> Result<Vec<UserId>, StoreError> {
            self.0.linked_users().await
        }

        async fn append_report(&self, user: &UserId, report: &Report) -> Result<(), StoreError> {
            self.0.append_report(user, report).await
        }

        async fn reports(&self, _user: &UserId) -> Result<Vec<Report>, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("reports table unavailable")))
        }

        async fn start_chat_turn(&self, user: &UserId, turn: &ChatTurn) -> Result<(), StoreError> {
            self.0.start_chat_turn(user, turn).await
        }

        async fn finish_chat_turn(
            &self,
            user: &UserId,
            turn_id: Uuid,
            answer: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.0.finish_chat_turn(user, turn_id, answer, at).await
        }

        async fn chat_turns(&self, user: &UserId) -> Result<Vec<ChatTurn>, StoreError> {
            self.0.chat_turns(user).await
        }
    }

    #[tokio::test]
    async fn answers_are_attached_to_their_turn() {
        let store = store().await;
        let llm = ScriptedLlm::new("You spent $45.20 on dining.");

        let reply = answer(&store, &llm, &user(), ask("How much on dining?"), Duration::from_secs(5), Utc::now())
            .await
            .unwrap();

        let history = chat_history(&store, &user()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, reply.turn_id);
        assert_eq!(history[0].question, "How much on dining?");
        assert_eq!(history[0].answer.as_deref(), Some("You spent $45.20 on dining."));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].system.contains("Dining"));
        assert!(prompts[0].system.contains("total_expenses"));
    }

    #[tokio::test]
    async fn repeated_questions_get_distinct_turns() {
        let store = store().await;
        let llm = ScriptedLlm::new("answer");
        let now = Utc::now();
        let first = answer(&store, &llm, &user(), ask("same"), Duration::from_secs(5), now)
            .await
            .unwrap();
        let second = answer(&store, &llm, &user(), ask("same"), Duration::from_secs(5), now)
            .await
            .unwrap();
        assert_ne!(first.turn_id, second.turn_id);
        assert!(chat_history(&store, &user())
            .await
            .unwrap()
            .iter()
            .all(|t| t.answer.is_some()));
    }

    #[tokio::test]
    async fn slow_completions_time_out_and_stay_unanswered() {
        let store = store().await;
        let err = answer(&store, &SlowLlm, &user(), ask("hello?"), Duration::from_millis(20), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FinanceError::Upstream(_)));

        let history = chat_history(&store, &user()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].answer.is_none());
    }

    #[tokio::test]
    async fn questions_are_kept_when_context_fails_to_load() {
        let store = ReportsDown(store().await);
        let llm = ScriptedLlm::new("answer");
        let err = answer(&store, &llm, &user(), ask("Where did it go?"), Duration::from_secs(5), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FinanceError::Upstream(_)));
        assert!(llm.prompts.lock().unwrap().is_empty());

        let history = chat_history(&store, &user()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "Where did it go?");
        assert!(history[0].answer.is_none());
    }

    #[tokio::test]
    async fn the_last_message_must_be_a_question() {
        let store = store().await;
        let llm = ScriptedLlm::new("answer");
        let request = ChatRequest {
            messages: vec![ChatMessage {
                role: Role::Assistant,
                content: "hi".into(),
            }],
        };
        let err = answer(&store, &llm, &user(), request, Duration::from_secs(5), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FinanceError::Validation(_)));
        assert!(chat_history(&store, &user()).await.unwrap().is_empty());
    }
}
