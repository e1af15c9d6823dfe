pub mod aggregator;
pub mod chat;
pub mod dashboard;
pub mod onboarding;
pub mod reports;
pub mod transactions;
