pub mod account;
pub mod chat;
pub mod report;
pub mod snapshot;
pub mod transaction;
