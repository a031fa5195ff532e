pub mod amount;
pub mod audit;
pub mod config;
pub mod csv;
pub mod engine;
pub mod history;
pub mod ledger;
pub mod model;
pub mod request;
pub mod store;

pub use amount::Amount;
pub use audit::{AuditReport, AuditValidator};
pub use config::Config;
pub use engine::{LedgerEngine, LedgerError, NotFound};
pub use history::{HistoryPage, HistoryReader};
pub use ledger::Ledger;
pub use model::{MutationResult, OwnerId, Transaction, TxId, WalletBalance, WalletId};
pub use request::{CreditRequest, DebitRequest, IdempotencyKey, Request};
pub use store::{MemoryStore, SqliteStore, Store};
