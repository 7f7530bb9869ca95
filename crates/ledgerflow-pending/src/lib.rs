//! Ledgerflow Pending
//!
//! Bridges "transaction submitted" to "transaction final".
//!
//! - [`PendingTransactionStore`]: one record per submitted transaction,
//!   keyed by (chain id, hash), holding the message that resumes the
//!   waiting workflow
//! - [`TransactionLedger`]: mined / finalized status and receipt per
//!   transaction, read by check-status steps through [`check_settlement`]
//! - [`TransactionFinalizer`]: turns new chain heads into finalized ranges
//!   and drives the store's resume publishes; its cursor is persisted next
//!   to the records
//!
//! Resume delivery is at-least-once: a record is deleted only after its
//! resume message was published.

mod error;
mod finalizer;
mod ledger;
mod record;
mod store;

pub use error::PendingError;
pub use finalizer::{FinalizeReport, TransactionFinalizer};
pub use ledger::{
  InMemoryLedger, LedgerEntry, Settlement, TransactionLedger, TransactionStatus, check_settlement,
};
pub use record::{PendingState, PendingTransaction};
pub use store::{FinalizeOutcome, PendingTransactionStore, RetryReport};
