pub mod handlers;
pub mod ledger;
pub mod models;

pub use ledger::{EscrowLocks, LedgerEntry, TransferRecord, WalletLedger};
pub use models::{Wallet, WalletReconciliation, WalletTransaction};
