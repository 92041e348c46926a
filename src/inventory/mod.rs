pub mod handlers;
pub mod ledger;
pub mod models;

pub use ledger::InventoryLedger;
pub use models::{InventoryRecord, InventoryTransaction};
