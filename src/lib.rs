pub mod actor;
pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod inventory;
pub mod middleware;
pub mod notifications;
pub mod orders;
pub mod payment;
pub mod payout;
pub mod server;
pub mod store;
pub mod wallet;

pub use error::{AppError, AppResult};
