pub mod handlers;
pub mod models;
pub mod scheduler;
pub mod settlement;

pub use models::{PayoutOutcome, PayoutSweep, Settlement};
pub use scheduler::{PayoutScheduleConfig, PayoutScheduler};
pub use settlement::PayoutService;
