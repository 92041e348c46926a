pub mod handlers;
pub mod status;
pub mod tracker;

pub use tracker::{BulkConfirmation, FulfillmentTracker, LineCounts, LineStatusUpdate, OrderProgress};
