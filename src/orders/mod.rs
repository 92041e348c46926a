pub mod models;

pub use models::{Order, OrderGroup, OrderLine, OrderWithLines};
