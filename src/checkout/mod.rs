pub mod handlers;
pub mod orchestrator;

pub use orchestrator::{AddressInput, CartLine, CheckoutOutcome, CheckoutPolicy, CheckoutRequest, CheckoutService};
