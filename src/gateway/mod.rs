// Payment gateway access
pub mod client;
pub mod retry;

pub use client::{PortOneClient, PortOneConfig};
pub use retry::{GatewayOutcome, GatewayRetryClient, RetryPolicy};
