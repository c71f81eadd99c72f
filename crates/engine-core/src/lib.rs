pub mod breaker;
pub mod dlq;
pub mod metrics;
pub mod retry;
pub mod state;
