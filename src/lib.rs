pub mod adapter;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod handlers;
pub mod lease;
pub mod logging;
pub mod oracle_client;
pub mod oracle_rate_limiter;
pub mod rendezvous;
pub mod request_id;
pub mod state;
pub mod store;
