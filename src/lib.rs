pub mod codec;
pub mod config;
pub mod domain;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod store;
pub mod utils;
