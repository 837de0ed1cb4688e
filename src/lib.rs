// Library exports for the daemon binary and integration tests
pub mod api;
pub mod auth;
pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod events;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod observability;
pub mod router;
pub mod state;
pub mod store;
pub mod types;
pub mod webhooks;

pub use crate::core::{CoreOptions, SubpayCore};
pub use crate::state::AppState;
