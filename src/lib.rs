//! ProcBridge Process Console Library
//!
//! A long-lived bridge that supervises one external process and relays its
//! console to any number of concurrently attached WebSocket sessions.

pub mod cli;
pub mod client;
pub mod config;
pub mod gateway;
pub mod relay;
pub mod supervisor;

use anyhow::Result;

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing subscriber for logging
pub fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("procbridge={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
