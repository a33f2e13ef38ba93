//! Shared configuration and process bootstrap for swarm-mail.

pub mod config;
pub mod telemetry;

pub use config::AppConfig;
