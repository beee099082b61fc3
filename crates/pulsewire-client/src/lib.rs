//! WebSocket client for pulsewire.
//!
//! Runs a [`pulsewire_core::Session`] on tokio: opens sockets with
//! `tokio-tungstenite`, drives the heartbeat and backoff timers, and publishes
//! [`Snapshot`]s through a `watch` channel for any number of readers.

mod client;
mod config;
mod driver;
mod error;
mod transport;

pub use client::Client;
pub use config::{ClientConfig, DEFAULT_URL, URL_ENV, default_url};
pub use error::{ClientError, ConfigError};
pub use pulsewire_core::{
    ConnectionState, ConnectionStatus, NotificationRecord, ServerError, Snapshot,
    WorkflowUpdateRecord,
};
