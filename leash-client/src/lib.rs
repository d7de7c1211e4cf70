//! Agent-side client library for the leash broker
//!
//! A [`Client`] holds one TCP connection to the broker and multiplexes any
//! number of concurrent commands over it, correlating replies by request id.
//! On top of the command layer it offers log subscriptions and the polling
//! waits test harnesses are built from.
//!
//! ```no_run
//! use leash_client::{Client, ConnectOptions};
//!
//! # async fn demo() -> leash_utils::Result<()> {
//! let client = Client::connect(ConnectOptions::default()).await?;
//! client.tap("my-app", "login-button").await?;
//! let event = client.wait_for_log("my-app", "login succeeded").await?;
//! println!("saw: {}", event.message);
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod logs;
mod pending;
mod wait;

pub use client::{Client, ConnectOptions, DEFAULT_COMMAND_TIMEOUT};
pub use logs::LogSubscription;
pub use wait::{LogPattern, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
