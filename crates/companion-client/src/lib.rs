//! # companion-client
//!
//! Remote control of an Apple TV over the Companion link.
//!
//! The flow: discover a device, open a session, pair once with the
//! on-screen PIN, then verify on every connection and drive it:
//!
//! ```no_run
//! use companion_client::{ButtonAction, CompanionClient, HidButton};
//! use std::time::Duration;
//!
//! # async fn example() -> companion_core::Result<()> {
//! let client = CompanionClient::new("credentials.json")?;
//! let devices = client.scan(Duration::from_secs(5)).await?;
//! let device = devices.first().expect("no Apple TV found");
//!
//! let session = client.connect(device).await?;
//! let credentials = session.pair("1234").await?;
//! session.verify(&credentials).await?;
//! session.send_button(HidButton::Select, ButtonAction::Tap).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod commands;
mod events;
mod keystore;
mod session;
mod transport;

pub use client::CompanionClient;
pub use commands::{ButtonAction, HidButton, MediaCommand};
pub use events::{EventSubscription, ObserverGuard, SessionEvent};
pub use keystore::{CredentialStore, Credentials, FileCredentialStore};
pub use session::{CompanionSession, REPLY_TIMEOUT};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport, TransportReader, TransportWriter};
