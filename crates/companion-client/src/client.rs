//! Top-level client: discovery plus session establishment.

use crate::keystore::{CredentialStore, Credentials, FileCredentialStore};
use crate::session::CompanionSession;
use crate::transport::TcpConnector;
use companion_core::error::{Result, SessionError};
use companion_core::Device;
use companion_discovery::{Discovery, ServiceBrowser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry point: scans for Apple TVs and opens sessions against them.
///
/// One device per session; sessions against different devices coexist
/// independently, sharing only the injected credential store.
pub struct CompanionClient {
    browser: ServiceBrowser,
    store: Arc<dyn CredentialStore>,
}

impl CompanionClient {
    /// Create a client with a JSON credential file at `path`.
    pub fn new(credentials_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            browser: ServiceBrowser::new()?,
            store: Arc::new(FileCredentialStore::new(credentials_path)),
        })
    }

    /// Create a client with an injected credential store.
    pub fn with_store(store: Arc<dyn CredentialStore>) -> Result<Self> {
        Ok(Self {
            browser: ServiceBrowser::new()?,
            store,
        })
    }

    /// Scan the network for Apple TVs.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        self.browser.scan(timeout).await
    }

    /// Open a session to a discovered device.
    pub async fn connect(&self, device: &Device) -> Result<CompanionSession> {
        let connector = Arc::new(TcpConnector::new(device.socket_addr(), CONNECT_TIMEOUT));
        CompanionSession::open(device.clone(), connector, Arc::clone(&self.store)).await
    }

    /// Connect and authenticate in one step: verify with stored credentials.
    ///
    /// Fails with `NoCredentials` if the device has never been paired; run
    /// [`CompanionSession::pair`] on a plain [`connect`] first.
    ///
    /// [`connect`]: CompanionClient::connect
    pub async fn connect_verified(&self, device: &Device) -> Result<CompanionSession> {
        let credentials = self
            .stored_credentials(device)?
            .ok_or_else(|| SessionError::NoCredentials(device.identifier.to_string()))?;

        let session = self.connect(device).await?;
        session.verify(&credentials).await?;
        Ok(session)
    }

    /// Stored credentials for a device, if any.
    pub fn stored_credentials(&self, device: &Device) -> Result<Option<Credentials>> {
        self.store.get(device.identifier.as_str())
    }

    /// Forget a device (explicit user reset).
    pub fn forget(&self, device: &Device) -> Result<()> {
        self.store.delete(device.identifier.as_str())
    }
}
