//! Discovery trait and browse events.

use companion_core::{Device, DeviceId, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_stream::Stream;

/// Events yielded by a continuous browse.
#[derive(Debug, Clone)]
pub enum BrowseEvent {
    /// A new Apple TV appeared.
    Added(Device),
    /// A known device re-resolved with updated metadata.
    Updated(Device),
    /// A device disappeared from the network.
    Removed(DeviceId),
}

/// Service discovery interface consumed by the client.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Browse continuously, yielding add/update/remove events.
    async fn browse(&self) -> Result<Box<dyn Stream<Item = BrowseEvent> + Send + Unpin>>;

    /// One-shot scan: browse for `timeout` and return the devices seen.
    async fn scan(&self, timeout: Duration) -> Result<Vec<Device>>;
}
