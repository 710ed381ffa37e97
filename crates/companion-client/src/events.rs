//! Session events and subscriptions.

use companion_core::Value;
use tokio::sync::broadcast;

/// Events emitted by a Companion session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A text field gained focus on the Apple TV.
    KeyboardFocused,
    /// The focused text field went away.
    KeyboardUnfocused,
    /// Now-playing state pushed by the device.
    NowPlaying(Value),
    /// Any other named event, forwarded with its payload.
    Event { name: String, payload: Value },
    /// The transport dropped; a reconnect may follow.
    Disconnected,
    /// The single reconnect attempt succeeded.
    Reconnected,
    /// The reconnect attempt failed; the session is gone.
    ConnectionLost,
}

/// A live subscription to session events.
///
/// Dropping the subscription unsubscribes.
pub struct EventSubscription {
    pub(crate) rx: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` once the session is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                // Skip over missed events rather than surfacing lag.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Handle for a callback observer; dropping it stops delivery.
pub struct ObserverGuard {
    pub(crate) task: tokio::task::JoinHandle<()>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
