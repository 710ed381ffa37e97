//! The Companion session.
//!
//! Owns the authenticated channel to one Apple TV: pairing exchanges run as
//! request/reply over TLV8 frames, then pair-verify installs the channel
//! cipher and every Event frame is sealed with counter nonces. A single
//! reader task decodes inbound frames and dispatches them; all shared state
//! lives behind one mutex so counter and table mutation is serialised.

use crate::commands::{button_payload, media_payload, ButtonAction, HidButton, MediaCommand};
use crate::events::{EventSubscription, ObserverGuard, SessionEvent};
use crate::keystore::{CredentialStore, Credentials};
use crate::transport::{Connector, TransportWriter};
use companion_core::error::{Error, PairingError, Result, SessionError};
use companion_core::frame::{Frame, FrameBuffer, FrameType};
use companion_core::{Device, Value};
use companion_crypto::chacha::ChannelCipher;
use companion_crypto::ed25519::IdentityKeyPair;
use companion_pairing::{ControllerIdentity, PairingSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default wait for any reply or delay-bounded step.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between press and release for a single tap.
const TAP_RELEASE_DELAY: Duration = Duration::from_millis(50);
/// Gap between the two taps of a double tap.
const DOUBLE_TAP_DELAY: Duration = Duration::from_millis(100);
/// Dwell time for a hold.
const HOLD_DWELL: Duration = Duration::from_secs(1);

/// Keyboard focus state driven by `_tiStarted`/`_tiStopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Focus {
    Unfocused,
    Focused { text: String },
}

/// State shared between the reader task and the request path.
struct Inner {
    writer: Option<Box<dyn TransportWriter>>,
    cipher: Option<ChannelCipher>,
    /// Waiter for the next pairing reply; one exchange in flight at a time.
    pairing_waiter: Option<oneshot::Sender<Frame>>,
    focus: Focus,
    connected: bool,
    reconnect_attempted: bool,
}

/// An open session against one Apple TV.
pub struct CompanionSession {
    device: Device,
    store: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    inner: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<SessionEvent>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CompanionSession {
    /// Dial the device and start the reader task. The session is connected
    /// but not yet authenticated; run [`pair`] or [`verify`] next.
    ///
    /// [`pair`]: CompanionSession::pair
    /// [`verify`]: CompanionSession::verify
    pub(crate) async fn open(
        device: Device,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self> {
        let transport = connector.connect().await?;
        let (reader_half, writer_half) = transport.into_split();

        let (events_tx, _) = broadcast::channel(64);
        let inner = Arc::new(Mutex::new(Inner {
            writer: Some(writer_half),
            cipher: None,
            pairing_waiter: None,
            focus: Focus::Unfocused,
            connected: true,
            reconnect_attempted: false,
        }));

        let handle = spawn_reader(reader_half, Arc::clone(&inner), events_tx.clone());

        info!("Session opened to {} ({})", device.name, device.identifier);
        Ok(Self {
            device,
            store,
            connector,
            inner,
            events_tx,
            reader: std::sync::Mutex::new(Some(handle)),
        })
    }

    /// The device this session is bound to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run pair-setup with the on-screen PIN.
    ///
    /// The credentials record is persisted atomically before success is
    /// reported.
    pub async fn pair(&self, pin: &str) -> Result<Credentials> {
        let controller = ControllerIdentity::from_keypair(IdentityKeyPair::generate());
        let mut pairing = PairingSession::new(controller.clone());

        let m1 = pairing.start_pair_setup(pin)?;
        let mut reply = self
            .pairing_request(FrameType::PairSetupStart, m1)
            .await?;

        loop {
            match pairing.continue_pair_setup(&reply.payload)? {
                Some(next) => {
                    reply = self.pairing_request(FrameType::PairSetupNext, next).await?;
                }
                None => break,
            }
        }

        let outcome = pairing.take_setup_outcome().ok_or(Error::Pairing(
            PairingError::InvalidState("Pair-setup finished without an outcome"),
        ))?;

        let credentials = Credentials {
            identifier: self.device.identifier.to_string(),
            client_material: controller.keypair().to_stored(),
            server_ltpk: outcome.server_ltpk,
        };
        self.store.put(&self.device.name, &credentials)?;

        info!("Paired with {}", self.device.name);
        Ok(credentials)
    }

    /// Run pair-verify from stored credentials and install the channel
    /// cipher, then announce the session.
    pub async fn verify(&self, credentials: &Credentials) -> Result<()> {
        let identity = credentials.identity()?;
        let controller = ControllerIdentity::from_keypair(identity);
        let mut pairing = PairingSession::new(controller);

        let pv1 = pairing.start_pair_verify(credentials.server_ltpk)?;
        let mut reply = self
            .pairing_request(FrameType::PairVerifyStart, pv1)
            .await?;

        loop {
            match pairing.continue_pair_verify(&reply.payload)? {
                Some(next) => {
                    reply = self
                        .pairing_request(FrameType::PairVerifyNext, next)
                        .await?;
                }
                None => break,
            }
        }

        let keys = pairing.take_session_keys().ok_or(Error::Pairing(
            PairingError::InvalidState("Pair-verify finished without channel keys"),
        ))?;

        {
            let mut inner = self.inner.lock().await;
            inner.cipher = Some(ChannelCipher::new(
                *keys.send_key.as_bytes(),
                *keys.recv_key.as_bytes(),
            ));
        }

        self.send_event_payload(session_start_payload()).await?;
        info!("Session with {} verified", self.device.name);
        Ok(())
    }

    /// Send a button press with the given action timing.
    pub async fn send_button(&self, button: HidButton, action: ButtonAction) -> Result<()> {
        self.ensure_connected().await?;
        match action {
            ButtonAction::Tap => self.tap(button).await,
            ButtonAction::DoubleTap => {
                self.tap(button).await?;
                tokio::time::sleep(DOUBLE_TAP_DELAY).await;
                self.tap(button).await
            }
            ButtonAction::Hold => {
                self.send_event_payload(button_payload(button, true)).await?;
                tokio::time::sleep(HOLD_DWELL).await;
                self.send_event_payload(button_payload(button, false)).await
            }
        }
    }

    async fn tap(&self, button: HidButton) -> Result<()> {
        self.send_event_payload(button_payload(button, true)).await?;
        tokio::time::sleep(TAP_RELEASE_DELAY).await;
        self.send_event_payload(button_payload(button, false)).await
    }

    /// Send a media-control command.
    pub async fn send_media(
        &self,
        command: MediaCommand,
        params: impl IntoIterator<Item = (String, Value)> + Send,
    ) -> Result<()> {
        self.ensure_connected().await?;
        self.send_event_payload(media_payload(command, params)).await
    }

    /// Register interest in named events.
    pub async fn register_interest(&self, events: &[&str]) -> Result<()> {
        let payload = Value::dict([
            ("_t", Value::from("_interest")),
            (
                "_regEvents",
                Value::Array(events.iter().map(|e| Value::from(*e)).collect()),
            ),
        ]);
        self.send_event_payload(payload).await
    }

    /// Current text of the focused field.
    pub async fn get_text(&self) -> Result<String> {
        let inner = self.inner.lock().await;
        match &inner.focus {
            Focus::Focused { text } => Ok(text.clone()),
            Focus::Unfocused => Err(SessionError::NotFocused.into()),
        }
    }

    /// Replace (`clear = true`) or append to the focused text field.
    ///
    /// Refused locally, without any traffic, when no field is focused.
    pub async fn set_text(&self, text: &str, clear: bool) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            if inner.focus == Focus::Unfocused {
                return Err(SessionError::NotFocused.into());
            }
        }

        let payload = Value::dict([
            ("_t", Value::from("_tiStart")),
            (
                "_tiData",
                Value::dict([
                    ("text", Value::from(text)),
                    ("clear", Value::Bool(clear)),
                ]),
            ),
        ]);
        self.send_event_payload(payload).await
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.events_tx.subscribe(),
        }
    }

    /// Deliver session events to a callback; delivery stops when the
    /// returned guard is dropped.
    pub fn observe_events<F>(&self, callback: F) -> ObserverGuard
    where
        F: Fn(SessionEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                callback(event);
            }
        });
        ObserverGuard { task }
    }

    /// Close the transport and drop key material.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        inner.cipher = None;
        inner.pairing_waiter = None;
        if let Some(mut writer) = inner.writer.take() {
            let _ = writer.close().await;
        }
        drop(inner);

        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.abort();
        }
        info!("Session with {} closed", self.device.name);
    }

    /// Send one pairing payload and await the matching reply frame.
    async fn pairing_request(&self, frame_type: FrameType, payload: Vec<u8>) -> Result<Frame> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            if !inner.connected {
                return Err(SessionError::NotConnected.into());
            }
            if inner.pairing_waiter.is_some() {
                return Err(Error::Pairing(PairingError::InvalidState(
                    "A pairing reply is already pending",
                )));
            }
            inner.pairing_waiter = Some(tx);

            let frame = Frame::new(frame_type, payload);
            let send_result = match inner.writer.as_mut() {
                Some(writer) => writer.send(&frame.encode()).await,
                None => Err(SessionError::NotConnected.into()),
            };
            if let Err(e) = send_result {
                inner.pairing_waiter = None;
                return Err(e);
            }
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(SessionError::TransportClosed.into()),
            Err(_) => {
                // A timed-out exchange poisons the session.
                self.teardown().await;
                Err(Error::Timeout)
            }
        }
    }

    /// Seal (once channel keys exist) and send an Event frame.
    async fn send_event_payload(&self, payload: Value) -> Result<()> {
        let bytes = payload.encode()?;
        let mut inner = self.inner.lock().await;
        if !inner.connected {
            return Err(SessionError::NotConnected.into());
        }

        let wire = match inner.cipher.as_mut() {
            Some(cipher) => cipher.seal(&bytes)?,
            None => return Err(SessionError::NotVerified.into()),
        };

        let frame = Frame::new(FrameType::Event, wire);
        let writer = inner
            .writer
            .as_mut()
            .ok_or(SessionError::NotConnected)?;
        writer.send(&frame.encode()).await?;
        Ok(())
    }

    /// Re-dial and re-verify once after a transport drop, if credentials
    /// exist for the device.
    async fn ensure_connected(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.connected {
                return Ok(());
            }
            if inner.reconnect_attempted {
                return Err(SessionError::NotConnected.into());
            }
            inner.reconnect_attempted = true;
        }

        let credentials = match self.store.get(self.device.identifier.as_str())? {
            Some(credentials) => credentials,
            None => {
                let _ = self.events_tx.send(SessionEvent::ConnectionLost);
                return Err(SessionError::NoCredentials(
                    self.device.identifier.to_string(),
                )
                .into());
            }
        };

        info!("Attempting reconnect to {}", self.device.name);
        match self.reconnect(&credentials).await {
            Ok(()) => {
                let _ = self.events_tx.send(SessionEvent::Reconnected);
                Ok(())
            }
            Err(e) => {
                warn!("Reconnect to {} failed: {}", self.device.name, e);
                let _ = self.events_tx.send(SessionEvent::ConnectionLost);
                Err(e)
            }
        }
    }

    async fn reconnect(&self, credentials: &Credentials) -> Result<()> {
        let transport = self.connector.connect().await?;
        let (reader_half, writer_half) = transport.into_split();

        {
            let mut inner = self.inner.lock().await;
            inner.writer = Some(writer_half);
            inner.cipher = None;
            inner.pairing_waiter = None;
            inner.connected = true;
        }

        let handle = spawn_reader(reader_half, Arc::clone(&self.inner), self.events_tx.clone());
        if let Some(old) = self.reader.lock().unwrap().replace(handle) {
            old.abort();
        }

        self.verify(credentials).await
    }

    async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        inner.cipher = None;
        inner.pairing_waiter = None;
        if let Some(mut writer) = inner.writer.take() {
            let _ = writer.close().await;
        }
    }
}

impl Drop for CompanionSession {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

fn session_start_payload() -> Value {
    Value::dict([
        ("_i", Value::String(Uuid::new_v4().to_string())),
        ("_t", Value::from("_sessionStart")),
    ])
}

fn spawn_reader(
    mut reader: Box<dyn crate::transport::TransportReader>,
    inner: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = FrameBuffer::new();
        'read: loop {
            let bytes = match reader.recv().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Transport read ended: {}", e);
                    break;
                }
            };

            buffer.extend(&bytes);
            loop {
                match buffer.next_frame() {
                    Ok(Some(frame)) => {
                        if dispatch(frame, &inner, &events_tx).await.is_err() {
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Frame decode failed, closing session: {}", e);
                        break 'read;
                    }
                }
            }
        }

        let mut guard = inner.lock().await;
        guard.connected = false;
        guard.cipher = None;
        guard.pairing_waiter = None;
        drop(guard);
        let _ = events_tx.send(SessionEvent::Disconnected);
    })
}

/// Route one inbound frame. `Err` means the session must be torn down.
async fn dispatch(
    frame: Frame,
    inner: &Arc<Mutex<Inner>>,
    events_tx: &broadcast::Sender<SessionEvent>,
) -> std::result::Result<(), ()> {
    if frame.frame_type.is_pairing() {
        let mut guard = inner.lock().await;
        match guard.pairing_waiter.take() {
            Some(waiter) => {
                let _ = waiter.send(frame);
            }
            None => warn!("Unexpected pairing frame {:?}", frame.frame_type),
        }
        return Ok(());
    }

    // Event frame: open with the channel cipher once keys are installed.
    let payload = {
        let mut guard = inner.lock().await;
        match guard.cipher.as_mut() {
            Some(cipher) => match cipher.open(&frame.payload) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("Inbound frame failed authentication: {}", e);
                    return Err(());
                }
            },
            None => frame.payload,
        }
    };

    let value = match Value::decode(&payload) {
        Ok(value) => value,
        Err(e) => {
            // Not fatal; the spec keeps the session alive on odd payloads.
            debug!("Dropping non-OPACK event payload: {}", e);
            return Ok(());
        }
    };

    let Some(tag) = value.get("_t").and_then(Value::as_str).map(str::to_string) else {
        debug!("Dropping event without _t tag");
        return Ok(());
    };

    match tag.as_str() {
        "_tiStarted" | "_tiStopped" => {
            let focused = value.get("_tiD").is_some();
            let text = value
                .get("_tiD")
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let mut guard = inner.lock().await;
            guard.focus = if focused {
                Focus::Focused { text }
            } else {
                Focus::Unfocused
            };
            drop(guard);

            let _ = events_tx.send(if focused {
                SessionEvent::KeyboardFocused
            } else {
                SessionEvent::KeyboardUnfocused
            });
        }
        "_nowPlayingInfo" => {
            let _ = events_tx.send(SessionEvent::NowPlaying(value));
        }
        _ => {
            let _ = events_tx.send(SessionEvent::Event {
                name: tag,
                payload: value,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemoryTransport};
    use crate::transport::Transport;
    use async_trait::async_trait;
    use companion_crypto::chacha::ChannelCipher;
    use std::sync::Mutex as StdMutex;

    /// Connector handing out pre-built in-memory transports.
    struct MemoryConnector {
        transports: StdMutex<Vec<MemoryTransport>>,
    }

    impl MemoryConnector {
        fn single(transport: MemoryTransport) -> Arc<Self> {
            Arc::new(Self {
                transports: StdMutex::new(vec![transport]),
            })
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            let transport = self
                .transports
                .lock()
                .unwrap()
                .pop()
                .ok_or(Error::Session(SessionError::NotConnected))?;
            Ok(Box::new(transport))
        }
    }

    /// Store stub that keeps records in memory.
    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<Vec<(String, Credentials)>>,
    }

    impl CredentialStore for MemoryStore {
        fn get(&self, identifier: &str) -> Result<Option<Credentials>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|(_, c)| c.identifier == identifier)
                .map(|(_, c)| c.clone()))
        }

        fn put(&self, device_name: &str, credentials: &Credentials) -> Result<()> {
            let mut records = self.records.lock().unwrap();
            records.retain(|(_, c)| c.identifier != credentials.identifier);
            records.push((device_name.to_string(), credentials.clone()));
            Ok(())
        }

        fn delete(&self, identifier: &str) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .retain(|(_, c)| c.identifier != identifier);
            Ok(())
        }
    }

    fn test_device() -> Device {
        Device {
            identifier: companion_core::DeviceId::from_txt("AA:BB:CC:DD:EE:FF"),
            name: "Test Apple TV".to_string(),
            address: "127.0.0.1".parse().unwrap(),
            port: 49152,
            model: Some("AppleTV6,2".to_string()),
            properties: Default::default(),
        }
    }

    async fn open_session() -> (CompanionSession, MemoryTransport) {
        let (ours, theirs) = memory::pair();
        let session = CompanionSession::open(
            test_device(),
            MemoryConnector::single(ours),
            Arc::new(MemoryStore::default()),
        )
        .await
        .unwrap();
        (session, theirs)
    }

    async fn install_cipher(session: &CompanionSession, send: [u8; 32], recv: [u8; 32]) {
        let mut inner = session.inner.lock().await;
        inner.cipher = Some(ChannelCipher::new(send, recv));
    }

    /// Feed raw bytes into the session as if the device had sent them.
    fn device_send(theirs: &MemoryTransport, frame: Frame) {
        theirs.tx.send(frame.encode()).unwrap();
    }

    async fn next_frames(theirs: &mut MemoryTransport, count: usize) -> Vec<Frame> {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        while frames.len() < count {
            let bytes = tokio::time::timeout(Duration::from_secs(5), theirs.rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("transport closed");
            buffer.extend(&bytes);
            frames.extend(buffer.drain_frames().unwrap());
        }
        frames
    }

    mod hid_buttons {
        use super::*;

        #[tokio::test]
        async fn single_tap_sends_press_then_release() {
            let (session, mut theirs) = open_session().await;
            install_cipher(&session, [0u8; 32], [0u8; 32]).await;

            let started = tokio::time::Instant::now();
            session
                .send_button(HidButton::Select, ButtonAction::Tap)
                .await
                .unwrap();
            assert!(started.elapsed() >= TAP_RELEASE_DELAY);

            let frames = next_frames(&mut theirs, 2).await;
            // The device opens with its recv key = our zeroed send key.
            let mut device_cipher = ChannelCipher::new([0u8; 32], [0u8; 32]);

            let press = Value::decode(&device_cipher.open(&frames[0].payload).unwrap()).unwrap();
            assert_eq!(press.get("_hBtS").unwrap().as_i64(), Some(1));
            assert_eq!(press.get("_hidC").unwrap().as_i64(), Some(6));

            let release = Value::decode(&device_cipher.open(&frames[1].payload).unwrap()).unwrap();
            assert_eq!(release.get("_hBtS").unwrap().as_i64(), Some(0));
            assert_eq!(release.get("_hidC").unwrap().as_i64(), Some(6));

            assert!(frames.iter().all(|f| f.frame_type == FrameType::Event));
        }

        #[tokio::test]
        async fn double_tap_sends_four_half_presses() {
            let (session, mut theirs) = open_session().await;
            install_cipher(&session, [1u8; 32], [1u8; 32]).await;

            session
                .send_button(HidButton::Menu, ButtonAction::DoubleTap)
                .await
                .unwrap();

            let frames = next_frames(&mut theirs, 4).await;
            let mut device_cipher = ChannelCipher::new([1u8; 32], [1u8; 32]);
            let states: Vec<i64> = frames
                .iter()
                .map(|f| {
                    Value::decode(&device_cipher.open(&f.payload).unwrap())
                        .unwrap()
                        .get("_hBtS")
                        .unwrap()
                        .as_i64()
                        .unwrap()
                })
                .collect();
            assert_eq!(states, vec![1, 0, 1, 0]);
        }

        #[tokio::test]
        async fn button_without_verify_is_refused() {
            let (session, _theirs) = open_session().await;
            let err = session
                .send_button(HidButton::Up, ButtonAction::Tap)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Session(SessionError::NotVerified)));
        }
    }

    mod encrypted_channel {
        use super::*;

        #[tokio::test]
        async fn outbound_counters_increase_monotonically() {
            let (session, mut theirs) = open_session().await;
            install_cipher(&session, [2u8; 32], [2u8; 32]).await;

            for _ in 0..3 {
                session
                    .send_media(MediaCommand::Play, Vec::<(String, Value)>::new())
                    .await
                    .unwrap();
            }

            let frames = next_frames(&mut theirs, 3).await;
            let mut device_cipher = ChannelCipher::new([2u8; 32], [2u8; 32]);
            for (i, frame) in frames.iter().enumerate() {
                assert_eq!(device_cipher.recv_counter(), i as u64);
                let value =
                    Value::decode(&device_cipher.open(&frame.payload).unwrap()).unwrap();
                assert_eq!(value.get("_mcc").unwrap().as_i64(), Some(1));
            }
        }

        #[tokio::test]
        async fn inbound_auth_failure_terminates_session() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [3u8; 32], [3u8; 32]).await;
            let mut events = session.subscribe();

            // Garbage that will not authenticate under the recv key.
            device_send(&theirs, Frame::new(FrameType::Event, vec![0xAA; 48]));

            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap();
            assert!(matches!(event, Some(SessionEvent::Disconnected)));

            let inner = session.inner.lock().await;
            assert!(!inner.connected);
        }
    }

    mod inbound_dispatch {
        use super::*;

        fn sealed_event(device_cipher: &mut ChannelCipher, value: &Value) -> Frame {
            let sealed = device_cipher.seal(&value.encode().unwrap()).unwrap();
            Frame::new(FrameType::Event, sealed)
        }

        #[tokio::test]
        async fn ti_started_focuses_keyboard() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [4u8; 32], [5u8; 32]).await;
            // Device sends with our recv key.
            let mut device_cipher = ChannelCipher::new([5u8; 32], [4u8; 32]);
            let mut events = session.subscribe();

            let payload = Value::dict([
                ("_t", Value::from("_tiStarted")),
                ("_tiD", Value::dict([("text", Value::from("hello"))])),
            ]);
            device_send(&theirs, sealed_event(&mut device_cipher, &payload));

            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap();
            assert!(matches!(event, Some(SessionEvent::KeyboardFocused)));
            assert_eq!(session.get_text().await.unwrap(), "hello");
        }

        #[tokio::test]
        async fn ti_stopped_unfocuses_keyboard() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [4u8; 32], [5u8; 32]).await;
            let mut device_cipher = ChannelCipher::new([5u8; 32], [4u8; 32]);
            let mut events = session.subscribe();

            let focus = Value::dict([
                ("_t", Value::from("_tiStarted")),
                ("_tiD", Value::dict([("text", Value::from("x"))])),
            ]);
            device_send(&theirs, sealed_event(&mut device_cipher, &focus));
            let _ = events.next().await;

            let unfocus = Value::dict([("_t", Value::from("_tiStopped"))]);
            device_send(&theirs, sealed_event(&mut device_cipher, &unfocus));

            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap();
            assert!(matches!(event, Some(SessionEvent::KeyboardUnfocused)));
            assert!(matches!(
                session.get_text().await.unwrap_err(),
                Error::Session(SessionError::NotFocused)
            ));
        }

        #[tokio::test]
        async fn now_playing_is_forwarded_to_observers() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [4u8; 32], [5u8; 32]).await;
            let mut device_cipher = ChannelCipher::new([5u8; 32], [4u8; 32]);
            let mut events = session.subscribe();

            let payload = Value::dict([
                ("_t", Value::from("_nowPlayingInfo")),
                ("title", Value::from("Some Show")),
            ]);
            device_send(&theirs, sealed_event(&mut device_cipher, &payload));

            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap();
            match event {
                Some(SessionEvent::NowPlaying(value)) => {
                    assert_eq!(value.get("title").unwrap().as_str(), Some("Some Show"));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        #[tokio::test]
        async fn observe_events_invokes_callback() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [4u8; 32], [5u8; 32]).await;
            let mut device_cipher = ChannelCipher::new([5u8; 32], [4u8; 32]);

            let (cb_tx, mut cb_rx) = tokio::sync::mpsc::unbounded_channel();
            let _guard = session.observe_events(move |event| {
                let _ = cb_tx.send(event);
            });

            let payload = Value::dict([("_t", Value::from("_powerState"))]);
            device_send(&theirs, sealed_event(&mut device_cipher, &payload));

            let event = tokio::time::timeout(Duration::from_secs(5), cb_rx.recv())
                .await
                .unwrap();
            assert!(matches!(
                event,
                Some(SessionEvent::Event { name, .. }) if name == "_powerState"
            ));
        }

        #[tokio::test]
        async fn undecodable_payload_keeps_session_alive() {
            let (session, theirs) = open_session().await;
            install_cipher(&session, [4u8; 32], [5u8; 32]).await;
            let mut device_cipher = ChannelCipher::new([5u8; 32], [4u8; 32]);
            let mut events = session.subscribe();

            // Authenticates fine but is not OPACK.
            let sealed = device_cipher.seal(&[0xFF, 0xFE, 0xFD]).unwrap();
            device_send(&theirs, Frame::new(FrameType::Event, sealed));

            // A follow-up event still comes through.
            let payload = Value::dict([("_t", Value::from("_somethingElse"))]);
            device_send(&theirs, sealed_event(&mut device_cipher, &payload));

            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap();
            assert!(matches!(
                event,
                Some(SessionEvent::Event { name, .. }) if name == "_somethingElse"
            ));

            let inner = session.inner.lock().await;
            assert!(inner.connected);
        }
    }

    mod text_input {
        use super::*;

        #[tokio::test]
        async fn set_text_unfocused_emits_no_frames() {
            let (session, mut theirs) = open_session().await;
            install_cipher(&session, [6u8; 32], [6u8; 32]).await;

            let err = session.set_text("x", true).await.unwrap_err();
            assert!(matches!(err, Error::Session(SessionError::NotFocused)));

            // Nothing was written to the transport.
            assert!(theirs.rx.try_recv().is_err());
        }

        #[tokio::test]
        async fn set_text_when_focused_sends_ti_start() {
            let (session, mut theirs) = open_session().await;
            install_cipher(&session, [6u8; 32], [7u8; 32]).await;
            {
                let mut inner = session.inner.lock().await;
                inner.focus = Focus::Focused {
                    text: String::new(),
                };
            }

            session.set_text("hello", true).await.unwrap();

            let frames = next_frames(&mut theirs, 1).await;
            let mut device_cipher = ChannelCipher::new([7u8; 32], [6u8; 32]);
            let value = Value::decode(&device_cipher.open(&frames[0].payload).unwrap()).unwrap();
            assert_eq!(value.get("_t").unwrap().as_str(), Some("_tiStart"));
            let data = value.get("_tiData").unwrap();
            assert_eq!(data.get("text").unwrap().as_str(), Some("hello"));
            assert_eq!(data.get("clear").unwrap().as_bool(), Some(true));
        }
    }

    mod pairing_transport {
        use super::*;
        use companion_crypto::ed25519::IdentityKeyPair;
        use companion_crypto::tlv::{Tlv8, TlvTag};
        use companion_crypto::x25519::EcdhKeyPair;
        use companion_crypto::{hkdf, keys::SharedSecret, nonce_from_label, open, seal};

        /// Accessory side of pair-verify, driven frame-by-frame over the
        /// in-memory transport.
        struct VerifyAccessory {
            identity: IdentityKeyPair,
            eph: Option<EcdhKeyPair>,
            eph_public: [u8; 32],
            verify_key: Option<[u8; 32]>,
            shared: Option<[u8; 32]>,
            client_eph: Option<[u8; 32]>,
        }

        impl VerifyAccessory {
            fn new() -> Self {
                let eph = EcdhKeyPair::generate();
                let eph_public = eph.public_key();
                Self {
                    identity: IdentityKeyPair::generate(),
                    eph: Some(eph),
                    eph_public,
                    verify_key: None,
                    shared: None,
                    client_eph: None,
                }
            }

            fn pv2_for(&mut self, pv1_payload: &[u8]) -> Vec<u8> {
                let tlv = Tlv8::parse(pv1_payload);
                let mut client_eph = [0u8; 32];
                client_eph.copy_from_slice(tlv.get(TlvTag::PublicKey).unwrap());

                let shared = self
                    .eph
                    .take()
                    .unwrap()
                    .diffie_hellman(&client_eph)
                    .unwrap();
                let verify_key = hkdf::derive_pair_verify_key(&shared).unwrap();

                let server_id = b"AA:BB:CC:DD:EE:FF";
                let mut signed = Vec::new();
                signed.extend_from_slice(&self.eph_public);
                signed.extend_from_slice(server_id);
                signed.extend_from_slice(&client_eph);
                let signature = self.identity.sign(&signed);

                let mut inner = Tlv8::new();
                inner.set(TlvTag::Identifier, server_id.to_vec());
                inner.set(TlvTag::Signature, signature.to_vec());
                let sealed =
                    seal(&verify_key, &nonce_from_label(b"PV-Msg02"), &inner.encode()).unwrap();

                self.shared = Some(shared);
                self.verify_key = Some(verify_key);
                self.client_eph = Some(client_eph);

                let mut tlv = Tlv8::new();
                tlv.set(TlvTag::State, vec![0x02]);
                tlv.set(TlvTag::PublicKey, self.eph_public.to_vec());
                tlv.set(TlvTag::EncryptedData, sealed);
                tlv.encode()
            }

            fn pv4_for(&self, pv3_payload: &[u8]) -> Vec<u8> {
                let tlv = Tlv8::parse(pv3_payload);
                let encrypted = tlv.get(TlvTag::EncryptedData).unwrap();
                let verify_key = self.verify_key.as_ref().unwrap();
                // Confirm the controller payload opens; contents are checked
                // by the pairing crate's own tests.
                open(verify_key, &nonce_from_label(b"PV-Msg03"), encrypted).unwrap();

                let mut tlv = Tlv8::new();
                tlv.set(TlvTag::State, vec![0x04]);
                tlv.encode()
            }

            /// The accessory's channel cipher (mirrored keys).
            fn channel_cipher(&self) -> ChannelCipher {
                let shared = SharedSecret::new(self.shared.unwrap().to_vec());
                let keys =
                    companion_crypto::keys::SessionKeys::derive_channel_keys(&shared).unwrap();
                ChannelCipher::new(*keys.recv_key.as_bytes(), *keys.send_key.as_bytes())
            }
        }

        #[tokio::test]
        async fn verify_installs_cipher_and_announces_session() {
            let (session, mut theirs) = open_session().await;

            let client_identity = IdentityKeyPair::generate();
            let credentials_accessory = VerifyAccessory::new();
            let credentials = Credentials {
                identifier: "AA:BB:CC:DD:EE:FF".to_string(),
                client_material: client_identity.to_stored(),
                server_ltpk: credentials_accessory.identity.public_key(),
            };

            let mut accessory = credentials_accessory;
            let verify_task = async {
                let pv1 = next_frames(&mut theirs, 1).await.remove(0);
                assert_eq!(pv1.frame_type, FrameType::PairVerifyStart);
                device_send_ref(&theirs, Frame::new(FrameType::PairVerifyNext, accessory.pv2_for(&pv1.payload)));

                let pv3 = next_frames(&mut theirs, 1).await.remove(0);
                assert_eq!(pv3.frame_type, FrameType::PairVerifyNext);
                device_send_ref(&theirs, Frame::new(FrameType::PairVerifyNext, accessory.pv4_for(&pv3.payload)));

                // The sealed _sessionStart arrives next.
                let start = next_frames(&mut theirs, 1).await.remove(0);
                assert_eq!(start.frame_type, FrameType::Event);
                let mut cipher = accessory.channel_cipher();
                let value = Value::decode(&cipher.open(&start.payload).unwrap()).unwrap();
                assert_eq!(value.get("_t").unwrap().as_str(), Some("_sessionStart"));
                assert!(value.get("_i").unwrap().as_str().is_some());
            };

            let (result, ()) = tokio::join!(session.verify(&credentials), verify_task);
            result.unwrap();
        }

        fn device_send_ref(theirs: &MemoryTransport, frame: Frame) {
            theirs.tx.send(frame.encode()).unwrap();
        }

        #[tokio::test]
        async fn pairing_reply_timeout_poisons_session() {
            tokio::time::pause();
            let (session, _theirs) = open_session().await;

            let client_identity = IdentityKeyPair::generate();
            let credentials = Credentials {
                identifier: "AA:BB".to_string(),
                client_material: client_identity.to_stored(),
                server_ltpk: [9u8; 32],
            };

            // No accessory replies; the 10 s timeout fires.
            let err = session.verify(&credentials).await.unwrap_err();
            assert!(matches!(err, Error::Timeout));

            let inner = session.inner.lock().await;
            assert!(!inner.connected);
        }
    }
}
