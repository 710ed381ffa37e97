//! mDNS service browser for Apple TV discovery.

use crate::parser::TxtRecordParser;
use crate::traits::{BrowseEvent, Discovery};
use crate::{AIRPLAY_SERVICE_TYPE, COMPANION_SERVICE_TYPE};
use companion_core::error::DiscoveryError;
use companion_core::{Device, DeviceId, Result};
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_stream::Stream;
use tracing::{debug, trace, warn};

/// Shared browse state: resolved Companion devices plus AirPlay names used
/// to enrich them.
#[derive(Default)]
struct BrowseState {
    devices: HashMap<DeviceId, Device>,
    airplay_names: HashMap<DeviceId, (String, Option<String>)>,
}

impl BrowseState {
    /// Insert or refresh a resolved Companion device, applying any AirPlay
    /// name already on record.
    fn upsert_device(&mut self, device: Device) -> BrowseEvent {
        let device = match self.airplay_names.get(&device.identifier) {
            Some((name, model)) => {
                TxtRecordParser::merge_airplay_names(&device, name, model.as_ref())
            }
            None => device,
        };

        let is_new = self
            .devices
            .insert(device.identifier.clone(), device.clone())
            .is_none();
        if is_new {
            BrowseEvent::Added(device)
        } else {
            BrowseEvent::Updated(device)
        }
    }

    /// Record an AirPlay name for a device id, enriching an
    /// already-resolved Companion device when one exists.
    fn record_airplay_names(
        &mut self,
        id: DeviceId,
        name: String,
        model: Option<String>,
    ) -> Option<BrowseEvent> {
        self.airplay_names
            .insert(id.clone(), (name.clone(), model.clone()));

        let existing = self.devices.get(&id)?;
        let merged = TxtRecordParser::merge_airplay_names(existing, &name, model.as_ref());
        self.devices.insert(id, merged.clone());
        Some(BrowseEvent::Updated(merged))
    }

    /// Remove a device by the service name from a removal event.
    fn remove_by_service_name(&mut self, service_name: &str) -> Option<BrowseEvent> {
        let id = self
            .devices
            .iter()
            .find(|(_, d)| d.name == service_name)
            .map(|(id, _)| id.clone())?;
        self.devices.remove(&id);
        Some(BrowseEvent::Removed(id))
    }

    fn snapshot(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }
}

/// Whether a resolved Companion service is worth tracking: the model
/// identifies an Apple TV, or the rpBA record marks a Companion peer.
fn tracks_apple_tv(device: &Device) -> bool {
    device.is_apple_tv() || device.properties.contains_key("rpba")
}

/// Strip the service-type and domain suffix from an mDNS fullname.
fn service_name_of(fullname: &str) -> &str {
    fullname.split('.').next().unwrap_or(fullname)
}

/// mDNS browser over `_companion-link._tcp` with `_airplay._tcp` used for
/// friendly-name resolution only.
pub struct ServiceBrowser {
    daemon: ServiceDaemon,
    state: Arc<RwLock<BrowseState>>,
    running: Arc<AtomicBool>,
}

impl ServiceBrowser {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to create mDNS daemon: {}", e)))?;

        Ok(Self {
            daemon,
            state: Arc::new(RwLock::new(BrowseState::default())),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn txt_map(info: &ServiceInfo) -> HashMap<String, String> {
        info.get_properties()
            .iter()
            .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
            .collect()
    }

    /// Prefer IPv4; fall back to any advertised address.
    fn select_address(info: &ServiceInfo) -> Option<IpAddr> {
        let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
    }

    async fn handle_companion_event(
        event: ServiceEvent,
        state: &Arc<RwLock<BrowseState>>,
    ) -> Option<BrowseEvent> {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                trace!("Companion service resolved: {}", info.get_fullname());
                let address = match Self::select_address(&info) {
                    Some(addr) => addr,
                    None => {
                        debug!("Service {} has no addresses, skipping", info.get_fullname());
                        return None;
                    }
                };

                let name = service_name_of(info.get_fullname()).to_string();
                let txt = Self::txt_map(&info);
                let device = match TxtRecordParser::parse_companion_txt(
                    &name,
                    &txt,
                    address,
                    info.get_port(),
                ) {
                    Ok(device) => device,
                    Err(e) => {
                        warn!("Failed to parse service {}: {}", info.get_fullname(), e);
                        return None;
                    }
                };

                if !tracks_apple_tv(&device) {
                    trace!("Ignoring non-Apple-TV companion service {}", device.name);
                    return None;
                }

                debug!("Discovered Apple TV: {} ({})", device.name, device.identifier);
                let mut guard = state.write().await;
                Some(guard.upsert_device(device))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                trace!("Companion service removed: {}", fullname);
                let mut guard = state.write().await;
                guard.remove_by_service_name(service_name_of(&fullname))
            }
            _ => None,
        }
    }

    async fn handle_airplay_event(
        event: ServiceEvent,
        state: &Arc<RwLock<BrowseState>>,
    ) -> Option<BrowseEvent> {
        let ServiceEvent::ServiceResolved(info) = event else {
            return None;
        };

        let name = service_name_of(info.get_fullname()).to_string();
        let txt = Self::txt_map(&info);
        let (id, ap_name, ap_model) = TxtRecordParser::parse_airplay_names(&name, &txt)?;

        let mut guard = state.write().await;
        guard.record_airplay_names(id, ap_name, ap_model)
    }

    /// Stop any running browse loops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Discovery for ServiceBrowser {
    async fn browse(&self) -> Result<Box<dyn Stream<Item = BrowseEvent> + Send + Unpin>> {
        self.running.store(true, Ordering::SeqCst);

        let companion_rx = self
            .daemon
            .browse(COMPANION_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse Companion: {}", e)))?;
        let airplay_rx = self
            .daemon
            .browse(AIRPLAY_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse AirPlay: {}", e)))?;

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);

        let stream = async_stream::stream! {
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let recv_timeout = Duration::from_millis(100);

                if let Ok(event) = companion_rx.recv_timeout(recv_timeout) {
                    if let Some(browse_event) =
                        ServiceBrowser::handle_companion_event(event, &state).await
                    {
                        yield browse_event;
                    }
                }

                if let Ok(event) = airplay_rx.recv_timeout(recv_timeout) {
                    if let Some(browse_event) =
                        ServiceBrowser::handle_airplay_event(event, &state).await
                    {
                        yield browse_event;
                    }
                }

                tokio::task::yield_now().await;
            }
        };

        Ok(Box::new(Box::pin(stream)))
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        self.running.store(true, Ordering::SeqCst);

        let companion_rx = self
            .daemon
            .browse(COMPANION_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse Companion: {}", e)))?;
        let airplay_rx = self
            .daemon
            .browse(AIRPLAY_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse AirPlay: {}", e)))?;

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let recv_timeout = Duration::from_millis(100);
            if let Ok(event) = companion_rx.recv_timeout(recv_timeout) {
                let _ = Self::handle_companion_event(event, &self.state).await;
            }
            if let Ok(event) = airplay_rx.recv_timeout(recv_timeout) {
                let _ = Self::handle_airplay_event(event, &self.state).await;
            }
            tokio::task::yield_now().await;
        }

        let guard = self.state.read().await;
        Ok(guard.snapshot())
    }
}
