//! TXT record parsing for discovered services.

use companion_core::error::ParseError;
use companion_core::{Device, DeviceId};
use std::collections::HashMap;
use std::net::IpAddr;

/// Parser for Companion and AirPlay TXT records.
pub struct TxtRecordParser;

impl TxtRecordParser {
    /// Build a device from a resolved `_companion-link._tcp` service.
    ///
    /// TXT keys are normalised to lowercase; the stable identifier comes
    /// from `deviceid` with a name/endpoint composite as fallback.
    pub fn parse_companion_txt(
        service_name: &str,
        txt: &HashMap<String, String>,
        address: IpAddr,
        port: u16,
    ) -> Result<Device, ParseError> {
        let properties: HashMap<String, String> = txt
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        let identifier = match properties.get("deviceid") {
            Some(id) if !id.is_empty() => DeviceId::from_txt(id),
            _ => DeviceId::composite(service_name, address, port),
        };

        let model = properties
            .get("model")
            .or_else(|| properties.get("rpmd"))
            .cloned();

        Ok(Device {
            identifier,
            name: service_name.to_string(),
            address,
            port,
            model,
            properties,
        })
    }

    /// Extract `(identifier, name, model)` from a resolved `_airplay._tcp`
    /// service. AirPlay entries are used for name resolution only.
    pub fn parse_airplay_names(
        service_name: &str,
        txt: &HashMap<String, String>,
    ) -> Option<(DeviceId, String, Option<String>)> {
        let deviceid = txt
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("deviceid"))
            .map(|(_, v)| v)?;
        let model = txt
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("model"))
            .map(|(_, v)| v.clone());

        Some((
            DeviceId::from_txt(deviceid),
            service_name.to_string(),
            model,
        ))
    }

    /// Enrich a Companion device with the friendlier AirPlay name and model.
    pub fn merge_airplay_names(
        device: &Device,
        name: &str,
        model: Option<&String>,
    ) -> Device {
        let mut merged = device.clone();
        merged.name = name.to_string();
        if merged.model.is_none() {
            merged.model = model.cloned();
        }
        merged
    }
}
