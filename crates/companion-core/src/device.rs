//! Device representation and identification types.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

/// Stable device identifier.
///
/// Taken from the `deviceid` TXT record (a MAC address) when present,
/// otherwise a composite of name, address, and port. Normalised to
/// uppercase so that records from `_companion-link._tcp` and
/// `_airplay._tcp` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Build from the `deviceid` TXT record value.
    pub fn from_txt(deviceid: &str) -> Self {
        Self(deviceid.trim().to_ascii_uppercase())
    }

    /// Composite fallback for services that do not advertise `deviceid`.
    pub fn composite(name: &str, address: IpAddr, port: u16) -> Self {
        Self(format!("{}@{}:{}", name, address, port).to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered Apple TV, immutable after discovery.
#[derive(Debug, Clone)]
pub struct Device {
    pub identifier: DeviceId,
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub model: Option<String>,
    /// Raw TXT record key/value pairs as advertised.
    pub properties: HashMap<String, String>,
}

impl Device {
    /// Socket address of the Companion service.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Whether the advertised model or TXT record identifies an Apple TV.
    pub fn is_apple_tv(&self) -> bool {
        if let Some(model) = &self.model {
            if model.starts_with("AppleTV") {
                return true;
            }
        }
        self.properties
            .get("rpmd")
            .map(|m| m.starts_with("AppleTV"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_device(model: Option<&str>, props: &[(&str, &str)]) -> Device {
        Device {
            identifier: DeviceId::from_txt("AA:BB:CC:DD:EE:FF"),
            name: "Living Room".to_string(),
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 17)),
            port: 49152,
            model: model.map(str::to_string),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    mod device_id {
        use super::*;

        #[test]
        fn from_txt_normalises_case() {
            let a = DeviceId::from_txt("aa:bb:cc:dd:ee:ff");
            let b = DeviceId::from_txt("AA:BB:CC:DD:EE:FF");
            assert_eq!(a, b);
        }

        #[test]
        fn from_txt_trims_whitespace() {
            let id = DeviceId::from_txt(" AA:BB:CC:DD:EE:FF ");
            assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        }

        #[test]
        fn composite_includes_endpoint() {
            let id = DeviceId::composite(
                "Office",
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
                49153,
            );
            assert!(id.as_str().contains("OFFICE"));
            assert!(id.as_str().contains("49153"));
        }
    }

    mod apple_tv_detection {
        use super::*;

        #[test]
        fn detects_by_model() {
            let device = make_device(Some("AppleTV14,1"), &[]);
            assert!(device.is_apple_tv());
        }

        #[test]
        fn detects_by_rpmd_txt() {
            let device = make_device(None, &[("rpmd", "AppleTV6,2")]);
            assert!(device.is_apple_tv());
        }

        #[test]
        fn rejects_non_apple_tv() {
            let device = make_device(Some("HomePod8,1"), &[]);
            assert!(!device.is_apple_tv());
        }
    }

    #[test]
    fn socket_addr_combines_address_and_port() {
        let device = make_device(None, &[]);
        assert_eq!(device.socket_addr().port(), 49152);
    }
}
