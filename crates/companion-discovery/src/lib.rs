//! # companion-discovery
//!
//! Bonjour/mDNS discovery of Apple TVs advertising the Companion link.

mod browser;
mod parser;
mod traits;

pub use browser::ServiceBrowser;
pub use parser::TxtRecordParser;
pub use traits::{BrowseEvent, Discovery};

/// Primary service type for remote control.
pub const COMPANION_SERVICE_TYPE: &str = "_companion-link._tcp.local.";

/// Used for friendly-name resolution only.
pub const AIRPLAY_SERVICE_TYPE: &str = "_airplay._tcp.local.";
