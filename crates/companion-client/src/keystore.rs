//! Persistent credential storage.
//!
//! One JSON document holds every paired device: an array of records keyed
//! by the device identifier. Writes go through a temp file in the same
//! directory followed by a rename, so a crash mid-write leaves either the
//! previous document or the new one, never a torn file.

use companion_core::error::{Error, ParseError, Result};
use companion_crypto::ed25519::IdentityKeyPair;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A pairing produced by pair-setup and consumed by pair-verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Binds the record to one device.
    pub identifier: String,
    /// Client long-term key material: Ed25519 seed || public key.
    pub client_material: [u8; 64],
    /// The Apple TV's long-term Ed25519 public key captured at M6.
    pub server_ltpk: [u8; 32],
}

impl Credentials {
    /// A record is valid only if the client material reconstructs a keypair
    /// and both keys have Ed25519 lengths; the array types guarantee the
    /// lengths, so validity is the seed/public consistency check.
    pub fn is_valid(&self) -> bool {
        IdentityKeyPair::from_stored(&self.client_material).is_ok()
    }

    /// Rebuild the client identity keypair.
    pub fn identity(&self) -> Result<IdentityKeyPair> {
        IdentityKeyPair::from_stored(&self.client_material).map_err(Error::from)
    }
}

/// Credential persistence consumed by the session.
///
/// `put` must be atomic: a process killed mid-write leaves either the old
/// record or the new one on disk.
pub trait CredentialStore: Send + Sync {
    fn get(&self, identifier: &str) -> Result<Option<Credentials>>;
    fn put(&self, device_name: &str, credentials: &Credentials) -> Result<()>;
    fn delete(&self, identifier: &str) -> Result<()>;
}

/// On-disk JSON document format.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    #[serde(rename = "deviceName")]
    device_name: String,
    credentials: StoredCredentials,
    #[serde(rename = "lastConnected")]
    last_connected: String,
}

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    identifier: String,
    /// Base64 of the 64-byte client LTPK material.
    credentials: String,
    /// Base64 of the raw 32-byte server LTPK.
    #[serde(rename = "Companion")]
    companion: String,
}

/// JSON-file credential store.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<StoredRecord>> {
        match fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                ParseError::InvalidFormat(format!("Credential file corrupt: {}", e)).into()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialise and atomically replace the document.
    fn save(&self, records: &[StoredRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| ParseError::InvalidValue(format!("Serialise failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(&self.path);
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn decode_record(record: &StoredRecord) -> Result<Credentials> {
    let material = BASE64
        .decode(&record.credentials.credentials)
        .map_err(|e| ParseError::InvalidValue(format!("Bad client material: {}", e)))?;
    let server = BASE64
        .decode(&record.credentials.companion)
        .map_err(|e| ParseError::InvalidValue(format!("Bad server LTPK: {}", e)))?;

    let client_material: [u8; 64] = material
        .try_into()
        .map_err(|_| ParseError::InvalidValue("Client material must be 64 bytes".into()))?;
    let server_ltpk: [u8; 32] = server
        .try_into()
        .map_err(|_| ParseError::InvalidValue("Server LTPK must be 32 bytes".into()))?;

    Ok(Credentials {
        identifier: record.credentials.identifier.clone(),
        client_material,
        server_ltpk,
    })
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, identifier: &str) -> Result<Option<Credentials>> {
        let records = self.load()?;
        for record in &records {
            if record.credentials.identifier == identifier {
                let credentials = decode_record(record)?;
                if !credentials.is_valid() {
                    return Err(ParseError::InvalidValue(
                        "Stored credentials failed validity check".into(),
                    )
                    .into());
                }
                return Ok(Some(credentials));
            }
        }
        Ok(None)
    }

    fn put(&self, device_name: &str, credentials: &Credentials) -> Result<()> {
        let mut records = self.load()?;
        records.retain(|r| r.credentials.identifier != credentials.identifier);
        records.push(StoredRecord {
            device_name: device_name.to_string(),
            credentials: StoredCredentials {
                identifier: credentials.identifier.clone(),
                credentials: BASE64.encode(credentials.client_material),
                companion: BASE64.encode(credentials.server_ltpk),
            },
            last_connected: Utc::now().to_rfc3339(),
        });
        self.save(&records)?;
        debug!("Stored credentials for {}", credentials.identifier);
        Ok(())
    }

    fn delete(&self, identifier: &str) -> Result<()> {
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.credentials.identifier != identifier);
        if records.len() != before {
            self.save(&records)?;
            debug!("Deleted credentials for {}", identifier);
        }
        Ok(())
    }
}
