//! Message bodies of the ETSI GS QKD 014 key delivery API.
//!
//! Field names on the wire follow the standard (`key_ID`, `master_SAE_ID`,
//! ...) and are renamed to snake case here.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Snapshot of a KME's key pool for one peer SAE. Fetched fresh for every
/// query and never cached.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct KeyStatus {
    pub stored_key_count: u64,
    pub max_key_count: u64,
    /// Default key size in bits.
    pub key_size: u64,

    #[serde(rename = "source_KME_ID")]
    pub source_kme_id: Option<String>,
    #[serde(rename = "target_KME_ID")]
    pub target_kme_id: Option<String>,
    #[serde(rename = "master_SAE_ID")]
    pub master_sae_id: Option<String>,
    #[serde(rename = "slave_SAE_ID")]
    pub slave_sae_id: Option<String>,
    pub max_key_per_request: Option<u64>,
    pub max_key_size: Option<u64>,
    pub min_key_size: Option<u64>,
    #[serde(rename = "max_SAE_ID_count")]
    pub max_sae_id_count: Option<u64>,
}

impl KeyStatus {
    /// Pool status carrying only the three mandatory counters.
    pub fn new(stored_key_count: u64, max_key_count: u64, key_size: u64) -> Self {
        Self {
            stored_key_count,
            max_key_count,
            key_size,
            source_kme_id: None,
            target_kme_id: None,
            master_sae_id: None,
            slave_sae_id: None,
            max_key_per_request: None,
            max_key_size: None,
            min_key_size: None,
            max_sae_id_count: None,
        }
    }
}

/// Optional `number` / `size` parameters of an `enc_keys` request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyRequest {
    pub number: Option<u32>,
    pub size: Option<u32>,
}

impl KeyRequest {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(n) = self.number {
            pairs.push(("number", n.to_string()));
        }
        if let Some(s) = self.size {
            pairs.push(("size", s.to_string()));
        }
        pairs
    }
}

/// One key identified by an opaque, server generated ID. The material is
/// held decoded and is wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    id: String,
    material: Zeroizing<Vec<u8>>,
}

impl KeyRecord {
    pub fn new(id: impl Into<String>, material: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            material: Zeroizing::new(material),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }

    /// Key length in bits.
    pub fn bits(&self) -> usize {
        self.material.len() * 8
    }
}

// never print key material
impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("bits", &self.bits())
            .finish()
    }
}

/// Key handed out by the master KME for encrypting toward the peer.
pub type EncryptionKey = KeyRecord;

/// The slave KME's answer to a [`DecryptionKeyRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionKey {
    pub key: KeyRecord,
    /// Set when the returned key ID differs from the requested one.
    pub correlation: Option<CorrelationWarning>,
}

impl DecryptionKey {
    pub fn is_correlated(&self) -> bool {
        self.correlation.is_none()
    }
}

/// Non-fatal observation that the slave KME answered a `dec_keys` request
/// with a key whose ID is not the one asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationWarning {
    pub requested: String,
    pub returned: String,
}

impl fmt::Display for CorrelationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key_ID mismatch: requested \"{}\", slave KME returned \"{}\"",
            self.requested, self.returned
        )
    }
}

/// Body of a `dec_keys` POST.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecryptionKeyRequest {
    #[serde(rename = "key_IDs")]
    pub key_ids: Vec<KeyIdEntry>,
}

impl DecryptionKeyRequest {
    /// Request for exactly one previously issued key.
    pub fn single(key_id: impl Into<String>, master_sae_id: impl Into<String>) -> Self {
        Self {
            key_ids: vec![KeyIdEntry {
                key_id: key_id.into(),
                master_sae_id: master_sae_id.into(),
            }],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyIdEntry {
    #[serde(rename = "key_ID")]
    pub key_id: String,
    #[serde(rename = "master_SAE_ID")]
    pub master_sae_id: String,
}

/// `{"keys": [...]}` as returned by both `enc_keys` and `dec_keys`.
#[derive(Debug, Deserialize)]
pub(crate) struct KeyContainer {
    pub keys: Option<Vec<WireKey>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireKey {
    #[serde(rename = "key_ID")]
    key_id: Option<String>,
    key: Option<String>,
}

impl WireKey {
    /// Validate the record and decode its material. The error is a reason
    /// string for [`crate::Error::MalformedResponse`].
    pub(crate) fn into_record(self) -> std::result::Result<KeyRecord, String> {
        let id = match self.key_id {
            None => return Err("key_ID is missing or null".into()),
            Some(id) if id == "null" => return Err("key_ID is the string \"null\"".into()),
            Some(id) if id.trim().is_empty() => return Err("key_ID is empty".into()),
            Some(id) => id,
        };

        let encoded = Zeroizing::new(self.key.ok_or_else(|| format!("key {id} has no key material"))?);
        let material = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| format!("key {id} material is not valid base64: {e}"))?;

        Ok(KeyRecord::new(id, material))
    }
}
