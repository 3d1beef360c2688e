//! Handoff wire formats: request ids, storage paths, AAD, the sealed payload
//! and the Noise endpoint discovery record.
//!
//! All cross-app formats are JSON with camelCase keys; 32-byte fields are
//! lowercase hex.

use std::{fmt, str::FromStr};

use ringlink_core::{EntropyError, Environment};
use ringlink_crypto::{KEY_LEN, NoiseKeypair, public_key_from_secret};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{config::HandoffConfig, error::ActionError};

/// Purpose tag bound into the envelope key schedule.
pub const HANDOFF_PURPOSE: &str = "handoff";

/// Current handoff payload version.
pub const PAYLOAD_VERSION: u8 = 1;

/// Current Noise endpoint record version.
pub const ENDPOINT_RECORD_VERSION: u8 = 1;

/// `mode` value of a handoff callback.
pub const CALLBACK_MODE: &str = "secure_handoff";

/// Unguessable 256-bit handoff reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId([u8; 32]);

impl RequestId {
    /// Draw a fresh id from the environment's secure random source.
    pub fn generate<E: Environment>(env: &E) -> Result<Self, EntropyError> {
        env.random_array().map(Self)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}

impl FromStr for RequestId {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ActionError::InvalidParameter { name: "request_id", reason: reason.to_string() };
        if s.len() != 64 {
            return Err(invalid("expected 64 hex characters"));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| invalid("not hex"))?;
        Ok(Self(bytes))
    }
}

impl HandoffConfig {
    /// Storage path of the envelope for `request_id`.
    pub fn handoff_path(&self, request_id: &RequestId) -> String {
        format!("/{}/{}/handoff/{request_id}", self.namespace, self.version)
    }

    /// Storage prefix under which all handoff envelopes live.
    pub fn handoff_prefix(&self) -> String {
        format!("/{}/{}/handoff/", self.namespace, self.version)
    }

    /// Storage path of the Noise endpoint record.
    pub fn noise_record_path(&self) -> String {
        format!("/{}/{}/noise", self.namespace, self.version)
    }

    /// Additional data binding an envelope to its owner, location and id.
    pub fn handoff_aad(&self, owner_identity: &str, path: &str, request_id: &RequestId) -> String {
        format!("{}:{}:handoff:{owner_identity}:{path}:{request_id}", self.protocol, self.version)
    }
}

mod hex_key {
    use ringlink_crypto::{KEY_LEN, decode_key_hex};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(key: &[u8; KEY_LEN], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Zeroizing::new(hex::encode(key)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; KEY_LEN], D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        decode_key_hex(&encoded).map_err(D::Error::custom)
    }
}

/// One epoch keypair shipped in a payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PayloadKeypair {
    /// Key-rotation generation
    #[zeroize(skip)]
    pub epoch: u32,
    /// X25519 public key
    #[zeroize(skip)]
    #[serde(with = "hex_key")]
    pub public_key: [u8; KEY_LEN],
    /// X25519 secret key
    #[serde(with = "hex_key")]
    pub secret_key: [u8; KEY_LEN],
}

impl From<&NoiseKeypair> for PayloadKeypair {
    fn from(keypair: &NoiseKeypair) -> Self {
        Self { epoch: keypair.epoch, public_key: keypair.public_key, secret_key: keypair.secret_key }
    }
}

/// Session material handed to a consumer app.
///
/// Exists in plaintext only in memory on either side; zeroized on drop and
/// redacted from `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HandoffPayload {
    /// Payload format version
    #[zeroize(skip)]
    pub version: u8,
    /// Hex Ed25519 public key of the identity
    pub owner_identity: String,
    /// Homeserver session secret
    pub session_secret: String,
    /// Capabilities granted with the session
    pub capabilities: Vec<String>,
    /// Consumer device the keys are bound to
    pub device_id: String,
    /// Epoch 0 and optionally epoch 1 keypairs
    pub noise_keypairs: Vec<PayloadKeypair>,
    /// Seed for deriving later epochs
    #[serde(with = "hex_key")]
    pub noise_seed: [u8; KEY_LEN],
    /// Creation time, Unix milliseconds
    #[zeroize(skip)]
    pub created_at: u64,
    /// Expiry time, Unix milliseconds
    #[zeroize(skip)]
    pub expires_at: u64,
}

impl HandoffPayload {
    /// Keypair for `epoch`, if shipped.
    pub fn keypair(&self, epoch: u32) -> Option<&PayloadKeypair> {
        self.noise_keypairs.iter().find(|k| k.epoch == epoch)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, ActionError> {
        serde_json::to_vec(self).map_err(|e| ActionError::InvalidPayload(e.to_string()))
    }

    /// Decode from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ActionError> {
        serde_json::from_slice(bytes).map_err(|e| ActionError::InvalidPayload(e.to_string()))
    }

    /// Check structural invariants and freshness.
    ///
    /// `max_lifetime` bounds `expires_at - created_at`; `now_ms` must be
    /// before `expires_at`.
    pub fn validate(&self, now_ms: u64, max_lifetime_ms: u64) -> Result<(), ActionError> {
        let invalid = |reason: &str| Err(ActionError::InvalidPayload(reason.to_string()));

        if self.version != PAYLOAD_VERSION {
            return invalid("unsupported version");
        }
        if self.expires_at <= self.created_at || self.expires_at - self.created_at > max_lifetime_ms {
            return invalid("bad lifetime");
        }
        if now_ms >= self.expires_at {
            return invalid("expired");
        }
        if self.keypair(0).is_none() {
            return invalid("missing epoch 0 keypair");
        }
        if self.noise_keypairs.iter().any(|k| public_key_from_secret(&k.secret_key) != k.public_key) {
            return invalid("keypair mismatch");
        }
        Ok(())
    }
}

impl fmt::Debug for HandoffPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffPayload")
            .field("version", &self.version)
            .field("owner_identity", &self.owner_identity)
            .field("device_id", &self.device_id)
            .field("capabilities", &self.capabilities)
            .field("epochs", &self.noise_keypairs.iter().map(|k| k.epoch).collect::<Vec<_>>())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Public discovery record telling peers which Noise key reaches a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseEndpointRecord {
    /// Record format version
    pub version: u8,
    /// Hex Ed25519 public key of the identity
    pub owner_identity: String,
    /// Device the key belongs to
    pub device_id: String,
    /// Epoch of `public_key`
    pub epoch: u32,
    /// X25519 static public key
    #[serde(with = "hex_key")]
    pub public_key: [u8; KEY_LEN],
    /// Publication time, Unix milliseconds
    pub updated_at: u64,
}
