//! Sealed envelopes: X25519 + HKDF + `XChaCha20-Poly1305` with bound AAD
//!
//! All functions are pure - the ephemeral secret and nonce must be provided
//! by the caller.
//!
//! # Wire format
//!
//! A sealed envelope is a JSON object with hex-encoded byte fields:
//!
//! ```text
//! { "v": 1, "epk": <32 bytes>, "nonce": <24 bytes>, "ct": <ciphertext + tag>,
//!   "kid": <16 bytes>, "purpose": "<purpose tag>" }
//! ```
//!
//! `kid` is the first 16 bytes of SHA-256 over the recipient public key and
//! lets a recipient holding several keys pick the right one without trial
//! decryption.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    CryptoError,
    kdf::derive_key,
    keys::{KEY_LEN, dh, generate_keypair, public_key_from_secret},
};

/// Current envelope format version
pub const ENVELOPE_VERSION: u8 = 1;

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_LEN: usize = 24;

/// Size of the recipient key id
const KEY_ID_LEN: usize = 16;

/// Poly1305 tag size (16 bytes)
const TAG_LEN: usize = 16;

/// Salt for the envelope key schedule
const SEAL_SALT: &[u8] = b"ringlink-sealed-v1";

/// A sealed envelope.
///
/// Opaque to callers beyond format detection; produce with [`seal`] and
/// consume with [`open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// Format version, currently [`ENVELOPE_VERSION`]
    pub format_version: u8,
    /// Sender's ephemeral X25519 public key
    pub ephemeral_public_key: [u8; KEY_LEN],
    /// `XChaCha20` nonce
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext including the 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
    /// Truncated hash of the recipient public key
    pub key_id: [u8; KEY_ID_LEN],
    /// Purpose tag mixed into the key schedule
    pub purpose: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    v: u8,
    epk: String,
    nonce: String,
    ct: String,
    kid: String,
    purpose: String,
}

impl SealedEnvelope {
    /// Encode as JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        let wire = WireEnvelope {
            v: self.format_version,
            epk: hex::encode(self.ephemeral_public_key),
            nonce: hex::encode(self.nonce),
            ct: hex::encode(&self.ciphertext),
            kid: hex::encode(self.key_id),
            purpose: self.purpose.clone(),
        };
        serde_json::to_vec(&wire).map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    /// Decode from JSON bytes, validating field sizes and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "not an envelope object" })?;

        if wire.v != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(wire.v));
        }

        let mut envelope = Self {
            format_version: wire.v,
            ephemeral_public_key: [0u8; KEY_LEN],
            nonce: [0u8; NONCE_LEN],
            ciphertext: hex::decode(&wire.ct)
                .map_err(|_| CryptoError::MalformedEnvelope { reason: "ciphertext encoding" })?,
            key_id: [0u8; KEY_ID_LEN],
            purpose: wire.purpose,
        };

        hex::decode_to_slice(&wire.epk, &mut envelope.ephemeral_public_key)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "ephemeral key" })?;
        hex::decode_to_slice(&wire.nonce, &mut envelope.nonce)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "nonce" })?;
        hex::decode_to_slice(&wire.kid, &mut envelope.key_id)
            .map_err(|_| CryptoError::MalformedEnvelope { reason: "key id" })?;

        if envelope.ciphertext.len() < TAG_LEN {
            return Err(CryptoError::MalformedEnvelope { reason: "ciphertext shorter than tag" });
        }

        Ok(envelope)
    }
}

/// Seal `plaintext` to `recipient_public_key`.
///
/// `aad` is authenticated but not encrypted; [`open`] must be called with the
/// identical bytes. `purpose` separates key schedules of different protocol
/// uses.
///
/// # Security
///
/// - `ephemeral_secret` and `nonce` MUST come from a CSPRNG and never be
///   reused
/// - Low-order recipient keys are rejected
pub fn seal(
    recipient_public_key: &[u8; KEY_LEN],
    plaintext: &[u8],
    aad: &[u8],
    purpose: &str,
    ephemeral_secret: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
) -> Result<SealedEnvelope, CryptoError> {
    let (ephemeral_secret, ephemeral_public_key) = generate_keypair(ephemeral_secret);
    let shared = dh(&ephemeral_secret, recipient_public_key)?;
    let key = envelope_key(&shared, &ephemeral_public_key, recipient_public_key, purpose);

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Ok(SealedEnvelope {
        format_version: ENVELOPE_VERSION,
        ephemeral_public_key,
        nonce,
        ciphertext,
        key_id: key_id(recipient_public_key),
        purpose: purpose.to_string(),
    })
}

/// Open an envelope sealed to the public key of `recipient_secret_key`.
///
/// # Errors
///
/// - `AuthenticationFailed`: wrong key, different AAD, or tampered envelope
/// - `UnsupportedVersion`: envelope from an unknown format version
pub fn open(
    recipient_secret_key: &[u8; KEY_LEN],
    envelope: &SealedEnvelope,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if envelope.format_version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(envelope.format_version));
    }

    let recipient_public_key = public_key_from_secret(recipient_secret_key);
    if envelope.key_id != key_id(&recipient_public_key) {
        return Err(CryptoError::AuthenticationFailed);
    }

    let shared = dh(recipient_secret_key, &envelope.ephemeral_public_key)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let key = envelope_key(
        &shared,
        &envelope.ephemeral_public_key,
        &recipient_public_key,
        &envelope.purpose,
    );

    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(
            XNonce::from_slice(&envelope.nonce),
            Payload { msg: &envelope.ciphertext, aad },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Check whether `candidate` decodes as a sealed envelope of a known version.
pub fn is_sealed_envelope(candidate: &[u8]) -> bool {
    SealedEnvelope::from_bytes(candidate).is_ok()
}

fn envelope_key(
    shared: &[u8; KEY_LEN],
    ephemeral_public_key: &[u8; KEY_LEN],
    recipient_public_key: &[u8; KEY_LEN],
    purpose: &str,
) -> Zeroizing<[u8; KEY_LEN]> {
    // info: epk || rpk || purpose
    let mut info = Vec::with_capacity(2 * KEY_LEN + purpose.len());
    info.extend_from_slice(ephemeral_public_key);
    info.extend_from_slice(recipient_public_key);
    info.extend_from_slice(purpose.as_bytes());

    Zeroizing::new(derive_key(shared, SEAL_SALT, &info))
}

fn key_id(public_key: &[u8; KEY_LEN]) -> [u8; KEY_ID_LEN] {
    let digest = Sha256::digest(public_key);
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&digest[..KEY_ID_LEN]);
    id
}
