//! Key handling: X25519 agreement keys and the Ed25519 identity key

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::CryptoError;

/// Length of every raw key handled by this crate (X25519 and Ed25519 seeds)
pub const KEY_LEN: usize = 32;

/// X25519 public key for a secret scalar.
pub fn public_key_from_secret(secret: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*secret);
    PublicKey::from(&secret).to_bytes()
}

/// Build an X25519 keypair from caller-provided random bytes.
///
/// Returns `(secret, public)`. The caller MUST supply output of a CSPRNG.
pub fn generate_keypair(random: [u8; KEY_LEN]) -> (Zeroizing<[u8; KEY_LEN]>, [u8; KEY_LEN]) {
    let public = public_key_from_secret(&random);
    (Zeroizing::new(random), public)
}

/// Decode a 64-character hex string into a 32-byte key.
///
/// Upper and lower case are both accepted.
pub fn decode_key_hex(encoded: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    if encoded.len() != KEY_LEN * 2 {
        return Err(CryptoError::InvalidKeyLength { expected: KEY_LEN, actual: encoded.len() / 2 });
    }

    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(encoded, &mut key).map_err(|_| CryptoError::InvalidKeyEncoding)?;
    Ok(key)
}

/// X25519 Diffie-Hellman, rejecting non-contributory (low-order) peer keys.
pub(crate) fn dh(
    secret: &[u8; KEY_LEN],
    peer_public: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let secret = StaticSecret::from(*secret);
    let shared = secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(CryptoError::BadPublicKey);
    }
    Ok(Zeroizing::new(shared.to_bytes()))
}

/// Long-term Ed25519 identity key.
///
/// The identity string (`ownerIdentity`) is the lowercase hex encoding of the
/// verifying key.
pub struct IdentityKey {
    signing: SigningKey,
}

impl IdentityKey {
    /// Load an identity from its 32-byte secret seed.
    pub fn from_secret(secret: &[u8; KEY_LEN]) -> Self {
        Self { signing: SigningKey::from_bytes(secret) }
    }

    /// Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Identity string: lowercase hex of the public key.
    pub fn identity(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Sign a message with the long-term key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey").field("identity", &self.identity()).finish()
    }
}

/// Verify an Ed25519 signature made by `identity`.
pub fn verify_signature(identity: &str, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public = decode_key_hex(identity)?;
    let verifying = VerifyingKey::from_bytes(&public).map_err(|_| CryptoError::BadPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::BadMessage)?;
    verifying.verify(message, &signature).map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_deterministic() {
        let secret = [7u8; KEY_LEN];
        assert_eq!(public_key_from_secret(&secret), public_key_from_secret(&secret));
    }

    #[test]
    fn generated_keypair_agrees_on_shared_secret() {
        let (a_secret, a_public) = generate_keypair([1u8; KEY_LEN]);
        let (b_secret, b_public) = generate_keypair([2u8; KEY_LEN]);

        let ab = dh(&a_secret, &b_public).unwrap();
        let ba = dh(&b_secret, &a_public).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn low_order_point_is_rejected() {
        let secret = [9u8; KEY_LEN];
        assert!(matches!(dh(&secret, &[0u8; KEY_LEN]), Err(CryptoError::BadPublicKey)));
    }

    #[test]
    fn decode_key_hex_checks_length_and_encoding() {
        assert_eq!(decode_key_hex(&"ab".repeat(32)).unwrap(), [0xAB; KEY_LEN]);
        assert_eq!(decode_key_hex(&"AB".repeat(32)).unwrap(), [0xAB; KEY_LEN]);
        assert!(matches!(
            decode_key_hex("abcd"),
            Err(CryptoError::InvalidKeyLength { expected: 32, .. })
        ));
        assert_eq!(decode_key_hex(&"zz".repeat(32)), Err(CryptoError::InvalidKeyEncoding));
    }

    #[test]
    fn identity_signatures_verify() {
        let identity = IdentityKey::from_secret(&[3u8; KEY_LEN]);
        let signature = identity.sign(b"hello");

        assert!(verify_signature(&identity.identity(), b"hello", &signature).is_ok());
        assert_eq!(
            verify_signature(&identity.identity(), b"hellO", &signature),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn identity_string_is_lowercase_hex() {
        let identity = IdentityKey::from_secret(&[3u8; KEY_LEN]).identity();
        assert_eq!(identity.len(), 64);
        assert!(identity.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
