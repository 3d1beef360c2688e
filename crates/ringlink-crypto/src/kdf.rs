//! Key derivation using HKDF-SHA256
//!
//! Noise keypairs are derived in two steps so that the consumer app can
//! continue the schedule on its own:
//!
//! ```text
//! noise_seed    = HKDF(long_term_secret, salt = SEED_SALT,  info = device_id)
//! keypair(e)    = HKDF(noise_seed,       salt = EPOCH_SALT, info = e as u32 BE)
//! ```
//!
//! The identity holder ships `noise_seed` alongside the epoch 0 (and
//! optionally epoch 1) keypairs. Keypairs for later epochs derived by the
//! consumer from the seed match what the identity holder would derive.

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keys::{KEY_LEN, public_key_from_secret};

/// Salt for the per-device Noise seed
const SEED_SALT: &[u8] = b"ringlink-noise-seed-v1";

/// Salt for per-epoch keypairs derived from a Noise seed
const EPOCH_SALT: &[u8] = b"ringlink-noise-epoch-v1";

/// Derive 32 bytes from `seed` with HKDF-SHA256.
///
/// `salt` provides domain separation between uses of the same seed, `info`
/// binds the output to its context. Deterministic: same inputs always
/// produce the same output.
pub fn derive_key(seed: &[u8], salt: &[u8], info: &[u8]) -> [u8; KEY_LEN] {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), seed);

    let mut okm = [0u8; KEY_LEN];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    okm
}

/// Derive the per-device Noise seed from the long-term secret.
pub fn derive_noise_seed(long_term_secret: &[u8], device_id: &str) -> [u8; KEY_LEN] {
    derive_key(long_term_secret, SEED_SALT, device_id.as_bytes())
}

/// Derive the Noise static keypair for `epoch` of `device_id`.
pub fn derive_noise_keypair(long_term_secret: &[u8], device_id: &str, epoch: u32) -> NoiseKeypair {
    let mut seed = derive_noise_seed(long_term_secret, device_id);
    let keypair = NoiseKeypair::from_seed(&seed, epoch);
    seed.zeroize();
    keypair
}

/// An X25519 keypair bound to a key-rotation epoch.
///
/// The secret half is zeroized on drop and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NoiseKeypair {
    /// Key-rotation generation
    #[zeroize(skip)]
    pub epoch: u32,
    /// X25519 public key
    #[zeroize(skip)]
    pub public_key: [u8; KEY_LEN],
    /// X25519 secret key (unclamped scalar bytes)
    pub secret_key: [u8; KEY_LEN],
}

impl NoiseKeypair {
    /// Derive the keypair for `epoch` from a per-device Noise seed.
    pub fn from_seed(noise_seed: &[u8; KEY_LEN], epoch: u32) -> Self {
        let secret_key = derive_key(noise_seed, EPOCH_SALT, &epoch.to_be_bytes());
        let public_key = public_key_from_secret(&secret_key);
        Self { epoch, public_key, secret_key }
    }
}

impl fmt::Debug for NoiseKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseKeypair")
            .field("epoch", &self.epoch)
            .field("public_key", &hex::encode(self.public_key))
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8; 32] = b"long_term_secret_material_here!!";

    #[test]
    fn derive_is_deterministic() {
        let a = derive_key(SECRET, b"salt", b"info");
        let b = derive_key(SECRET, b"salt", b"info");
        assert_eq!(a, b, "same inputs must produce same output");
    }

    #[test]
    fn salt_and_info_separate_domains() {
        let base = derive_key(SECRET, b"salt", b"info");
        assert_ne!(base, derive_key(SECRET, b"other", b"info"));
        assert_ne!(base, derive_key(SECRET, b"salt", b"other"));
    }

    #[test]
    fn different_epochs_produce_different_keypairs() {
        let epoch_0 = derive_noise_keypair(SECRET, "device123", 0);
        let epoch_1 = derive_noise_keypair(SECRET, "device123", 1);

        assert_ne!(epoch_0.secret_key, epoch_1.secret_key);
        assert_ne!(epoch_0.public_key, epoch_1.public_key);
        assert_eq!(epoch_0.epoch, 0);
        assert_eq!(epoch_1.epoch, 1);
    }

    #[test]
    fn different_devices_produce_different_keypairs() {
        let a = derive_noise_keypair(SECRET, "device-a", 0);
        let b = derive_noise_keypair(SECRET, "device-b", 0);
        assert_ne!(a.public_key, b.public_key);
    }

    #[test]
    fn seed_continues_the_epoch_schedule() {
        let seed = derive_noise_seed(SECRET, "device123");

        for epoch in [0, 1, 2, 17, u32::MAX] {
            let holder_side = derive_noise_keypair(SECRET, "device123", epoch);
            let consumer_side = NoiseKeypair::from_seed(&seed, epoch);
            assert_eq!(holder_side, consumer_side, "epoch {epoch} diverged");
        }
    }

    #[test]
    fn seed_is_not_an_epoch_secret() {
        let seed = derive_noise_seed(SECRET, "device123");
        let epoch_0 = derive_noise_keypair(SECRET, "device123", 0);
        assert_ne!(seed, epoch_0.secret_key);
    }

    #[test]
    fn public_key_matches_secret() {
        let kp = derive_noise_keypair(SECRET, "device123", 0);
        assert_eq!(kp.public_key, public_key_from_secret(&kp.secret_key));
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = derive_noise_keypair(SECRET, "device123", 0);
        let rendered = format!("{kp:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains(&hex::encode(kp.secret_key)));
    }

    #[test]
    fn works_with_empty_device_id() {
        let kp = derive_noise_keypair(SECRET, "", 0);
        assert_eq!(kp.public_key.len(), 32);
    }
}
