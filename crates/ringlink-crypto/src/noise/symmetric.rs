//! Chaining key and handshake hash

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::cipher::CipherState;
use crate::{CryptoError, keys::KEY_LEN};

/// Hash output length (SHA-256)
pub(crate) const HASH_LEN: usize = 32;

/// Full protocol name, mixed into the initial handshake hash
pub(crate) const PROTOCOL_NAME: &str = "Noise_IK_25519_ChaChaPoly_SHA256";

#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SymmetricState {
    cipher: CipherState,
    ck: [u8; HASH_LEN],
    h: [u8; HASH_LEN],
}

impl SymmetricState {
    /// Names up to `HASH_LEN` bytes are zero-padded, longer ones hashed.
    pub(crate) fn initialize(protocol_name: &str) -> Self {
        let name = protocol_name.as_bytes();
        let h = if name.len() <= HASH_LEN {
            let mut h = [0u8; HASH_LEN];
            h[..name.len()].copy_from_slice(name);
            h
        } else {
            let mut h = [0u8; HASH_LEN];
            h.copy_from_slice(&Sha256::digest(name));
            h
        };

        Self { cipher: CipherState::empty(), ck: h, h }
    }

    /// `(ck, k) = HKDF(ck, ikm)`, then install `k`.
    pub(crate) fn mix_key(&mut self, input_key_material: &[u8]) {
        let (ck, key) = hkdf2(&self.ck, input_key_material);
        self.ck = *ck;
        self.cipher.initialize_key(*key);
    }

    /// `h = SHA256(h || data)`
    pub(crate) fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(data);
        self.h.copy_from_slice(&hasher.finalize());
    }

    pub(crate) fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = self.cipher.encrypt_with_ad(&self.h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// The hash before mixing is the AD.
    pub(crate) fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let plaintext = self.cipher.decrypt_with_ad(&self.h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Derive the two transport keys and the final handshake hash.
    pub(crate) fn split(&self) -> (Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; KEY_LEN]>, [u8; HASH_LEN]) {
        let (k1, k2) = hkdf2(&self.ck, &[]);
        (k1, k2, self.h)
    }

    pub(crate) fn handshake_hash(&self) -> &[u8; HASH_LEN] {
        &self.h
    }
}

/// Noise `HKDF(ck, ikm, 2)`, which is RFC 5869 HKDF with `salt = ck` and
/// empty info, expanded to two blocks.
fn hkdf2(chaining_key: &[u8; HASH_LEN], ikm: &[u8]) -> (Zeroizing<[u8; HASH_LEN]>, Zeroizing<[u8; HASH_LEN]>) {
    let hkdf = Hkdf::<Sha256>::new(Some(chaining_key), ikm);

    let mut okm = Zeroizing::new([0u8; 2 * HASH_LEN]);
    let Ok(()) = hkdf.expand(&[], okm.as_mut_slice()) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut first = Zeroizing::new([0u8; HASH_LEN]);
    let mut second = Zeroizing::new([0u8; HASH_LEN]);
    first.copy_from_slice(&okm[..HASH_LEN]);
    second.copy_from_slice(&okm[HASH_LEN..]);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_name_fits_hash_len() {
        assert_eq!(PROTOCOL_NAME.len(), HASH_LEN);
        let state = SymmetricState::initialize(PROTOCOL_NAME);
        assert_eq!(state.handshake_hash(), PROTOCOL_NAME.as_bytes());
    }

    #[test]
    fn long_names_are_hashed() {
        let name = "Noise_IK_25519_ChaChaPoly_SHA256_with_a_suffix";
        let state = SymmetricState::initialize(name);
        assert_eq!(state.handshake_hash().as_slice(), Sha256::digest(name.as_bytes()).as_slice());
    }

    #[test]
    fn hash_before_key_is_plaintext() {
        let mut state = SymmetricState::initialize(PROTOCOL_NAME);
        assert_eq!(state.encrypt_and_hash(b"clear").unwrap(), b"clear");
    }

    #[test]
    fn mirrored_states_agree() {
        let mut a = SymmetricState::initialize(PROTOCOL_NAME);
        let mut b = SymmetricState::initialize(PROTOCOL_NAME);
        a.mix_hash(b"prologue");
        b.mix_hash(b"prologue");
        a.mix_key(b"shared");
        b.mix_key(b"shared");

        let ct = a.encrypt_and_hash(b"payload").unwrap();
        assert_eq!(b.decrypt_and_hash(&ct).unwrap(), b"payload");
        assert_eq!(a.handshake_hash(), b.handshake_hash());

        let (a1, a2, ah) = a.split();
        let (b1, b2, bh) = b.split();
        assert_eq!(*a1, *b1);
        assert_eq!(*a2, *b2);
        assert_ne!(*a1, *a2);
        assert_eq!(ah, bh);
    }
}
