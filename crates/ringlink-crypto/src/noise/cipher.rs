//! `ChaCha20-Poly1305` with Noise nonce encoding
//!
//! Nonce layout: 4 zero bytes followed by the 64-bit counter, little-endian.
//! Counter `u64::MAX` is reserved for rekeying and never used for messages.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{CryptoError, keys::KEY_LEN};

/// Poly1305 tag size (16 bytes)
pub const TAG_LEN: usize = 16;

/// AEAD key plus message counter.
///
/// An unkeyed state passes data through unchanged, which only happens in the
/// first token of a handshake before any DH output has been mixed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct CipherState {
    key: Option<[u8; KEY_LEN]>,
    #[zeroize(skip)]
    nonce: u64,
}

impl CipherState {
    pub(crate) fn empty() -> Self {
        Self { key: None, nonce: 0 }
    }

    /// Keyed state resuming at `nonce`.
    pub(crate) fn with_nonce(key: [u8; KEY_LEN], nonce: u64) -> Self {
        Self { key: Some(key), nonce }
    }

    /// Install a fresh key and reset the counter.
    pub(crate) fn initialize_key(&mut self, key: [u8; KEY_LEN]) {
        self.key = Some(key);
        self.nonce = 0;
    }

    pub(crate) fn key(&self) -> Option<&[u8; KEY_LEN]> {
        self.key.as_ref()
    }

    /// Number of messages processed under this key schedule.
    pub(crate) fn nonce(&self) -> u64 {
        self.nonce
    }

    pub(crate) fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };
        if self.nonce == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }

        let ciphertext = encrypt(key, self.nonce, ad, plaintext);
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt and advance the counter. The counter is unchanged on failure.
    pub(crate) fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(ciphertext.to_vec());
        };
        if self.nonce == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::BadMessage);
        }

        let plaintext = decrypt(key, self.nonce, ad, ciphertext)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    /// `REKEY(k) = ENCRYPT(k, u64::MAX, "", zeros)[..32]`. Counter unchanged.
    pub(crate) fn rekey(&mut self) -> Result<(), CryptoError> {
        let Some(key) = &mut self.key else {
            return Err(CryptoError::WrongState);
        };

        let output = Zeroizing::new(encrypt(key, u64::MAX, &[], &[0u8; KEY_LEN]));
        key.copy_from_slice(&output[..KEY_LEN]);
        Ok(())
    }
}

fn make_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn encrypt(key: &[u8; KEY_LEN], counter: u64, ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let Ok(ciphertext) = cipher.encrypt(&Nonce::from(make_nonce(counter)), Payload { msg: plaintext, aad: ad })
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail for in-range lengths");
    };
    ciphertext
}

fn decrypt(key: &[u8; KEY_LEN], counter: u64, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(&Nonce::from(make_nonce(counter)), Payload { msg: ciphertext, aad: ad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];

    #[test]
    fn unkeyed_state_passes_through() {
        let mut cs = CipherState::empty();
        assert_eq!(cs.encrypt_with_ad(b"", b"hello").unwrap(), b"hello");
        assert_eq!(cs.decrypt_with_ad(b"", b"hello").unwrap(), b"hello");
        assert_eq!(cs.nonce(), 0);
    }

    #[test]
    fn counters_advance_in_lockstep() {
        let mut tx = CipherState::with_nonce(KEY, 0);
        let mut rx = CipherState::with_nonce(KEY, 0);

        for i in 0..5u64 {
            let ct = tx.encrypt_with_ad(b"ad", b"payload").unwrap();
            assert_eq!(rx.decrypt_with_ad(b"ad", &ct).unwrap(), b"payload");
            assert_eq!(tx.nonce(), i + 1);
            assert_eq!(rx.nonce(), i + 1);
        }
    }

    #[test]
    fn failed_decrypt_keeps_counter() {
        let mut tx = CipherState::with_nonce(KEY, 0);
        let mut rx = CipherState::with_nonce(KEY, 0);

        let mut ct = tx.encrypt_with_ad(b"", b"payload").unwrap();
        ct[0] ^= 1;
        assert_eq!(rx.decrypt_with_ad(b"", &ct), Err(CryptoError::AuthenticationFailed));
        assert_eq!(rx.nonce(), 0);
    }

    #[test]
    fn truncated_ciphertext_is_bad_message() {
        let mut rx = CipherState::with_nonce(KEY, 0);
        assert_eq!(rx.decrypt_with_ad(b"", &[0u8; 8]), Err(CryptoError::BadMessage));
    }

    #[test]
    fn reserved_nonce_is_never_used() {
        let mut tx = CipherState::with_nonce(KEY, u64::MAX);
        assert_eq!(tx.encrypt_with_ad(b"", b"x"), Err(CryptoError::NonceExhausted));
    }

    #[test]
    fn rekey_keeps_peers_in_agreement() {
        let mut tx = CipherState::with_nonce(KEY, 3);
        let mut rx = CipherState::with_nonce(KEY, 3);
        tx.rekey().unwrap();
        rx.rekey().unwrap();

        assert_ne!(tx.key(), Some(&KEY));
        assert_eq!(tx.nonce(), 3);

        let ct = tx.encrypt_with_ad(b"", b"after rekey").unwrap();
        assert_eq!(rx.decrypt_with_ad(b"", &ct).unwrap(), b"after rekey");
    }

    #[test]
    fn same_plaintext_differs_per_nonce() {
        let mut tx = CipherState::with_nonce(KEY, 0);
        let a = tx.encrypt_with_ad(b"", b"a").unwrap();
        let b = tx.encrypt_with_ad(b"", b"a").unwrap();
        assert_ne!(a, b);
    }
}
