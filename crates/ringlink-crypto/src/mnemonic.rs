//! Recognition and decoding of importable identity secrets
//!
//! Two forms are accepted: a BIP-39 recovery phrase of 12 or 24 words, and a
//! raw secret key as 64 hex characters.

use bip39::Mnemonic;
use zeroize::Zeroizing;

use crate::{
    CryptoError,
    keys::{KEY_LEN, decode_key_hex},
};

/// Word counts accepted as recovery phrases
const PHRASE_WORD_COUNTS: [usize; 2] = [12, 24];

/// True if `input` is a valid 12 or 24 word recovery phrase.
///
/// Whitespace is collapsed and case folded before validation; the checksum
/// word must be correct.
pub fn is_recovery_phrase(input: &str) -> bool {
    parse_phrase(input).is_ok()
}

/// True if `input` is exactly 64 hex characters.
pub fn is_secret_key_hex(input: &str) -> bool {
    let trimmed = input.trim();
    trimmed.len() == KEY_LEN * 2 && trimmed.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Derive the 32-byte identity secret from a recovery phrase.
///
/// The phrase is expanded with an empty passphrase; the first 32 bytes of
/// the BIP-39 seed become the secret.
pub fn secret_from_recovery_phrase(input: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mnemonic = parse_phrase(input)?;
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));

    let mut secret = Zeroizing::new([0u8; KEY_LEN]);
    secret.copy_from_slice(&seed[..KEY_LEN]);
    Ok(secret)
}

/// Decode an importable secret in either accepted form.
pub fn secret_from_import(input: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    if is_secret_key_hex(input) {
        return decode_key_hex(input.trim()).map(Zeroizing::new);
    }
    secret_from_recovery_phrase(input)
}

fn parse_phrase(input: &str) -> Result<Mnemonic, CryptoError> {
    let words: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();
    if !PHRASE_WORD_COUNTS.contains(&words.len()) {
        return Err(CryptoError::InvalidKeyEncoding);
    }
    Mnemonic::parse_normalized(&words.join(" ")).map_err(|_| CryptoError::InvalidKeyEncoding)
}
