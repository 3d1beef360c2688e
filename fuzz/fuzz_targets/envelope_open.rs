//! Fuzz target for sealed envelope decoding and opening
//!
//! Envelopes are fetched from a public store, so their bytes are attacker
//! controlled. Decoding and opening must fail cleanly.
//!
//! # Invariants
//!
//! - `SealedEnvelope::from_bytes` never panics
//! - opening a mutated envelope never succeeds
//! - payload JSON decoding never panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ringlink_app::HandoffPayload;
use ringlink_crypto::{SealedEnvelope, generate_keypair, open, seal};

const AAD: &[u8] = b"ringlink:v0:handoff:owner:/pub/ringlink.app/v0/handoff/id:id";

#[derive(Debug, Arbitrary)]
struct Input {
    raw: Vec<u8>,
    recipient_secret: [u8; 32],
    ephemeral_secret: [u8; 32],
    nonce: [u8; 24],
    plaintext: Vec<u8>,
    flip_at: usize,
}

fuzz_target!(|input: Input| {
    // Arbitrary bytes as an envelope
    if let Ok(envelope) = SealedEnvelope::from_bytes(&input.raw) {
        let _ = open(&input.recipient_secret, &envelope, AAD);
    }
    let _ = HandoffPayload::from_json(&input.raw);

    // A real envelope with one byte of ciphertext flipped
    let (recipient_secret, recipient_public) = generate_keypair(input.recipient_secret);
    let Ok(mut envelope) = seal(&recipient_public, &input.plaintext, AAD, "handoff", input.ephemeral_secret, input.nonce)
    else {
        return;
    };
    assert_eq!(open(&recipient_secret, &envelope, AAD).ok().as_deref().map(Vec::as_slice), Some(input.plaintext.as_slice()));

    let index = input.flip_at % envelope.ciphertext.len();
    envelope.ciphertext[index] ^= 0x01;
    assert!(open(&recipient_secret, &envelope, AAD).is_err());
});
