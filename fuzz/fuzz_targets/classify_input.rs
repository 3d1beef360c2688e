//! Fuzz target for input classification
//!
//! Raw input arrives from QR codes, the clipboard and other apps. The
//! classifier must never panic, and anything it does not understand must
//! come back as `unknown` rather than a half-filled action.
//!
//! # Invariants
//!
//! - `classify` never panics for any UTF-8 input and any source
//! - `unknown` requests require neither identity nor network
//! - handoff callback parsing never panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ringlink_app::{ActionKind, HandoffCallback, InputSource, classify, normalize};

#[derive(Debug, Arbitrary)]
enum SourceChoice {
    Deeplink,
    Scan,
    Clipboard,
}

#[derive(Debug, Arbitrary)]
struct Input {
    source: SourceChoice,
    prefix: Option<PrefixChoice>,
    body: String,
}

#[derive(Debug, Arbitrary)]
enum PrefixChoice {
    Deeplink,
    Auth,
    WrappedAuth,
    Encoded,
}

fuzz_target!(|input: Input| {
    let source = match input.source {
        SourceChoice::Deeplink => InputSource::Deeplink,
        SourceChoice::Scan => InputSource::Scan,
        SourceChoice::Clipboard => InputSource::Clipboard,
    };
    let prefix = match input.prefix {
        Some(PrefixChoice::Deeplink) => "ringlink://",
        Some(PrefixChoice::Auth) => "ringauth:///",
        Some(PrefixChoice::WrappedAuth) => "ringlink://ringauth///",
        Some(PrefixChoice::Encoded) => "ringlink%3A%2F%2F",
        None => "",
    };
    let raw = format!("{prefix}{}", input.body);

    let _ = normalize(&raw);
    let request = classify(&raw, source);
    assert_eq!(request.source(), source);
    if request.kind() == ActionKind::Unknown {
        assert!(!request.kind().requires_identity());
        assert!(!request.kind().requires_network());
    }

    let _ = HandoffCallback::parse(&raw);
});
