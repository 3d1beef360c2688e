//! Input classification.
//!
//! Turns raw external input (deep links, scanned codes, pasted text) into an
//! [`ActionRequest`]. Classification never fails: input that matches no
//! parser becomes [`ActionParams::Unknown`].
//!
//! # Precedence
//!
//! ```text
//! normalize ─> signup ─> sign-message ─> connect-handoff ─> get-profile / get-follows
//!          ─> ringauth URL ─> invite link ─> bare invite code ─> import ─> unknown
//! ```
//!
//! Each parser falls through when a required parameter is missing or
//! malformed, so a broken signup link can still be recognized by a later
//! parser or end up as `Unknown`.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use ringlink_crypto::{is_recovery_phrase, is_secret_key_hex};
use url::Url;

use crate::action::{
    ActionParams, ActionRequest, AuthParams, FollowsParams, HandoffParams, ImportParams, InputSource,
    InviteParams, ProfileParams, SecretString, SignParams, SignupParams,
};

/// Scheme of ringlink deep links.
pub const DEEPLINK_SCHEME: &str = "ringlink";

/// Scheme of app authorization URLs.
pub const AUTH_SCHEME: &str = "ringauth";

/// Percent-decoding passes applied to wrapped input.
const MAX_DECODE_PASSES: usize = 3;

/// Words in a recovery phrase eligible for the lenient second pass.
const LENIENT_PHRASE_WORDS: usize = 12;

/// Classify `raw` input from `source`.
pub fn classify(raw: &str, source: InputSource) -> ActionRequest {
    let input = normalize(raw);

    let params = parse_structured(&input)
        .or_else(|| parse_import(&input))
        .unwrap_or_else(|| ActionParams::Unknown { raw: SecretString::new(raw.trim()) });

    tracing::debug!(kind = params.kind().name(), ?source, "input classified");
    ActionRequest::new(params, source)
}

/// Normalize raw input before parsing.
///
/// Trims, percent-decodes input that does not yet start with a known scheme
/// (at most three passes, stopping once decoding is idempotent), unwraps
/// `ringlink://ringauth:...` and repairs `ringauth///` to `ringauth:///`.
pub fn normalize(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_DECODE_PASSES {
        if has_known_scheme(&current) {
            break;
        }
        let Ok(decoded) = percent_decode_str(&current).decode_utf8() else {
            break;
        };
        let decoded = decoded.trim();
        if decoded == current {
            break;
        }
        current = decoded.to_string();
    }

    let wrapper = format!("{DEEPLINK_SCHEME}://");
    if starts_with_ignore_case(&current, &wrapper) && starts_with_ignore_case(&current[wrapper.len()..], AUTH_SCHEME) {
        current = current[wrapper.len()..].to_string();
    }

    let broken = format!("{AUTH_SCHEME}///");
    if starts_with_ignore_case(&current, &broken) {
        current = format!("{AUTH_SCHEME}:///{}", &current[broken.len()..]);
    }

    current
}

/// True if `candidate` is an invite code of the form `XXXX-XXXX-XXXX`
/// (letters and digits, any case).
pub fn is_invite_code(candidate: &str) -> bool {
    let groups: Vec<&str> = candidate.split('-').collect();
    groups.len() == 3 && groups.iter().all(|g| g.len() == 4 && g.bytes().all(|b| b.is_ascii_alphanumeric()))
}

fn has_known_scheme(input: &str) -> bool {
    [format!("{DEEPLINK_SCHEME}:"), format!("{AUTH_SCHEME}:"), format!("{AUTH_SCHEME}/")]
        .iter()
        .any(|prefix| starts_with_ignore_case(input, prefix))
}

fn starts_with_ignore_case(input: &str, prefix: &str) -> bool {
    input.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Parsed URL view shared by the structured parsers.
struct Link {
    scheme: String,
    action: String,
    rest: String,
    query: HashMap<String, String>,
}

impl Link {
    fn parse(input: &str) -> Option<Self> {
        let url = Url::parse(input).ok()?;

        let path = url.path().trim_start_matches('/');
        let (action, rest) = match url.host_str().filter(|h| !h.is_empty()) {
            Some(host) => (host.to_ascii_lowercase(), path.to_string()),
            None => {
                let (head, tail) = path.split_once('/').unwrap_or((path, ""));
                (head.to_ascii_lowercase(), tail.to_string())
            },
        };

        let mut query = HashMap::new();
        for (key, value) in url.query_pairs() {
            query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }

        Some(Self { scheme: url.scheme().to_string(), action, rest, query })
    }

    fn is_action(&self, action: &str) -> bool {
        self.scheme == DEEPLINK_SCHEME && self.action == action
    }

    /// Parameter value, treating blank values as absent.
    fn param(&self, name: &str) -> Option<String> {
        self.query.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
    }

    fn capabilities(&self) -> Option<Vec<String>> {
        let caps = self.query.get("caps")?;
        Some(caps.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_string).collect())
    }
}

fn parse_structured(input: &str) -> Option<ActionParams> {
    let link = Link::parse(input);
    let link = link.as_ref();

    link.and_then(parse_signup)
        .or_else(|| link.and_then(parse_sign_message))
        .or_else(|| link.and_then(parse_handoff))
        .or_else(|| link.and_then(parse_lookup))
        .or_else(|| link.and_then(|l| parse_auth(l, input)))
        .or_else(|| link.and_then(parse_invite_link))
        .or_else(|| parse_invite_code(input))
}

fn parse_signup(link: &Link) -> Option<ActionParams> {
    if !link.is_action("signup") {
        return None;
    }
    Some(ActionParams::Signup(SignupParams {
        homeserver: link.param("hs")?,
        signup_token: SecretString::new(link.param("st")?),
        relay: link.param("relay")?,
        secret: SecretString::new(link.param("secret")?),
        capabilities: link.capabilities()?,
    }))
}

fn parse_sign_message(link: &Link) -> Option<ActionParams> {
    if !link.is_action("sign-message") {
        return None;
    }
    Some(ActionParams::SignMessage(SignParams {
        message: link.query.get("message").filter(|m| !m.is_empty())?.clone(),
        callback: link.param("callback")?,
    }))
}

fn parse_handoff(link: &Link) -> Option<ActionParams> {
    if !link.is_action("connect-handoff") {
        return None;
    }

    let ephemeral_pk = match link.param("ephemeralPk") {
        Some(key) if key.len() == 64 && key.bytes().all(|b| b.is_ascii_hexdigit()) => Some(key.to_ascii_lowercase()),
        Some(_) => return None,
        None => None,
    };
    let include_epoch1 = match link.param("includeEpoch1").as_deref() {
        Some("false" | "0") => false,
        _ => true,
    };

    Some(ActionParams::ConnectHandoff(HandoffParams {
        device_id: link.param("deviceId")?,
        callback: link.param("callback")?,
        ephemeral_pk,
        include_epoch1,
    }))
}

fn parse_lookup(link: &Link) -> Option<ActionParams> {
    if link.is_action("get-profile") {
        return Some(ActionParams::GetProfile(ProfileParams {
            pubkey: link.param("pubkey")?,
            callback: link.param("callback")?,
            app: link.param("app"),
        }));
    }
    if link.is_action("get-follows") {
        return Some(ActionParams::GetFollows(FollowsParams {
            callback: link.param("callback")?,
            app: link.param("app"),
        }));
    }
    None
}

fn parse_auth(link: &Link, input: &str) -> Option<ActionParams> {
    if link.scheme != AUTH_SCHEME {
        return None;
    }
    Some(ActionParams::Auth(AuthParams {
        url: SecretString::new(input),
        relay: link.param("relay")?,
        secret: SecretString::new(link.param("secret")?),
        capabilities: link.capabilities().unwrap_or_default(),
    }))
}

fn parse_invite_link(link: &Link) -> Option<ActionParams> {
    if !link.is_action("invite") {
        return None;
    }
    let from_path = link.rest.trim_end_matches('/');
    let code = link.param("code").unwrap_or_else(|| from_path.to_string());
    is_invite_code(&code).then(|| ActionParams::Invite(InviteParams { code: code.to_ascii_uppercase() }))
}

fn parse_invite_code(input: &str) -> Option<ActionParams> {
    is_invite_code(input).then(|| ActionParams::Invite(InviteParams { code: input.to_ascii_uppercase() }))
}

fn parse_import(input: &str) -> Option<ActionParams> {
    if is_secret_key_hex(input) || is_recovery_phrase(input) {
        return Some(ActionParams::Import(ImportParams { secret: SecretString::new(input.trim()) }));
    }

    // Pasted phrases often arrive numbered or comma separated
    let words: Vec<String> = input
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    if words.len() != LENIENT_PHRASE_WORDS {
        return None;
    }
    let candidate = words.join(" ");
    is_recovery_phrase(&candidate).then(|| ActionParams::Import(ImportParams { secret: SecretString::new(candidate) }))
}
