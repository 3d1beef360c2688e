//! Typed action requests.
//!
//! An [`ActionRequest`] is produced only by
//! [`classify`](crate::classifier::classify) and is immutable afterwards.
//! Parameter structs are `#[non_exhaustive]` so other crates can read them
//! but not build them.

use std::fmt;

use serde::{Serialize, Serializer};
use zeroize::Zeroizing;

/// Where the raw input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputSource {
    /// Opened through a registered deep link
    Deeplink,
    /// Scanned QR code
    Scan,
    /// Pasted text
    Clipboard,
}

/// Closed set of action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Authorize an app through a `ringauth:` URL
    Auth,
    /// Import an identity from a recovery phrase or secret key
    Import,
    /// Create an identity and sign up at a homeserver
    Signup,
    /// Sign up the active identity with an invite code
    Invite,
    /// Return a public profile to the caller
    GetProfile,
    /// Return the active identity's follows to the caller
    GetFollows,
    /// Hand session material to a consumer app
    ConnectHandoff,
    /// Sign a message with the identity key
    SignMessage,
    /// Anything else
    Unknown,
}

impl ActionKind {
    /// True if handling this kind needs an active identity.
    pub const fn requires_identity(self) -> bool {
        match self {
            Self::Auth
            | Self::Invite
            | Self::GetProfile
            | Self::GetFollows
            | Self::ConnectHandoff
            | Self::SignMessage => true,
            Self::Import | Self::Signup | Self::Unknown => false,
        }
    }

    /// True if handling this kind talks to the network.
    pub const fn requires_network(self) -> bool {
        match self {
            Self::Auth
            | Self::Signup
            | Self::Invite
            | Self::GetProfile
            | Self::GetFollows
            | Self::ConnectHandoff => true,
            Self::Import | Self::SignMessage | Self::Unknown => false,
        }
    }

    /// Link action name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Import => "import",
            Self::Signup => "signup",
            Self::Invite => "invite",
            Self::GetProfile => "get-profile",
            Self::GetFollows => "get-follows",
            Self::ConnectHandoff => "connect-handoff",
            Self::SignMessage => "sign-message",
            Self::Unknown => "unknown",
        }
    }
}

/// A string that must not leak: zeroized on drop, redacted from `Debug` and
/// serialized output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// The secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

/// Authorization request for an app reachable through a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct AuthParams {
    /// Normalized `ringauth:` URL; carries the channel secret
    pub url: SecretString,
    /// Relay the grant is delivered through
    pub relay: String,
    /// Channel secret shared with the requesting app
    pub secret: SecretString,
    /// Requested capabilities
    pub capabilities: Vec<String>,
}

/// Identity import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct ImportParams {
    /// Recovery phrase or 64 hex character secret key
    pub secret: SecretString,
}

/// Identity creation and homeserver signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct SignupParams {
    /// Homeserver to sign up at
    pub homeserver: String,
    /// Signup token issued by the homeserver
    pub signup_token: SecretString,
    /// Relay for the follow-up authorization
    pub relay: String,
    /// Channel secret for the follow-up authorization
    pub secret: SecretString,
    /// Capabilities for the follow-up authorization
    pub capabilities: Vec<String>,
}

/// Invite code redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct InviteParams {
    /// `XXXX-XXXX-XXXX`, uppercase
    pub code: String,
}

/// Profile lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct ProfileParams {
    /// Identity whose profile is read
    pub pubkey: String,
    /// Where the result is sent
    pub callback: String,
    /// App namespace override
    pub app: Option<String>,
}

/// Follows lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct FollowsParams {
    /// Where the result is sent
    pub callback: String,
    /// App namespace override
    pub app: Option<String>,
}

/// Secure handoff request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct HandoffParams {
    /// Consumer device the material is bound to
    pub device_id: String,
    /// Where the reference is sent
    pub callback: String,
    /// Consumer ephemeral X25519 public key, 64 hex chars when present
    pub ephemeral_pk: Option<String>,
    /// Also ship the epoch 1 keypair
    pub include_epoch1: bool,
}

/// Message signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct SignParams {
    /// Text to sign, as UTF-8
    pub message: String,
    /// Where the signature is sent
    pub callback: String,
}

/// Kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ActionParams {
    /// See [`AuthParams`]
    Auth(AuthParams),
    /// See [`ImportParams`]
    Import(ImportParams),
    /// See [`SignupParams`]
    Signup(SignupParams),
    /// See [`InviteParams`]
    Invite(InviteParams),
    /// See [`ProfileParams`]
    GetProfile(ProfileParams),
    /// See [`FollowsParams`]
    GetFollows(FollowsParams),
    /// See [`HandoffParams`]
    ConnectHandoff(HandoffParams),
    /// See [`SignParams`]
    SignMessage(SignParams),
    /// Input that matched nothing
    Unknown {
        /// Trimmed input
        raw: SecretString,
    },
}

impl ActionParams {
    /// Kind of these parameters.
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Auth(_) => ActionKind::Auth,
            Self::Import(_) => ActionKind::Import,
            Self::Signup(_) => ActionKind::Signup,
            Self::Invite(_) => ActionKind::Invite,
            Self::GetProfile(_) => ActionKind::GetProfile,
            Self::GetFollows(_) => ActionKind::GetFollows,
            Self::ConnectHandoff(_) => ActionKind::ConnectHandoff,
            Self::SignMessage(_) => ActionKind::SignMessage,
            Self::Unknown { .. } => ActionKind::Unknown,
        }
    }
}

/// A classified input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRequest {
    #[serde(flatten)]
    params: ActionParams,
    source: InputSource,
}

impl ActionRequest {
    pub(crate) fn new(params: ActionParams, source: InputSource) -> Self {
        Self { params, source }
    }

    /// Action kind.
    pub fn kind(&self) -> ActionKind {
        self.params.kind()
    }

    /// Kind-specific parameters.
    pub fn params(&self) -> &ActionParams {
        &self.params
    }

    /// Where the input came from.
    pub fn source(&self) -> InputSource {
        self.source
    }
}
