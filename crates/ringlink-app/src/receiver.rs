//! Secure key handoff, consumer side.
//!
//! The consumer creates a [`HandoffRequest`] (a fresh ephemeral X25519
//! keypair bound to its device id), sends the identity holder to
//! [`HandoffRequest::to_deeplink`], and hands the returning callback to
//! [`HandoffReceiver::receive`]. The envelope is fetched, opened with the
//! ephemeral secret, validated and deleted from the store. The payload then
//! seeds a client [`NoiseManager`](ringlink_core::NoiseManager) through
//! [`seed_manager`].

use std::sync::Arc;

use ringlink_core::{EntropyError, Environment, ManagerId, ManagerRole, NoiseConfig, SessionRegistry};
use ringlink_crypto::{KEY_LEN, SealedEnvelope, generate_keypair, open};
use url::form_urlencoded;
use zeroize::Zeroizing;

use crate::{
    callback::HandoffCallback,
    classifier::DEEPLINK_SCHEME,
    config::{HandoffConfig, PollConfig},
    error::{ActionError, StoreError},
    handlers::bounded,
    pending::poll_rendezvous,
    protocol::HandoffPayload,
    services::DirectoryStore,
};

/// A handoff the consumer is waiting for.
pub struct HandoffRequest {
    ephemeral_secret: Zeroizing<[u8; KEY_LEN]>,
    ephemeral_public: [u8; KEY_LEN],
    device_id: String,
    include_epoch1: bool,
}

impl HandoffRequest {
    /// Create a request with a fresh ephemeral keypair.
    pub fn new<E: Environment>(env: &E, device_id: impl Into<String>, include_epoch1: bool) -> Result<Self, EntropyError> {
        let (ephemeral_secret, ephemeral_public) = generate_keypair(env.random_array()?);
        Ok(Self { ephemeral_secret, ephemeral_public, device_id: device_id.into(), include_epoch1 })
    }

    /// Ephemeral public key the envelope will be sealed to.
    pub fn ephemeral_public(&self) -> &[u8; KEY_LEN] {
        &self.ephemeral_public
    }

    /// Device id the keys will be bound to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// `ringlink://connect-handoff` link asking for this handoff.
    pub fn to_deeplink(&self, callback: &str) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("deviceId", &self.device_id)
            .append_pair("callback", callback)
            .append_pair("ephemeralPk", &hex::encode(self.ephemeral_public))
            .append_pair("includeEpoch1", if self.include_epoch1 { "true" } else { "false" })
            .finish();
        format!("{DEEPLINK_SCHEME}://connect-handoff?{query}")
    }
}

/// Fetches and opens handoff envelopes.
pub struct HandoffReceiver<E: Environment> {
    env: E,
    directory: Arc<dyn DirectoryStore>,
    config: HandoffConfig,
}

impl<E: Environment> HandoffReceiver<E> {
    /// Create a receiver reading from `directory`.
    pub fn new(env: E, directory: Arc<dyn DirectoryStore>, config: HandoffConfig) -> Self {
        Self { env, directory, config }
    }

    /// Complete `request` from the callback URL the identity holder opened.
    ///
    /// # Errors
    ///
    /// - `InvalidCallback` / `UnexpectedCallback` for a malformed callback
    /// - `Remote` if the envelope is missing or the store fails
    /// - `Crypto` if the envelope does not open under this request's key
    /// - `InvalidPayload` if the payload is stale, malformed or for another
    ///   owner or device
    pub async fn receive(&self, request: &HandoffRequest, callback_url: &str) -> Result<HandoffPayload, ActionError> {
        let callback = HandoffCallback::parse(callback_url)?;
        let path = self.config.handoff_path(&callback.request_id);

        let body = bounded(self.config.network_timeout, "fetch handoff", self.directory.get(&callback.owner_identity, &path))
            .await?
            .ok_or_else(|| ActionError::remote("fetch handoff", &StoreError::NotFound(path.clone())))?;

        let payload = self.open_envelope(request, &callback, &body).await?;
        self.discard(&callback.owner_identity, &path).await;
        Ok(payload)
    }

    /// Poll the store until the envelope for `callback` appears, then open
    /// it. For handoffs where the callback reached the consumer before the
    /// envelope write completed.
    pub async fn await_handoff(
        &self,
        request: &HandoffRequest,
        callback: &HandoffCallback,
        poll: &PollConfig,
    ) -> Result<HandoffPayload, ActionError> {
        let path = self.config.handoff_path(&callback.request_id);
        let owner = callback.owner_identity.as_str();

        let body = poll_rendezvous(&self.env, poll, || {
            bounded(self.config.network_timeout, "fetch handoff", self.directory.get(owner, &path))
        })
        .await?;

        let payload = self.open_envelope(request, callback, &body).await?;
        self.discard(owner, &path).await;
        Ok(payload)
    }

    async fn open_envelope(
        &self,
        request: &HandoffRequest,
        callback: &HandoffCallback,
        body: &[u8],
    ) -> Result<HandoffPayload, ActionError> {
        let envelope = SealedEnvelope::from_bytes(body)?;
        let path = self.config.handoff_path(&callback.request_id);
        let aad = self.config.handoff_aad(&callback.owner_identity, &path, &callback.request_id);
        let secret = request.ephemeral_secret.clone();

        let plaintext = tokio::task::spawn_blocking(move || open(&secret, &envelope, aad.as_bytes()))
            .await
            .map_err(|_| ActionError::InvalidPayload("envelope worker failed".to_string()))??;

        let payload = HandoffPayload::from_json(&plaintext)?;
        payload.validate(self.env.wall_clock_millis(), self.config.expiry.as_millis() as u64)?;
        if payload.owner_identity != callback.owner_identity {
            return Err(ActionError::InvalidPayload("owner mismatch".to_string()));
        }
        if payload.device_id != request.device_id {
            return Err(ActionError::InvalidPayload("device mismatch".to_string()));
        }
        if request.include_epoch1 && payload.keypair(1).is_none() {
            return Err(ActionError::InvalidPayload("missing epoch 1 keypair".to_string()));
        }

        tracing::debug!(request_id = %callback.request_id, "handoff opened");
        Ok(payload)
    }

    /// Envelopes are read once; a failed delete leaves it to expire.
    async fn discard(&self, owner: &str, path: &str) {
        if let Err(e) = bounded(self.config.network_timeout, "delete handoff", self.directory.delete(owner, path)).await {
            tracing::warn!(error = %e, "failed to delete handoff envelope");
        }
    }
}

/// Create a manager whose static key is the payload's epoch 0 secret.
pub fn seed_manager<E: Environment>(
    registry: &SessionRegistry<E>,
    payload: &HandoffPayload,
    role: ManagerRole,
    config: NoiseConfig,
) -> Result<ManagerId, ActionError> {
    let keypair = payload
        .keypair(0)
        .ok_or_else(|| ActionError::InvalidPayload("missing epoch 0 keypair".to_string()))?;
    let key_id = format!("{}:0", payload.owner_identity);
    Ok(registry.create_manager(role, keypair.secret_key, &key_id, &payload.device_id, config)?)
}
