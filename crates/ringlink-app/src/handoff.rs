//! Secure key handoff, identity holder side.
//!
//! ```text
//! validate ─> establish session ─> load secret ─> derive epoch keys + seed
//!          ─> payload ─> request id ─> seal to ephemeral key ─> store write
//!          ─> publish endpoint record (best effort) ─> callback with reference
//! ```
//!
//! The callback carries only `ownerIdentity`, `request_id` and `mode`. The
//! consumer fetches the envelope from the store and is the only party able
//! to open it. Nothing is written before the envelope itself, and there is
//! no unsealed fallback.

use ringlink_core::Environment;
use ringlink_crypto::{KEY_LEN, NONCE_LEN, decode_key_hex, derive_noise_keypair, derive_noise_seed, seal};
use zeroize::Zeroizing;

use crate::{
    action::{ActionKind, HandoffParams},
    callback::{HandoffCallback, validate_callback},
    error::ActionError,
    handlers::HandlerContext,
    protocol::{
        ENDPOINT_RECORD_VERSION, HANDOFF_PURPOSE, HandoffPayload, NoiseEndpointRecord, PAYLOAD_VERSION,
        PayloadKeypair, RequestId,
    },
    services::DispatchEvent,
};

/// Capabilities requested for the session shipped to the consumer.
fn session_capabilities(namespace: &str) -> Vec<String> {
    vec![format!("/{namespace}/:rw")]
}

pub(crate) async fn secure_handoff<E: Environment>(
    ctx: &HandlerContext<'_, E>,
    params: &HandoffParams,
) -> Result<RequestId, ActionError> {
    let owner = ctx.identity()?;
    validate_callback(&params.callback)?;
    let ephemeral_pk = params.ephemeral_pk.as_deref().ok_or(ActionError::MissingEphemeralKey)?;
    let recipient = decode_key_hex(ephemeral_pk).map_err(|_| ActionError::InvalidEphemeralKey)?;

    let capabilities = session_capabilities(&ctx.config.namespace);
    let session = ctx.bounded("establish session", ctx.services.homeserver.establish(owner, &capabilities)).await?;

    let secret = ctx.identity_secret().await?;

    let epochs: &[u32] = if params.include_epoch1 { &[0, 1] } else { &[0] };
    let noise_keypairs: Vec<PayloadKeypair> = epochs
        .iter()
        .map(|&epoch| PayloadKeypair::from(&derive_noise_keypair(&*secret, &params.device_id, epoch)))
        .collect();
    let noise_seed = Zeroizing::new(derive_noise_seed(&*secret, &params.device_id));

    let created_at = ctx.env.wall_clock_millis();
    let payload = HandoffPayload {
        version: PAYLOAD_VERSION,
        owner_identity: owner.to_string(),
        session_secret: session.session_secret.to_string(),
        capabilities: session.capabilities.clone(),
        device_id: params.device_id.clone(),
        noise_keypairs,
        noise_seed: *noise_seed,
        created_at,
        expires_at: created_at + ctx.config.expiry.as_millis() as u64,
    };
    let endpoint_public = payload.keypair(0).map(|k| k.public_key);
    let plaintext = Zeroizing::new(payload.to_json()?);
    drop(payload);

    let request_id = RequestId::generate(ctx.env)?;
    let ephemeral_secret = ctx.env.random_array::<KEY_LEN>()?;
    let nonce = ctx.env.random_array::<NONCE_LEN>()?;

    let path = ctx.config.handoff_path(&request_id);
    let aad = ctx.config.handoff_aad(owner, &path, &request_id);

    let envelope = tokio::task::spawn_blocking(move || {
        seal(&recipient, &plaintext, aad.as_bytes(), HANDOFF_PURPOSE, ephemeral_secret, nonce)
    })
    .await
    .map_err(|_| ActionError::HandlerCrashed { kind: ActionKind::ConnectHandoff })??;
    let body = envelope.to_bytes()?;

    ctx.bounded("store handoff", ctx.services.directory.put(owner, &path, body)).await?;
    tracing::debug!(%request_id, device_id = %params.device_id, "handoff envelope stored");
    ctx.sink.emit(DispatchEvent::HandoffDelivered { identity: owner.to_string(), request_id: request_id.to_string() });

    if let Some(public_key) = endpoint_public {
        publish_endpoint(ctx, owner, &params.device_id, public_key).await;
    }

    let url = HandoffCallback { owner_identity: owner.to_string(), request_id }.to_url(&params.callback)?;
    ctx.deliver_callback(url).await?;
    Ok(request_id)
}

/// Best-effort discovery record; failures are logged and ignored.
async fn publish_endpoint<E: Environment>(
    ctx: &HandlerContext<'_, E>,
    owner: &str,
    device_id: &str,
    public_key: [u8; KEY_LEN],
) {
    let record = NoiseEndpointRecord {
        version: ENDPOINT_RECORD_VERSION,
        owner_identity: owner.to_string(),
        device_id: device_id.to_string(),
        epoch: 0,
        public_key,
        updated_at: ctx.env.wall_clock_millis(),
    };
    let body = match serde_json::to_vec(&record) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode noise endpoint record");
            return;
        },
    };

    let path = ctx.config.noise_record_path();
    if let Err(e) = ctx.bounded("publish endpoint", ctx.services.directory.put(owner, &path, body)).await {
        tracing::warn!(error = %e, "failed to publish noise endpoint record");
    }
}
