//! Handlers for every action kind except the secure handoff.

use std::{future::Future, time::Duration};

use ringlink_core::Environment;
use ringlink_crypto::{IdentityKey, KEY_LEN, secret_from_import};
use url::Url;
use zeroize::Zeroizing;

use crate::{
    action::{AuthParams, FollowsParams, ImportParams, InviteParams, ProfileParams, SignParams, SignupParams},
    callback::{append_query, validate_callback},
    config::HandoffConfig,
    error::{ActionError, StoreError},
    services::{ActiveIdentity, DispatchEvent, EventSink, Services},
};

/// Everything a handler may touch.
pub(crate) struct HandlerContext<'a, E> {
    pub env: &'a E,
    pub services: &'a Services,
    pub config: &'a HandoffConfig,
    pub identity: Option<&'a ActiveIdentity>,
    pub sink: &'a dyn EventSink,
    pub is_deeplink_origin: bool,
}

impl<E: Environment> HandlerContext<'_, E> {
    pub fn identity(&self) -> Result<&str, ActionError> {
        self.identity.map(|i| i.identity.as_str()).ok_or(ActionError::NoActiveIdentity)
    }

    pub async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ActionError> {
        bounded(self.config.network_timeout, operation, call).await
    }

    /// Open `url`, or hand it to the host when the request did not come
    /// from a deep link.
    pub async fn deliver_callback(&self, url: String) -> Result<(), ActionError> {
        if self.is_deeplink_origin {
            self.bounded("open callback", self.services.launcher.open(&url)).await?;
        }
        self.sink.emit(DispatchEvent::CallbackOpened { url, launched: self.is_deeplink_origin });
        Ok(())
    }

    /// Load the active identity's secret and check it matches.
    pub async fn identity_secret(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, ActionError> {
        let owner = self.identity()?;
        let secret = self
            .services
            .secrets
            .load(owner)
            .await
            .map_err(|e| ActionError::remote("load secret", &e))?;
        if IdentityKey::from_secret(&secret).identity() != owner {
            return Err(ActionError::remote(
                "load secret",
                &StoreError::Rejected("stored secret does not match identity".to_string()),
            ));
        }
        Ok(secret)
    }
}

/// Run a collaborator call under `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ActionError> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ActionError::remote(operation, &e)),
        Err(_) => Err(ActionError::remote(
            operation,
            &StoreError::Unavailable(format!("timed out after {}s", limit.as_secs())),
        )),
    }
}

fn validate_relay(relay: &str) -> Result<(), ActionError> {
    match Url::parse(relay) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(ActionError::InvalidParameter { name: "relay", reason: "expected an http(s) url".to_string() }),
    }
}

pub(crate) async fn auth<E: Environment>(ctx: &HandlerContext<'_, E>, params: &AuthParams) -> Result<String, ActionError> {
    validate_relay(&params.relay)?;
    let owner = ctx.identity()?;

    let session = ctx.bounded("establish session", ctx.services.homeserver.establish(owner, &params.capabilities)).await?;
    ctx.bounded(
        "deliver grant",
        ctx.services.homeserver.deliver_grant(&params.relay, params.secret.expose(), &session),
    )
    .await?;

    tracing::debug!(capabilities = params.capabilities.len(), "authorization delivered");
    Ok("Access granted".to_string())
}

pub(crate) async fn import<E: Environment>(ctx: &HandlerContext<'_, E>, params: &ImportParams) -> Result<String, ActionError> {
    let secret = secret_from_import(params.secret.expose()).map_err(|_| ActionError::InvalidParameter {
        name: "secret",
        reason: "not a recovery phrase or secret key".to_string(),
    })?;
    let identity = IdentityKey::from_secret(&secret).identity();

    ctx.services.secrets.store(&identity, secret).await.map_err(|e| ActionError::remote("store secret", &e))?;

    tracing::debug!(%identity, "identity imported");
    ctx.sink.emit(DispatchEvent::IdentityImported { identity });
    Ok("Identity imported".to_string())
}

pub(crate) async fn signup<E: Environment>(ctx: &HandlerContext<'_, E>, params: &SignupParams) -> Result<String, ActionError> {
    validate_relay(&params.relay)?;

    let secret = Zeroizing::new(ctx.env.random_array::<KEY_LEN>()?);
    let identity = IdentityKey::from_secret(&secret).identity();

    // Persist before the account exists on the homeserver
    ctx.services.secrets.store(&identity, secret).await.map_err(|e| ActionError::remote("store secret", &e))?;
    ctx.bounded(
        "sign up",
        ctx.services.homeserver.sign_up(&params.homeserver, &identity, params.signup_token.expose()),
    )
    .await?;
    ctx.sink.emit(DispatchEvent::IdentityCreated { identity: identity.clone(), homeserver: params.homeserver.clone() });

    let session = ctx.bounded("establish session", ctx.services.homeserver.establish(&identity, &params.capabilities)).await?;
    ctx.bounded(
        "deliver grant",
        ctx.services.homeserver.deliver_grant(&params.relay, params.secret.expose(), &session),
    )
    .await?;

    Ok("Account created".to_string())
}

pub(crate) async fn invite<E: Environment>(ctx: &HandlerContext<'_, E>, params: &InviteParams) -> Result<String, ActionError> {
    let owner = ctx.identity()?;
    ctx.bounded("sign up", ctx.services.homeserver.sign_up(&ctx.config.default_homeserver, owner, &params.code))
        .await?;
    Ok("Invite accepted".to_string())
}

pub(crate) async fn get_profile<E: Environment>(
    ctx: &HandlerContext<'_, E>,
    params: &ProfileParams,
) -> Result<String, ActionError> {
    validate_callback(&params.callback)?;
    let app = params.app.as_deref().unwrap_or(&ctx.config.profile_app);
    let path = format!("/pub/{app}/profile.json");

    let body = ctx
        .bounded("read profile", ctx.services.directory.get(&params.pubkey, &path))
        .await?
        .ok_or_else(|| ActionError::remote("read profile", &StoreError::NotFound(path.clone())))?;
    let profile: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| ActionError::remote("read profile", &StoreError::Rejected("malformed profile".to_string())))?;

    let url = append_query(&params.callback, &[("profile", profile.to_string().as_str())])?;
    ctx.deliver_callback(url).await?;
    Ok("Profile shared".to_string())
}

pub(crate) async fn get_follows<E: Environment>(
    ctx: &HandlerContext<'_, E>,
    params: &FollowsParams,
) -> Result<String, ActionError> {
    validate_callback(&params.callback)?;
    let owner = ctx.identity()?;
    let app = params.app.as_deref().unwrap_or(&ctx.config.profile_app);
    let prefix = format!("/pub/{app}/follows/");

    let paths = ctx.bounded("list follows", ctx.services.directory.list(owner, &prefix)).await?;
    let follows: Vec<&str> = paths
        .iter()
        .filter_map(|p| p.strip_prefix(&prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .collect();

    let url = append_query(&params.callback, &[("follows", follows.join(",").as_str())])?;
    ctx.deliver_callback(url).await?;
    Ok(format!("Shared {} follows", follows.len()))
}

pub(crate) async fn sign_message<E: Environment>(
    ctx: &HandlerContext<'_, E>,
    params: &SignParams,
) -> Result<String, ActionError> {
    validate_callback(&params.callback)?;
    let key = IdentityKey::from_secret(&*ctx.identity_secret().await?);

    let signature = hex::encode(key.sign(params.message.as_bytes()));
    let url = append_query(&params.callback, &[("signature", signature.as_str()), ("ownerIdentity", key.identity().as_str())])?;
    ctx.deliver_callback(url).await?;
    Ok("Message signed".to_string())
}
