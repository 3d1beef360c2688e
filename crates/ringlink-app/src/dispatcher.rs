//! Action dispatch.
//!
//! Routes a classified [`ActionRequest`] to its handler. The dispatcher owns
//! the gating that applies to every kind (unknown input, missing identity)
//! and turns a panicking handler into [`ActionError::HandlerCrashed`] instead
//! of tearing down the host.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use ringlink_core::Environment;

use crate::{
    action::{ActionKind, ActionParams, ActionRequest},
    config::HandoffConfig,
    error::ActionError,
    handlers::{self, HandlerContext},
    handoff,
    services::{ActiveIdentity, EventSink, Services},
};

/// Per-call dispatch context.
pub struct DispatchContext<'a> {
    /// Identity selected by the user, if any
    pub identity: Option<&'a ActiveIdentity>,
    /// Receiver of progress events
    pub sink: &'a dyn EventSink,
    /// True when the request arrived through a deep link, so callbacks can
    /// be launched directly
    pub is_deeplink_origin: bool,
}

/// Routes action requests to handlers.
pub struct Dispatcher<E: Environment> {
    env: E,
    services: Services,
    config: HandoffConfig,
}

impl<E: Environment> Dispatcher<E> {
    /// Create a dispatcher over `services`.
    pub fn new(env: E, services: Services, config: HandoffConfig) -> Self {
        Self { env, services, config }
    }

    /// Handoff configuration in use.
    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Handle `request`, returning a short human-readable outcome.
    ///
    /// # Errors
    ///
    /// - `UnknownAction` for unclassified input
    /// - `NoActiveIdentity` when the kind needs an identity and none is set
    /// - `HandlerCrashed` if the handler panics
    /// - any handler error
    pub async fn dispatch(&self, request: &ActionRequest, ctx: &DispatchContext<'_>) -> Result<String, ActionError> {
        let kind = request.kind();
        if kind == ActionKind::Unknown {
            return Err(ActionError::UnknownAction);
        }
        if kind.requires_identity() && ctx.identity.is_none() {
            return Err(ActionError::NoActiveIdentity);
        }

        let handler_ctx = HandlerContext {
            env: &self.env,
            services: &self.services,
            config: &self.config,
            identity: ctx.identity,
            sink: ctx.sink,
            is_deeplink_origin: ctx.is_deeplink_origin,
        };

        tracing::debug!(kind = kind.name(), source = ?request.source(), "dispatching");
        let outcome = AssertUnwindSafe(route(&handler_ctx, request.params())).catch_unwind().await;

        match outcome {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(e)) => {
                tracing::warn!(kind = kind.name(), class = ?e.class(), error = %e, "action failed");
                Err(e)
            },
            Err(_) => {
                tracing::error!(kind = kind.name(), "handler panicked");
                Err(ActionError::HandlerCrashed { kind })
            },
        }
    }
}

async fn route<E: Environment>(ctx: &HandlerContext<'_, E>, params: &ActionParams) -> Result<String, ActionError> {
    match params {
        ActionParams::Auth(p) => handlers::auth(ctx, p).await,
        ActionParams::Import(p) => handlers::import(ctx, p).await,
        ActionParams::Signup(p) => handlers::signup(ctx, p).await,
        ActionParams::Invite(p) => handlers::invite(ctx, p).await,
        ActionParams::GetProfile(p) => handlers::get_profile(ctx, p).await,
        ActionParams::GetFollows(p) => handlers::get_follows(ctx, p).await,
        ActionParams::ConnectHandoff(p) => {
            handoff::secure_handoff(ctx, p).await.map(|_| "Session handed off".to_string())
        },
        ActionParams::SignMessage(p) => handlers::sign_message(ctx, p).await,
        ActionParams::Unknown { .. } => Err(ActionError::UnknownAction),
    }
}
