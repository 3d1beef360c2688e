//! In-process handoff demo.
//!
//! Plays both parties against in-memory services: the consumer asks for a
//! handoff, the identity holder dispatches the link, the consumer waits for
//! the envelope, opens it and brings up a Noise session with the handed-off
//! epoch 0 key.

use std::{error::Error, sync::Arc};

use ringlink_app::{
    ActiveIdentity, DispatchContext, Dispatcher, HandoffCallback, HandoffConfig, HandoffReceiver, HandoffRequest,
    InputSource, PollConfig, SessionService, classify, seed_manager,
};
use ringlink_core::{Environment, ManagerId, ManagerRole, NoiseConfig, SessionId, SessionInfo};
use ringlink_harness::{HandoffSnapshot, InvariantRegistry, RecordingSink, SimEnv, SimServices};
use serde::Serialize;
use zeroize::Zeroizing;

const DEMO_CALLBACK: &str = "ringlink-demo://handoff-done";

pub(crate) struct DemoOptions {
    pub seed: u64,
    pub device_id: String,
    pub include_epoch1: bool,
    pub messages: u32,
    pub config: HandoffConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Serialize)]
pub(crate) struct DemoReport {
    owner_identity: String,
    request_id: String,
    epochs: Vec<u32>,
    client: SessionReport,
    server: SessionReport,
}

#[derive(Debug, Serialize)]
struct SessionReport {
    session_id: String,
    status: String,
    write_counter: u64,
    read_counter: u64,
}

impl From<&SessionInfo> for SessionReport {
    fn from(info: &SessionInfo) -> Self {
        Self {
            session_id: info.session_id.to_string(),
            status: format!("{:?}", info.status),
            write_counter: info.write_counter,
            read_counter: info.read_counter,
        }
    }
}

pub(crate) async fn run(options: DemoOptions) -> Result<DemoReport, Box<dyn Error>> {
    let env = SimEnv::with_seed(options.seed);
    let sim = SimServices::new();
    let identity = ActiveIdentity { identity: sim.secrets.add_secret(env.random_array()?) };

    // Consumer asks for the keys
    let request = HandoffRequest::new(&env, options.device_id.clone(), options.include_epoch1)?;
    let link = request.to_deeplink(DEMO_CALLBACK);

    // Identity holder handles the link
    let dispatcher = Dispatcher::new(env.clone(), sim.services(), options.config.clone());
    let sink = RecordingSink::new();
    let ctx = DispatchContext { identity: Some(&identity), sink: &sink, is_deeplink_origin: true };
    let outcome = dispatcher.dispatch(&classify(&link, InputSource::Deeplink), &ctx).await?;
    tracing::info!(%outcome, "identity holder finished");

    // Consumer picks the envelope up
    let callback_url = sim.launcher.opened().pop().ok_or("no callback was launched")?;
    let callback = HandoffCallback::parse(&callback_url)?;
    let receiver = HandoffReceiver::new(env.clone(), Arc::new(sim.directory.clone()), options.config.clone());
    let payload = receiver.await_handoff(&request, &callback, &options.poll).await?;

    let snapshot = HandoffSnapshot::capture(&sim, &options.config, &sink.events()).with_secret(payload.session_secret.clone());
    if let Err(violations) = InvariantRegistry::standard().check_all(&snapshot) {
        let messages: Vec<String> = violations.iter().map(ToString::to_string).collect();
        return Err(messages.join("; ").into());
    }

    let sessions = SessionService::new(env.clone());
    let server = seed_manager(sessions.registry(), &payload, ManagerRole::Server, NoiseConfig::default())?;
    let server_public = sessions.registry().static_public(server)?;
    let client = sessions
        .create_manager(
            ManagerRole::Client,
            Zeroizing::new(env.random_array()?),
            "demo-peer:0".to_string(),
            "demo-peer".to_string(),
            NoiseConfig::default(),
        )
        .await?;

    let first = sessions.initiate(client, server_public, Some("demo".to_string())).await?;
    let reply = sessions.accept(server, first.message).await?;
    let client_session = sessions.complete(client, first.session_id, reply.message).await?;

    for i in 0..options.messages {
        let ciphertext = sessions.encrypt(client, client_session, format!("message {i}").into_bytes()).await?;
        sessions.decrypt(server, reply.session_id, ciphertext).await?;
    }

    Ok(DemoReport {
        owner_identity: payload.owner_identity.clone(),
        request_id: callback.request_id.to_string(),
        epochs: payload.noise_keypairs.iter().map(|k| k.epoch).collect(),
        client: session_report(&sessions, client, client_session).await?,
        server: session_report(&sessions, server, reply.session_id).await?,
    })
}

async fn session_report(
    sessions: &SessionService<SimEnv>,
    manager: ManagerId,
    session: SessionId,
) -> Result<SessionReport, Box<dyn Error>> {
    let infos = sessions.list_sessions(manager).await?;
    let info = infos.iter().find(|i| i.session_id == session).ok_or("session disappeared")?;
    Ok(SessionReport::from(info))
}
