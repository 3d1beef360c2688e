//! End-to-end secure handoff tests.
//!
//! The identity holder dispatches a `connect-handoff` link against in-memory
//! doubles; the consumer then fetches and opens the envelope and brings up a
//! Noise session with the handed-off keys. Every run ends with the standard
//! invariant checks.

use std::{collections::HashSet, sync::Arc, time::Duration};

use ringlink_app::{
    ActionError, ActiveIdentity, DispatchContext, DispatchEvent, Dispatcher, HandoffCallback, HandoffConfig,
    HandoffReceiver, HandoffRequest, InputSource, NoiseEndpointRecord, PollConfig, RequestId, StoreError, classify,
    seed_manager,
};
use ringlink_core::{Environment, ManagerRole, NoiseConfig, SessionRegistry};
use ringlink_crypto::{KEY_LEN, is_sealed_envelope};
use ringlink_harness::{
    ChaoticStore, FailingEntropyEnv, HandoffSnapshot, InvariantRegistry, RecordingSink, SimEnv, SimHomeserver,
    SimServices, StoreOp,
};

const HOLDER_SECRET: [u8; KEY_LEN] = [7; KEY_LEN];
const CALLBACK: &str = "consumerapp://handoff-done";

struct Holder {
    sim: SimServices,
    identity: ActiveIdentity,
    config: HandoffConfig,
}

impl Holder {
    fn new() -> Self {
        let sim = SimServices::new();
        let identity = ActiveIdentity { identity: sim.secrets.add_secret(HOLDER_SECRET) };
        Self { sim, identity, config: HandoffConfig::default() }
    }

    fn dispatcher<E: Environment>(&self, env: E) -> Dispatcher<E> {
        Dispatcher::new(env, self.sim.services(), self.config.clone())
    }

    async fn dispatch<E: Environment>(&self, env: E, link: &str, sink: &RecordingSink) -> Result<String, ActionError> {
        let request = classify(link, InputSource::Deeplink);
        let ctx = DispatchContext { identity: Some(&self.identity), sink, is_deeplink_origin: true };
        self.dispatcher(env).dispatch(&request, &ctx).await
    }

    fn snapshot(&self, sink: &RecordingSink) -> HandoffSnapshot {
        HandoffSnapshot::capture(&self.sim, &self.config, &sink.events())
            .with_secret(hex::encode(HOLDER_SECRET))
            .with_secret(SimHomeserver::session_secret_for(&self.identity.identity, 0))
    }
}

fn handoff_link(ephemeral_pk: Option<&str>) -> String {
    let mut link = format!("ringlink://connect-handoff?deviceId=device123&callback={CALLBACK}");
    if let Some(key) = ephemeral_pk {
        link.push_str("&ephemeralPk=");
        link.push_str(key);
    }
    link
}

#[tokio::test]
async fn handoff_writes_one_envelope_and_one_callback() {
    let holder = Holder::new();
    let sink = RecordingSink::new();
    let ephemeral = "aa".repeat(32);

    let outcome = holder.dispatch(SimEnv::with_seed(1), &handoff_link(Some(&ephemeral)), &sink).await.unwrap();
    assert_eq!(outcome, "Session handed off");

    let prefix = holder.config.handoff_prefix();
    let writes = holder.sim.directory.writes_under(&prefix);
    assert_eq!(writes.len(), 1);
    let request_id = writes[0].strip_prefix(&prefix).unwrap();
    assert_eq!(request_id.len(), 64);
    assert!(request_id.bytes().all(|b| b.is_ascii_hexdigit()));

    let body = holder.sim.directory.blob(&holder.identity.identity, &writes[0]).unwrap();
    assert!(is_sealed_envelope(&body));

    let opened = holder.sim.launcher.opened();
    assert_eq!(opened.len(), 1);
    let callback = HandoffCallback::parse(&opened[0]).unwrap();
    assert_eq!(callback.owner_identity, holder.identity.identity);
    assert_eq!(callback.request_id.to_string(), request_id);
    assert!(opened[0].starts_with(CALLBACK));
    assert!(opened[0].contains("mode=secure_handoff"));

    let sessions = holder.sim.homeserver.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].1, vec!["/pub/ringlink.app/:rw".to_string()]);

    InvariantRegistry::standard().assert_all(&holder.snapshot(&sink), "after handoff");
}

#[tokio::test]
async fn handoff_publishes_endpoint_record() {
    let holder = Holder::new();
    let sink = RecordingSink::new();

    holder.dispatch(SimEnv::with_seed(2), &handoff_link(Some(&"aa".repeat(32))), &sink).await.unwrap();

    let record = holder.sim.directory.blob(&holder.identity.identity, &holder.config.noise_record_path()).unwrap();
    let record: NoiseEndpointRecord = serde_json::from_slice(&record).unwrap();
    assert_eq!(record.owner_identity, holder.identity.identity);
    assert_eq!(record.device_id, "device123");
    assert_eq!(record.epoch, 0);
}

#[tokio::test]
async fn failed_discovery_publish_does_not_fail_handoff() {
    let holder = Holder::new();
    holder.sim.directory.fail_writes_under(holder.config.noise_record_path());
    let sink = RecordingSink::new();

    holder.dispatch(SimEnv::with_seed(3), &handoff_link(Some(&"aa".repeat(32))), &sink).await.unwrap();

    assert_eq!(holder.sim.directory.writes_under(&holder.config.handoff_prefix()).len(), 1);
    assert_eq!(holder.sim.directory.writes_under(&holder.config.noise_record_path()).len(), 1);
    assert_eq!(holder.sim.directory.blob(&holder.identity.identity, &holder.config.noise_record_path()), None);
    assert_eq!(holder.sim.launcher.opened().len(), 1);
    InvariantRegistry::standard().assert_all(&holder.snapshot(&sink), "after failed discovery");
}

#[tokio::test]
async fn missing_ephemeral_key_touches_nothing() {
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let err = holder.dispatch(SimEnv::with_seed(4), &handoff_link(None), &sink).await.unwrap_err();

    assert_eq!(err, ActionError::MissingEphemeralKey);
    assert_eq!(holder.sim.network_calls(), 0);
    assert!(holder.sim.launcher.opened().is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn failing_entropy_aborts_before_any_write() {
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let err = holder.dispatch(FailingEntropyEnv::new(), &handoff_link(Some(&"aa".repeat(32))), &sink).await.unwrap_err();

    assert_eq!(err, ActionError::EntropyUnavailable);
    assert!(
        holder.sim.directory.log().iter().all(|op| !matches!(op, StoreOp::Put { .. })),
        "no store write after entropy failure"
    );
    assert!(holder.sim.launcher.opened().is_empty());
}

#[tokio::test]
async fn store_failure_sends_no_callback() {
    let holder = Holder::new();
    holder.sim.directory.fail_writes_under(holder.config.handoff_prefix());
    let sink = RecordingSink::new();

    let err = holder.dispatch(SimEnv::with_seed(5), &handoff_link(Some(&"aa".repeat(32))), &sink).await.unwrap_err();

    assert!(matches!(err, ActionError::Remote { operation: "store handoff", .. }));
    assert!(holder.sim.launcher.opened().is_empty());
    assert!(!sink.events().iter().any(|e| matches!(e, DispatchEvent::HandoffDelivered { .. })));
}

#[tokio::test]
async fn consumer_receives_keys_and_opens_noise_session() {
    let env = SimEnv::with_seed(10);
    let holder = Holder::new();
    let sink = RecordingSink::new();

    // Consumer side: request with a fresh ephemeral key
    let request = HandoffRequest::new(&env, "device123", true).unwrap();
    let link = request.to_deeplink(CALLBACK);

    // Holder side: the link arrives as a deep link
    holder.dispatch(env.clone(), &link, &sink).await.unwrap();
    let callback_url = holder.sim.launcher.opened().pop().unwrap();

    // Consumer side: fetch, open, validate
    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let payload = receiver.receive(&request, &callback_url).await.unwrap();

    assert_eq!(payload.owner_identity, holder.identity.identity);
    assert_eq!(payload.device_id, "device123");
    assert_eq!(&*payload.session_secret, SimHomeserver::session_secret_for(&holder.identity.identity, 0));
    assert!(payload.keypair(0).is_some());
    assert!(payload.keypair(1).is_some());

    // Read once, then deleted
    let callback = HandoffCallback::parse(&callback_url).unwrap();
    assert_eq!(holder.sim.directory.blob(&holder.identity.identity, &holder.config.handoff_path(&callback.request_id)), None);

    // The handed-off epoch 0 key is the one advertised for discovery
    let record = holder.sim.directory.blob(&holder.identity.identity, &holder.config.noise_record_path()).unwrap();
    let record: NoiseEndpointRecord = serde_json::from_slice(&record).unwrap();

    let registry = SessionRegistry::new(env.clone());
    let server = seed_manager(&registry, &payload, ManagerRole::Server, NoiseConfig::default()).unwrap();
    assert_eq!(registry.static_public(server).unwrap(), record.public_key);

    let client = registry
        .create_manager(ManagerRole::Client, env.random_array().unwrap(), "peer:0", "peer-device", NoiseConfig::default())
        .unwrap();
    let first = registry.initiate(client, &record.public_key, Some("hello")).unwrap();
    let reply = registry.accept(server, &first.message).unwrap();
    registry.complete(client, first.session_id, &reply.message).unwrap();

    let mut snapshot = holder.snapshot(&sink);
    for i in 0..5u8 {
        let ciphertext = registry.encrypt(client, first.session_id, &[i; 16]).unwrap();
        assert_eq!(registry.decrypt(server, reply.session_id, &ciphertext).unwrap(), vec![i; 16]);

        let info = &registry.list_sessions(client).unwrap()[0];
        snapshot.record_counter(first.session_id.to_string(), info.write_counter);
    }
    assert_eq!(registry.watermark(first.session_id).unwrap().unwrap().write, 5);

    InvariantRegistry::standard().assert_all(&snapshot, "after consumer session");
}

#[tokio::test]
async fn consumer_with_wrong_key_cannot_open() {
    let env = SimEnv::with_seed(11);
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let request = HandoffRequest::new(&env, "device123", true).unwrap();
    let impostor = HandoffRequest::new(&env, "device123", true).unwrap();
    holder.dispatch(env.clone(), &request.to_deeplink(CALLBACK), &sink).await.unwrap();
    let callback_url = holder.sim.launcher.opened().pop().unwrap();

    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let err = receiver.receive(&impostor, &callback_url).await.unwrap_err();
    assert!(matches!(err, ActionError::Crypto(_)));
}

#[tokio::test]
async fn consumer_rejects_payload_for_other_device() {
    let env = SimEnv::with_seed(12);
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let request = HandoffRequest::new(&env, "device123", false).unwrap();
    let link = request.to_deeplink(CALLBACK).replace("deviceId=device123", "deviceId=other");
    holder.dispatch(env.clone(), &link, &sink).await.unwrap();
    let callback_url = holder.sim.launcher.opened().pop().unwrap();

    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let err = receiver.receive(&request, &callback_url).await.unwrap_err();
    assert_eq!(err, ActionError::InvalidPayload("device mismatch".to_string()));
}

#[tokio::test]
async fn expired_envelope_is_rejected() {
    let env = SimEnv::with_seed(13);
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let request = HandoffRequest::new(&env, "device123", false).unwrap();
    holder.dispatch(env.clone(), &request.to_deeplink(CALLBACK), &sink).await.unwrap();
    let callback_url = holder.sim.launcher.opened().pop().unwrap();

    env.advance(holder.config.expiry + Duration::from_secs(1));
    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let err = receiver.receive(&request, &callback_url).await.unwrap_err();
    assert_eq!(err, ActionError::InvalidPayload("expired".to_string()));
}

#[tokio::test]
async fn awaiting_missing_envelope_times_out() {
    let env = SimEnv::with_seed(14);
    let holder = Holder::new();
    let request = HandoffRequest::new(&env, "device123", false).unwrap();
    let callback = HandoffCallback { owner_identity: holder.identity.identity.clone(), request_id: RequestId::generate(&env).unwrap() };
    let poll = PollConfig { interval: Duration::from_secs(2), max_wait: Duration::from_secs(30) };

    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let err = receiver.await_handoff(&request, &callback, &poll).await.unwrap_err();

    assert_eq!(err, ActionError::Timeout { operation: "rendezvous" });
    assert_eq!(env.elapsed(), Duration::from_secs(30));
    assert_eq!(holder.sim.directory.operation_count(), 16);
}

#[tokio::test]
async fn awaiting_present_envelope_resolves() {
    let env = SimEnv::with_seed(15);
    let holder = Holder::new();
    let sink = RecordingSink::new();

    let request = HandoffRequest::new(&env, "device123", false).unwrap();
    holder.dispatch(env.clone(), &request.to_deeplink(CALLBACK), &sink).await.unwrap();
    let callback = HandoffCallback::parse(&holder.sim.launcher.opened()[0]).unwrap();

    let receiver = HandoffReceiver::new(env.clone(), Arc::new(holder.sim.directory.clone()), holder.config.clone());
    let payload = receiver.await_handoff(&request, &callback, &PollConfig::default()).await.unwrap();
    assert_eq!(payload.owner_identity, holder.identity.identity);
    assert!(payload.keypair(1).is_none());
}

#[test]
fn request_ids_do_not_collide() {
    let env = SimEnv::with_seed(99);
    let ids: HashSet<String> = (0..10_000).map(|_| RequestId::generate(&env).unwrap().to_string()).collect();
    assert_eq!(ids.len(), 10_000);
}

#[tokio::test]
async fn chaotic_store_never_leaks_or_orphans() {
    for seed in 0..20u64 {
        let holder = Holder::new();
        let chaos = ChaoticStore::with_seed(Arc::new(holder.sim.directory.clone()), 0.3, seed);
        let dispatcher = Dispatcher::new(
            SimEnv::with_seed(seed),
            holder.sim.services_with_directory(Arc::new(chaos.clone())),
            holder.config.clone(),
        );
        let sink = RecordingSink::new();
        let ctx = DispatchContext { identity: Some(&holder.identity), sink: &sink, is_deeplink_origin: true };

        for _ in 0..5 {
            let request = classify(&handoff_link(Some(&"aa".repeat(32))), InputSource::Deeplink);
            match dispatcher.dispatch(&request, &ctx).await {
                Ok(_) => {},
                Err(ActionError::Remote { operation, .. }) => assert_eq!(operation, "store handoff"),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let envelopes = holder.sim.directory.blobs().iter().filter(|(_, p, _)| p.starts_with(&holder.config.handoff_prefix())).count();
        assert_eq!(envelopes, holder.sim.launcher.opened().len(), "seed {seed}");
        InvariantRegistry::standard().assert_all(&holder.snapshot(&sink), &format!("chaos seed {seed}"));
    }
}

#[tokio::test]
async fn homeserver_outage_is_remote_error() {
    let holder = Holder::new();
    holder.sim.homeserver.fail_establish();
    let sink = RecordingSink::new();

    let err = holder.dispatch(SimEnv::with_seed(6), &handoff_link(Some(&"aa".repeat(32))), &sink).await.unwrap_err();

    assert_eq!(err, ActionError::remote("establish session", &StoreError::Unavailable("homeserver unreachable".to_string())));
    assert_eq!(holder.sim.directory.operation_count(), 0);
}
