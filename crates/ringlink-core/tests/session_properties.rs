//! Property-based tests for session counters and persistence.
//!
//! Counters are the replay defense for persisted sessions: whatever the
//! order of sends, saves and restores, a restore may never move a session
//! back to counters it has already used.

use ringlink_core::{ManagerRole, NoiseConfig, NoiseSessionState, SessionError, SessionRegistry};
use ringlink_harness::SimEnv;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn restores_never_regress(seed in any::<u64>(), sends in proptest::collection::vec(1u8..6, 1..6)) {
        let registry = SessionRegistry::new(SimEnv::with_seed(seed));
        let client = registry.create_manager(ManagerRole::Client, [1; 32], "k", "d", NoiseConfig::default()).unwrap();
        let server = registry.create_manager(ManagerRole::Server, [2; 32], "k", "s", NoiseConfig::default()).unwrap();
        let server_pub = registry.static_public(server).unwrap();
        let first = registry.initiate(client, &server_pub, None).unwrap();
        let reply = registry.accept(server, &first.message).unwrap();
        let session = registry.complete(client, first.session_id, &reply.message).unwrap();

        let mut saved: Vec<NoiseSessionState> = Vec::new();
        let mut observed = Vec::new();
        for batch in &sends {
            for _ in 0..*batch {
                registry.encrypt(client, session, b"m").unwrap();
            }
            let state = registry.save_state(client, session).unwrap();
            observed.push(state.write_counter());
            saved.push(state);
        }
        prop_assert!(observed.windows(2).all(|w| w[0] < w[1]));

        registry.destroy_manager(client).unwrap();
        let fresh = registry.create_manager(ManagerRole::Client, [1; 32], "k", "d", NoiseConfig::default()).unwrap();

        let (latest, earlier) = saved.split_last().unwrap();
        for state in earlier {
            let rejected = matches!(
                registry.restore_state(fresh, state),
                Err(SessionError::CounterRegression { counter: "write", .. })
            );
            prop_assert!(rejected);
        }
        prop_assert_eq!(registry.restore_state(fresh, latest).unwrap(), session);
        prop_assert_eq!(registry.watermark(session).unwrap().unwrap().write, *observed.last().unwrap());
    }

    #[test]
    fn persisted_state_decodes_identically(seed in any::<u64>(), sends in 0u8..8) {
        let registry = SessionRegistry::new(SimEnv::with_seed(seed));
        let client = registry.create_manager(ManagerRole::Client, [3; 32], "k", "d", NoiseConfig::default()).unwrap();
        let server = registry.create_manager(ManagerRole::Server, [4; 32], "k", "s", NoiseConfig::default()).unwrap();
        let server_pub = registry.static_public(server).unwrap();
        let first = registry.initiate(client, &server_pub, Some("hint")).unwrap();
        let reply = registry.accept(server, &first.message).unwrap();
        let session = registry.complete(client, first.session_id, &reply.message).unwrap();
        for _ in 0..sends {
            registry.encrypt(client, session, b"m").unwrap();
        }

        let state = registry.save_state(client, session).unwrap();
        let decoded = NoiseSessionState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded.write_counter(), u64::from(sends));
        prop_assert!(decoded == state);
    }

    #[test]
    fn decoding_garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Err(e) = NoiseSessionState::from_bytes(&bytes) {
            prop_assert!(matches!(e, SessionError::Encoding(_)));
        }
    }
}
