// Shared helpers for the session integration tests
#![allow(dead_code)]

use arcollab_core::{
    LocalMedium, Payload, PeerId, PeerIdentity, SessionConfig, SessionCoordinator,
    SessionHandlers, TransportError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Everything the handlers of one coordinator saw
#[derive(Default)]
pub struct Recorded {
    pub joined: Mutex<Vec<PeerIdentity>>,
    pub left: Mutex<Vec<PeerIdentity>>,
    pub received: Mutex<Vec<(Payload, PeerIdentity)>>,
    pub discovered: Mutex<Vec<PeerIdentity>>,
    pub send_failures: Mutex<Vec<(PeerId, TransportError)>>,
}

pub struct TestPeer {
    pub coordinator: SessionCoordinator,
    pub recorded: Arc<Recorded>,
}

impl TestPeer {
    pub fn identity(&self) -> PeerIdentity {
        self.coordinator.local_peer().clone()
    }

    pub fn id(&self) -> PeerId {
        self.coordinator.local_peer().id()
    }

    pub fn is_connected_to(&self, other: &TestPeer) -> bool {
        self.coordinator
            .connected_peers()
            .contains(other.coordinator.local_peer())
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

fn recording_handlers(recorded: &Arc<Recorded>, admit: bool) -> SessionHandlers {
    let (r1, r2, r3, r4, r5) = (
        recorded.clone(),
        recorded.clone(),
        recorded.clone(),
        recorded.clone(),
        recorded.clone(),
    );
    SessionHandlers::new(
        move |payload, from| r1.received.lock().push((payload, from.clone())),
        move |peer| r2.joined.lock().push(peer.clone()),
        move |peer| r3.left.lock().push(peer.clone()),
        move |peer| {
            r4.discovered.lock().push(peer.clone());
            admit
        },
    )
    .with_send_failed(move |peer, e| r5.send_failures.lock().push((peer.id(), e.clone())))
}

/// Start a coordinator on `medium` whose admission predicate returns `admit`
pub fn spawn_peer(medium: &Arc<LocalMedium>, config: SessionConfig, admit: bool) -> TestPeer {
    spawn_peer_with(medium, config, admit, |handlers| handlers)
}

pub fn spawn_peer_with(
    medium: &Arc<LocalMedium>,
    config: SessionConfig,
    admit: bool,
    customize: impl FnOnce(SessionHandlers) -> SessionHandlers,
) -> TestPeer {
    let recorded = Arc::new(Recorded::default());
    let handlers = customize(recording_handlers(&recorded, admit));
    let coordinator = SessionCoordinator::new(config, Arc::new(medium.link()), handlers)
        .expect("coordinator should start");
    TestPeer {
        coordinator,
        recorded,
    }
}

/// Poll `check` until it holds, failing the test after five (virtual) seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let every event loop drain its queue
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
