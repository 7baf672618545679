// Integration test: encryption preferences, the unsupported-capability
// policy, admission on both sides, and send failure reporting.

mod common;

use arcollab_core::transport::{decode_frame, encode_frame, Frame, InviteReply, LinkEvents};
use arcollab_core::{
    CapabilityPolicy, CollabError, DeliveryMode, EncryptionPreference, Link, LinkEvent,
    LocalIdentity, LocalLink, LocalMedium, PeerConnectionState, PeerId, PeerIdentity,
    SessionConfig, TransportError,
};
use common::{eventually, init_tracing, settle, spawn_peer, spawn_peer_with, TestPeer};
use std::sync::Arc;
use std::time::Duration;

/// An endpoint driven by hand, speaking the wire protocol directly
struct RawPeer {
    link: LocalLink,
    local: LocalIdentity,
    events: LinkEvents,
}

impl RawPeer {
    fn open(medium: &Arc<LocalMedium>, name: &str) -> Self {
        let link = medium.link();
        let local = LocalIdentity::generate(name);
        let events = link.open(local.peer()).unwrap();
        Self {
            link,
            local,
            events,
        }
    }

    fn identity(&self) -> PeerIdentity {
        self.local.peer().clone()
    }

    fn send(&self, to: &PeerId, frame: &Frame) {
        self.link
            .transmit(to, encode_frame(frame).unwrap(), DeliveryMode::Reliable)
            .unwrap();
    }

    /// Next frame sent to us by `from`, skipping everything else
    async fn next_frame_from(&mut self, from: &PeerId) -> Frame {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("link closed");
            if let LinkEvent::Received { from: sender, bytes } = event {
                if sender.id() == *from {
                    return decode_frame(&bytes).unwrap();
                }
            }
        }
    }

    /// Advertise and complete the handshake `coordinator` starts with us
    async fn join(&mut self, peer: &TestPeer) {
        self.link.start_advertising("ar-collab").unwrap();

        let invite = match self.next_frame_from(&peer.id()).await {
            Frame::Invite(invite) => invite,
            other => panic!("expected an invitation, got {:?}", other),
        };
        self.send(
            &peer.id(),
            &Frame::InviteReply(InviteReply {
                invitation_id: invite.invitation_id,
                accepted: true,
                public_key: Some(self.local.keys().public_key()),
            }),
        );
        assert!(matches!(
            self.next_frame_from(&peer.id()).await,
            Frame::Confirm { invitation_id } if invitation_id == invite.invitation_id
        ));
        eventually("the raw peer to join", || {
            peer.coordinator
                .connected_peers()
                .contains(self.local.peer())
        })
        .await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_required_never_connects_to_disabled() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(&medium, SessionConfig::new("alice"), true);
    let b = spawn_peer(
        &medium,
        SessionConfig::new("bob").with_encryption(EncryptionPreference::Disabled),
        true,
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        a.coordinator.session().peer_state(&b.id()),
        PeerConnectionState::Connecting
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    for (peer, other) in [(&a, &b), (&b, &a)] {
        assert!(peer.coordinator.connected_peers().is_empty());
        assert!(peer.recorded.joined.lock().is_empty());
        assert!(peer.coordinator.session().pending_invitations().is_empty());
        assert_eq!(
            peer.coordinator.session().peer_state(&other.id()),
            PeerConnectionState::NotConnected
        );
        assert!(peer.coordinator.is_running());
    }
}

#[tokio::test]
async fn test_optional_connects_to_disabled_in_plaintext() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(
        &medium,
        SessionConfig::new("alice").with_encryption(EncryptionPreference::Optional),
        true,
    );
    let b = spawn_peer(
        &medium,
        SessionConfig::new("bob").with_encryption(EncryptionPreference::Disabled),
        true,
    );
    eventually("both peers to join", || {
        a.is_connected_to(&b) && b.is_connected_to(&a)
    })
    .await;

    assert_eq!(
        a.coordinator.session().is_encrypted_with(&b.id()),
        Some(false)
    );
    a.coordinator.send_to_peers(b"plain", true, &[b.identity()]);
    eventually("bob to receive", || !b.recorded.received.lock().is_empty()).await;
    assert_eq!(b.recorded.received.lock()[0].0.data, b"plain".to_vec());
}

#[tokio::test]
async fn test_fatal_policy_ends_the_session() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(&medium, SessionConfig::new("alice"), true);
    let mut mallory = RawPeer::open(&medium, "mallory");
    mallory.join(&a).await;

    mallory.send(
        &a.id(),
        &Frame::Stream {
            name: "video".to_string(),
        },
    );
    eventually("the event loop to end", || !a.coordinator.is_running()).await;

    assert!(matches!(
        mallory.next_frame_from(&a.id()).await,
        Frame::Goodbye
    ));
    assert_eq!(*a.recorded.left.lock(), vec![mallory.identity()]);
    assert!(!a.coordinator.advertiser().is_advertising());

    let result = a.coordinator.shutdown().await;
    match result {
        Err(CollabError::UnsupportedCapability { peer, .. }) => {
            assert_eq!(peer, mallory.identity())
        }
        other => panic!("expected an unsupported capability error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reject_peer_policy_disconnects_only_offender() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(
        &medium,
        SessionConfig::new("alice").with_capability_policy(CapabilityPolicy::RejectPeer),
        true,
    );
    let c = spawn_peer(&medium, SessionConfig::new("carol"), true);
    eventually("alice and carol to join", || {
        a.is_connected_to(&c) && c.is_connected_to(&a)
    })
    .await;

    let mut mallory = RawPeer::open(&medium, "mallory");
    mallory.join(&a).await;

    mallory.send(
        &a.id(),
        &Frame::Resource {
            name: "room.usdz".to_string(),
        },
    );
    assert!(matches!(
        mallory.next_frame_from(&a.id()).await,
        Frame::Goodbye
    ));
    eventually("mallory to be dropped", || {
        !a.coordinator
            .connected_peers()
            .contains(&mallory.identity())
    })
    .await;

    assert!(a.coordinator.is_running());
    assert!(a.is_connected_to(&c));
    assert_eq!(*a.recorded.left.lock(), vec![mallory.identity()]);

    a.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capability_frame_from_non_member_is_ignored() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(&medium, SessionConfig::new("alice"), true);
    let mallory = RawPeer::open(&medium, "mallory");
    mallory.send(
        &a.id(),
        &Frame::Stream {
            name: "video".to_string(),
        },
    );
    settle().await;

    assert!(a.coordinator.is_running());
    a.coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_partitioned_send_is_reported() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer(&medium, SessionConfig::new("alice"), true);
    let b = spawn_peer(&medium, SessionConfig::new("bob"), true);
    eventually("both peers to join", || {
        a.is_connected_to(&b) && b.is_connected_to(&a)
    })
    .await;

    medium.partition(&a.id(), &b.id());
    let outcome = a.coordinator.send_to_peers(&[9], true, &[b.identity()]);
    assert!(outcome.delivered.is_empty());
    assert_eq!(
        outcome.failed,
        vec![(b.id(), TransportError::PeerUnreachable(b.id()))]
    );
    assert_eq!(
        *a.recorded.send_failures.lock(),
        vec![(b.id(), TransportError::PeerUnreachable(b.id()))]
    );
    assert!(a.is_connected_to(&b));

    // The caller retries once the link recovers
    medium.heal(&a.id(), &b.id());
    assert!(a
        .coordinator
        .send_to_peers(&[9], true, &[b.identity()])
        .is_complete());
    eventually("bob to receive", || !b.recorded.received.lock().is_empty()).await;
    assert_eq!(b.recorded.received.lock().len(), 1);
}

#[tokio::test]
async fn test_send_to_non_member_is_reported() {
    init_tracing();
    let medium = LocalMedium::new();
    let a = spawn_peer(&medium, SessionConfig::new("alice"), true);
    let stranger = PeerIdentity::new("stranger");

    let outcome = a.coordinator.send_to_peers(&[1], false, &[stranger.clone()]);
    assert_eq!(
        outcome.failed,
        vec![(stranger.id(), TransportError::PeerNotConnected(stranger.id()))]
    );
    assert_eq!(a.recorded.send_failures.lock().len(), 1);
    assert_eq!(medium.transmit_attempts(), 0);
}

#[tokio::test]
async fn test_inbound_invitation_policy_declines() {
    init_tracing();
    let medium = LocalMedium::new();

    let a = spawn_peer_with(
        &medium,
        SessionConfig::new("alice").with_auto_start(false),
        true,
        |handlers| handlers.with_invitation_policy(|_| false),
    );
    a.coordinator.advertiser().start().unwrap();
    let b = spawn_peer(&medium, SessionConfig::new("bob"), true);

    // Invite plus decline
    eventually("the invitation to be declined", || {
        medium.transmit_attempts() == 2
            && b.coordinator.session().peer_state(&a.id()) == PeerConnectionState::NotConnected
    })
    .await;

    assert!(b.coordinator.session().pending_invitations().is_empty());
    assert!(a.coordinator.connected_peers().is_empty());
    assert!(b.recorded.joined.lock().is_empty());
    assert_eq!(
        a.coordinator.session().peer_state(&b.id()),
        PeerConnectionState::NotConnected
    );
}
