//! Transport session: the encrypted group channel and the authoritative
//! membership view.
//!
//! Every mutation of per-peer state and of the invitation table goes through
//! this type under one lock. Membership changes are computed under the lock
//! and reported to the application after it is released.
//!
//! A second, reentrant lock spans each membership transition and its
//! notification, so join and leave reports for a peer reach the handlers in
//! the order the transitions happened, whichever thread drives them.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::abstraction::{DeliveryMode, PeerConnectionState, Payload, TransportError};
use super::frame::{
    encode_frame, DataBody, Frame, InvitationId, Invite, InviteReply, MAX_PAYLOAD_SIZE,
};
use super::link::Link;
use crate::config::{CapabilityPolicy, EncryptionPreference};
use crate::crypto::{open_payload, seal_payload};
use crate::discovery::invitation::{Direction, InvitationContext, InvitationTable};
use crate::handlers::SessionHandlers;
use crate::identity::{ChannelKey, LocalIdentity, PeerId, PeerIdentity};
use crate::CollabError;

/// Channel features this session never supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Stream(String),
    Resource(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Stream(name) => write!(f, "stream {:?}", name),
            Capability::Resource(name) => write!(f, "resource {:?}", name),
        }
    }
}

/// Result of one send call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Peers the frame was handed to the link for
    pub delivered: Vec<PeerId>,
    /// Peers the send could not be started for
    pub failed: Vec<(PeerId, TransportError)>,
}

impl SendOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

#[derive(Debug)]
struct PeerRecord {
    identity: PeerIdentity,
    state: PeerConnectionState,
    /// None until negotiated, and for plaintext channels
    key: Option<ChannelKey>,
}

#[derive(Debug, Default)]
struct SessionState {
    peers: HashMap<PeerId, PeerRecord>,
    invitations: InvitationTable,
}

enum MembershipChange {
    Joined(PeerIdentity),
    Left(PeerIdentity),
}

enum Negotiation {
    Encrypted(ChannelKey),
    Plaintext,
    Refused,
}

pub struct TransportSession {
    local: LocalIdentity,
    link: Arc<dyn Link>,
    handlers: Arc<SessionHandlers>,
    encryption: EncryptionPreference,
    capability_policy: CapabilityPolicy,
    inbound_timeout: Duration,
    state: Mutex<SessionState>,
    /// Held from a membership transition through its notification.
    /// Always taken before `state`.
    membership: ReentrantMutex<()>,
}

impl TransportSession {
    pub fn new(
        local: LocalIdentity,
        link: Arc<dyn Link>,
        handlers: Arc<SessionHandlers>,
        encryption: EncryptionPreference,
        capability_policy: CapabilityPolicy,
        inbound_timeout: Duration,
    ) -> Self {
        Self {
            local,
            link,
            handlers,
            encryption,
            capability_policy,
            inbound_timeout,
            state: Mutex::new(SessionState::default()),
            membership: ReentrantMutex::new(()),
        }
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        self.local.peer()
    }

    pub fn encryption(&self) -> EncryptionPreference {
        self.encryption
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn connected_peers(&self) -> HashSet<PeerIdentity> {
        self.state
            .lock()
            .peers
            .values()
            .filter(|r| r.state == PeerConnectionState::Connected)
            .map(|r| r.identity.clone())
            .collect()
    }

    pub fn peer_state(&self, peer: &PeerId) -> PeerConnectionState {
        self.state
            .lock()
            .peers
            .get(peer)
            .map(|r| r.state)
            .unwrap_or(PeerConnectionState::NotConnected)
    }

    /// Whether the channel with `peer` is encrypted; None if not connected
    pub fn is_encrypted_with(&self, peer: &PeerId) -> Option<bool> {
        self.state
            .lock()
            .peers
            .get(peer)
            .filter(|r| r.state == PeerConnectionState::Connected)
            .map(|r| r.key.is_some())
    }

    pub fn pending_invitations(&self) -> Vec<InvitationContext> {
        self.state.lock().invitations.snapshot()
    }

    pub fn next_invitation_expiry(&self) -> Option<Instant> {
        self.state.lock().invitations.next_expiry()
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Apply a connection-state change reported by the transport layer.
    ///
    /// Entering `Connected` reports a join, leaving it reports a leave. A
    /// state equal to the current one is ignored.
    pub fn on_peer_state_changed(&self, peer: &PeerIdentity, new_state: PeerConnectionState) {
        let _membership = self.membership.lock();
        let change = {
            let mut state = self.state.lock();
            Self::transition(&mut state, peer, new_state)
        };
        self.emit(change);
    }

    fn transition(
        state: &mut SessionState,
        peer: &PeerIdentity,
        new_state: PeerConnectionState,
    ) -> Option<MembershipChange> {
        let old_state = state
            .peers
            .get(&peer.id())
            .map(|r| r.state)
            .unwrap_or(PeerConnectionState::NotConnected);
        if old_state == new_state {
            return None;
        }

        let identity = match new_state {
            PeerConnectionState::NotConnected => {
                state.invitations.discard_peer(&peer.id());
                state
                    .peers
                    .remove(&peer.id())
                    .map(|r| r.identity)
                    .unwrap_or_else(|| peer.clone())
            }
            _ => {
                let record = Self::record_for(state, peer);
                record.state = new_state;
                record.identity.clone()
            }
        };
        debug!("Peer {}: {} -> {}", identity, old_state, new_state);

        if new_state == PeerConnectionState::Connected {
            Some(MembershipChange::Joined(identity))
        } else if old_state == PeerConnectionState::Connected {
            Some(MembershipChange::Left(identity))
        } else {
            None
        }
    }

    fn record_for<'a>(state: &'a mut SessionState, peer: &PeerIdentity) -> &'a mut PeerRecord {
        state.peers.entry(peer.id()).or_insert_with(|| PeerRecord {
            identity: peer.clone(),
            state: PeerConnectionState::Connecting,
            key: None,
        })
    }

    /// Revert a connecting peer once nothing is in flight for it any more
    fn settle(state: &mut SessionState, peer: &PeerId) {
        let connecting = state
            .peers
            .get(peer)
            .map(|r| r.state == PeerConnectionState::Connecting)
            .unwrap_or(false);
        if connecting && !state.invitations.has_pending_for(peer) {
            if let Some(record) = state.peers.remove(peer) {
                debug!("Peer {}: Connecting -> NotConnected", record.identity);
            }
        }
    }

    fn emit(&self, change: Option<MembershipChange>) {
        match change {
            Some(MembershipChange::Joined(peer)) => {
                info!("👋 Peer joined: {}", peer);
                (self.handlers.on_peer_joined)(&peer);
            }
            Some(MembershipChange::Left(peer)) => {
                info!("Peer left: {}", peer);
                (self.handlers.on_peer_left)(&peer);
            }
            None => {}
        }
    }

    // ------------------------------------------------------------------
    // Invitation handshake
    //
    //   inviter                         acceptor
    //   Invite{id, key}        ----->   Connecting, inbound context
    //   Connected (join)       <-----   InviteReply{id, accepted, key}
    //   Confirm{id}            ----->   Connected (join)
    // ------------------------------------------------------------------

    fn offered_key(&self) -> Option<[u8; 32]> {
        self.encryption
            .offers_key()
            .then(|| self.local.keys().public_key())
    }

    fn negotiate(&self, remote_key: Option<[u8; 32]>) -> Negotiation {
        match (self.encryption, remote_key) {
            (EncryptionPreference::Disabled, _) => Negotiation::Plaintext,
            (_, Some(key)) => Negotiation::Encrypted(self.local.keys().agree(&key)),
            (EncryptionPreference::Optional, None) => Negotiation::Plaintext,
            (EncryptionPreference::Required, None) => Negotiation::Refused,
        }
    }

    /// Invite `peer` to join; the invitation is discarded after `timeout`.
    pub fn invite(
        &self,
        peer: &PeerIdentity,
        timeout: Duration,
    ) -> Result<InvitationId, TransportError> {
        let expires_at = Instant::now()
            .checked_add(timeout)
            .ok_or(TransportError::TimeoutOutOfRange(timeout))?;
        let invitation_id = Uuid::new_v4();
        let frame = encode_frame(&Frame::Invite(Invite {
            invitation_id,
            public_key: self.offered_key(),
            context: None,
        }))?;

        {
            let mut state = self.state.lock();
            Self::record_for(&mut state, peer);
            state.invitations.insert(InvitationContext {
                id: invitation_id,
                peer: peer.clone(),
                direction: Direction::Outbound,
                expires_at,
            });
        }

        if let Err(e) = self
            .link
            .transmit(&peer.id(), frame, DeliveryMode::Reliable)
        {
            let mut state = self.state.lock();
            state.invitations.remove(&invitation_id);
            Self::settle(&mut state, &peer.id());
            return Err(e);
        }

        debug!("Invited {} ({})", peer, invitation_id);
        Ok(invitation_id)
    }

    /// Accept an invitation received while advertising.
    ///
    /// A peer that cannot satisfy the encryption requirement is left in
    /// `Connecting` without a reply until its invitation times out.
    pub fn accept_invitation(
        &self,
        from: &PeerIdentity,
        invite: &Invite,
    ) -> Result<(), TransportError> {
        let expires_at = Instant::now()
            .checked_add(self.inbound_timeout)
            .ok_or(TransportError::TimeoutOutOfRange(self.inbound_timeout))?;
        let negotiation = self.negotiate(invite.public_key);

        {
            let mut state = self.state.lock();
            state.invitations.insert(InvitationContext {
                id: invite.invitation_id,
                peer: from.clone(),
                direction: Direction::Inbound,
                expires_at,
            });
            let record = Self::record_for(&mut state, from);
            match negotiation {
                Negotiation::Refused => {
                    warn!(
                        "{} offered no channel key but encryption is required; not replying",
                        from
                    );
                    return Ok(());
                }
                Negotiation::Encrypted(key) => record.key = Some(key),
                Negotiation::Plaintext => record.key = None,
            }
        }

        let reply = encode_frame(&Frame::InviteReply(InviteReply {
            invitation_id: invite.invitation_id,
            accepted: true,
            public_key: self.offered_key(),
        }))?;

        if let Err(e) = self.link.transmit(&from.id(), reply, DeliveryMode::Reliable) {
            let mut state = self.state.lock();
            state.invitations.remove(&invite.invitation_id);
            Self::settle(&mut state, &from.id());
            return Err(e);
        }

        debug!("Accepted invitation {} from {}", invite.invitation_id, from);
        Ok(())
    }

    /// Tell the inviter we are not joining
    pub fn decline_invitation(
        &self,
        from: &PeerIdentity,
        invitation_id: InvitationId,
    ) -> Result<(), TransportError> {
        let reply = encode_frame(&Frame::InviteReply(InviteReply {
            invitation_id,
            accepted: false,
            public_key: None,
        }))?;
        self.link.transmit(&from.id(), reply, DeliveryMode::Reliable)?;
        debug!("Declined invitation {} from {}", invitation_id, from);
        Ok(())
    }

    /// Handle the answer to one of our invitations
    pub fn on_invitation_reply(&self, from: &PeerIdentity, reply: &InviteReply) {
        let negotiation = self.negotiate(reply.public_key);

        let _membership = self.membership.lock();
        let change = {
            let mut state = self.state.lock();
            let Some(context) =
                state
                    .invitations
                    .take(&reply.invitation_id, &from.id(), Direction::Outbound)
            else {
                debug!(
                    "Ignoring reply to unknown or expired invitation {} from {}",
                    reply.invitation_id, from
                );
                return;
            };

            if !reply.accepted {
                info!("{} declined our invitation", from);
                Self::settle(&mut state, &from.id());
                return;
            }

            let key = match negotiation {
                Negotiation::Refused => {
                    warn!(
                        "{} accepted without a channel key but encryption is required",
                        from
                    );
                    state.invitations.insert(context);
                    return;
                }
                Negotiation::Encrypted(key) => Some(key),
                Negotiation::Plaintext => None,
            };
            let record = Self::record_for(&mut state, from);
            if record.state != PeerConnectionState::Connected {
                record.key = key;
            }
            Self::transition(&mut state, from, PeerConnectionState::Connected)
        };

        // Confirm before reporting the join so anything the join handler
        // sends reaches the peer after it has joined too.
        let confirm = encode_frame(&Frame::Confirm {
            invitation_id: reply.invitation_id,
        })
        .and_then(|frame| self.link.transmit(&from.id(), frame, DeliveryMode::Reliable));
        if let Err(e) = confirm {
            warn!("Failed to confirm invitation with {}: {}", from, e);
        }

        self.emit(change);
    }

    /// Handle the inviter's confirmation of an invitation we accepted
    pub fn on_invitation_confirmed(&self, from: &PeerIdentity, invitation_id: InvitationId) {
        let _membership = self.membership.lock();
        let change = {
            let mut state = self.state.lock();
            if state
                .invitations
                .take(&invitation_id, &from.id(), Direction::Inbound)
                .is_none()
            {
                debug!(
                    "Ignoring confirmation of unknown invitation {} from {}",
                    invitation_id, from
                );
                return;
            }
            Self::transition(&mut state, from, PeerConnectionState::Connected)
        };
        self.emit(change);
    }

    /// Discard invitations whose deadline has passed. Returns how many expired.
    pub fn expire_invitations(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let expired = state.invitations.drain_expired(now);
        for context in &expired {
            debug!(
                "{:?} invitation {} with {} expired",
                context.direction, context.id, context.peer
            );
            Self::settle(&mut state, &context.peer.id());
        }
        expired.len()
    }

    // ------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------

    /// Send `data` to every peer in `targets`.
    ///
    /// An empty target set is a no-op. Failures are logged, reported to the
    /// send-failure handler and returned; nothing is retried.
    pub fn send(&self, data: &[u8], mode: DeliveryMode, targets: &[PeerIdentity]) -> SendOutcome {
        let mut outcome = SendOutcome::default();
        let mut seen = HashSet::new();

        for peer in targets {
            if !seen.insert(peer.id()) {
                continue;
            }
            match self.send_one(data, mode, peer) {
                Ok(()) => outcome.delivered.push(peer.id()),
                Err(e) => {
                    warn!("Error sending {} bytes to {}: {}", data.len(), peer, e);
                    if let Some(handler) = &self.handlers.on_send_failed {
                        handler(peer, &e);
                    }
                    outcome.failed.push((peer.id(), e));
                }
            }
        }
        outcome
    }

    fn send_one(
        &self,
        data: &[u8],
        mode: DeliveryMode,
        peer: &PeerIdentity,
    ) -> Result<(), TransportError> {
        let key = {
            let state = self.state.lock();
            match state.peers.get(&peer.id()) {
                Some(r) if r.state == PeerConnectionState::Connected => r.key.clone(),
                _ => return Err(TransportError::PeerNotConnected(peer.id())),
            }
        };

        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let body = match key {
            Some(key) => DataBody::Sealed(
                seal_payload(&key, &self.local.peer().id(), data)
                    .map_err(|e| TransportError::Encryption(e.to_string()))?,
            ),
            None => DataBody::Plain(data.to_vec()),
        };
        let frame = encode_frame(&Frame::Data { mode, body })?;
        self.link.transmit(&peer.id(), frame, mode)
    }

    /// Forward a data frame from a member to the receive handler
    pub fn on_data_received(&self, from: &PeerIdentity, mode: DeliveryMode, body: DataBody) {
        let key = {
            let state = self.state.lock();
            match state.peers.get(&from.id()) {
                Some(r) if r.state == PeerConnectionState::Connected => r.key.clone(),
                _ => {
                    warn!("Dropping data from {}: not a session member", from);
                    return;
                }
            }
        };

        let data = match (key, body) {
            (Some(key), DataBody::Sealed(sealed)) => {
                match open_payload(&key, &from.id(), &sealed) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Dropping data from {}: {}", from, e);
                        return;
                    }
                }
            }
            (None, DataBody::Plain(data)) => data,
            (Some(_), DataBody::Plain(_)) => {
                warn!("Dropping plaintext data from {} on an encrypted channel", from);
                return;
            }
            (None, DataBody::Sealed(_)) => {
                warn!("Dropping sealed data from {}: no channel key", from);
                return;
            }
        };

        (self.handlers.on_receive)(Payload::new(data, mode), from);
    }

    // ------------------------------------------------------------------
    // Unsupported capabilities and teardown
    // ------------------------------------------------------------------

    /// A member tried to open a stream or transfer a resource.
    pub fn on_unsupported_capability(
        &self,
        from: &PeerIdentity,
        capability: Capability,
    ) -> Result<(), CollabError> {
        if self.peer_state(&from.id()) != PeerConnectionState::Connected {
            debug!("Ignoring {} from non-member {}", capability, from);
            return Ok(());
        }

        match self.capability_policy {
            CapabilityPolicy::Fatal => {
                error!(
                    "{} attempted {}: this session does not send or receive streams or resources",
                    from, capability
                );
                Err(CollabError::UnsupportedCapability {
                    peer: from.clone(),
                    capability,
                })
            }
            CapabilityPolicy::RejectPeer => {
                warn!("Disconnecting {}: attempted {}", from, capability);
                self.disconnect_peer(&from.id());
                Ok(())
            }
        }
    }

    /// Leave the session with one peer. Returns false if it was unknown.
    pub fn disconnect_peer(&self, peer: &PeerId) -> bool {
        let _membership = self.membership.lock();
        let change = {
            let mut state = self.state.lock();
            let Some(identity) = state.peers.get(peer).map(|r| r.identity.clone()) else {
                return false;
            };
            Self::transition(&mut state, &identity, PeerConnectionState::NotConnected)
        };

        let goodbye = encode_frame(&Frame::Goodbye)
            .and_then(|frame| self.link.transmit(peer, frame, DeliveryMode::Reliable));
        if let Err(e) = goodbye {
            debug!("Goodbye to {} not sent: {}", peer.short(), e);
        }

        self.emit(change);
        true
    }

    /// Leave the session with every peer, connected or connecting
    pub fn disconnect(&self) {
        let _membership = self.membership.lock();
        let peers: Vec<PeerId> = self.state.lock().peers.keys().copied().collect();
        for peer in peers {
            self.disconnect_peer(&peer);
        }
    }
}
