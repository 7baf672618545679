//! Pending invitations, from invite until accept, reject, or timeout.

use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::identity::{PeerId, PeerIdentity};
use crate::transport::frame::InvitationId;

/// Default time an invitation waits for an answer
pub const DEFAULT_INVITATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Which side issued the invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We invited the peer and wait for its reply
    Outbound,
    /// The peer invited us, we accepted and wait for its confirmation
    Inbound,
}

#[derive(Debug, Clone)]
pub struct InvitationContext {
    pub id: InvitationId,
    pub peer: PeerIdentity,
    pub direction: Direction,
    pub expires_at: Instant,
}

impl InvitationContext {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// All invitations currently in flight for one session
#[derive(Debug, Default)]
pub struct InvitationTable {
    pending: HashMap<InvitationId, InvitationContext>,
}

impl InvitationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, context: InvitationContext) {
        self.pending.insert(context.id, context);
    }

    /// Remove and return the invitation if it matches the peer and direction.
    ///
    /// A reply from a different peer than the one invited leaves the entry in place.
    pub fn take(
        &mut self,
        id: &InvitationId,
        peer: &PeerId,
        direction: Direction,
    ) -> Option<InvitationContext> {
        match self.pending.get(id) {
            Some(ctx) if ctx.peer.id() == *peer && ctx.direction == direction => {
                self.pending.remove(id)
            }
            _ => None,
        }
    }

    pub fn remove(&mut self, id: &InvitationId) -> Option<InvitationContext> {
        self.pending.remove(id)
    }

    /// Drop every invitation involving `peer`
    pub fn discard_peer(&mut self, peer: &PeerId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, ctx| ctx.peer.id() != *peer);
        before - self.pending.len()
    }

    pub fn has_pending_for(&self, peer: &PeerId) -> bool {
        self.pending.values().any(|ctx| ctx.peer.id() == *peer)
    }

    /// Remove and return everything that expired at or before `now`
    pub fn drain_expired(&mut self, now: Instant) -> Vec<InvitationContext> {
        let expired: Vec<InvitationId> = self
            .pending
            .values()
            .filter(|ctx| ctx.is_expired(now))
            .map(|ctx| ctx.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.pending.values().map(|ctx| ctx.expires_at).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn snapshot(&self) -> Vec<InvitationContext> {
        self.pending.values().cloned().collect()
    }
}
