//! Callbacks registered by the embedding application.
//!
//! Threading: `on_receive`, `on_peer_joined`, `on_peer_left`,
//! `on_peer_discovered` and the invitation policy run on the coordinator's
//! event-loop task. `on_peer_left` also runs on the caller's thread of
//! `disconnect()` / `shutdown()`, and `on_send_failed` on the caller's thread
//! of a send. The session state lock is never held while a handler runs, so
//! handlers may call back into the coordinator. `on_peer_joined` and
//! `on_peer_left` run under the membership ordering lock; they must not wait
//! on another thread that is itself joining or disconnecting peers.

use crate::identity::PeerIdentity;
use crate::transport::{Payload, TransportError};

pub type ReceiveHandler = Box<dyn Fn(Payload, &PeerIdentity) + Send + Sync>;
pub type PeerHandler = Box<dyn Fn(&PeerIdentity) + Send + Sync>;
pub type AdmissionPolicy = Box<dyn Fn(&PeerIdentity) -> bool + Send + Sync>;
pub type SendFailedHandler = Box<dyn Fn(&PeerIdentity, &TransportError) + Send + Sync>;

pub struct SessionHandlers {
    pub(crate) on_receive: ReceiveHandler,
    pub(crate) on_peer_joined: PeerHandler,
    pub(crate) on_peer_left: PeerHandler,
    pub(crate) on_peer_discovered: AdmissionPolicy,
    pub(crate) on_invitation: AdmissionPolicy,
    pub(crate) on_send_failed: Option<SendFailedHandler>,
}

impl SessionHandlers {
    /// The four callbacks every session needs. Inbound invitations are
    /// accepted unconditionally unless [`SessionHandlers::with_invitation_policy`]
    /// says otherwise.
    pub fn new(
        on_receive: impl Fn(Payload, &PeerIdentity) + Send + Sync + 'static,
        on_peer_joined: impl Fn(&PeerIdentity) + Send + Sync + 'static,
        on_peer_left: impl Fn(&PeerIdentity) + Send + Sync + 'static,
        on_peer_discovered: impl Fn(&PeerIdentity) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_receive: Box::new(on_receive),
            on_peer_joined: Box::new(on_peer_joined),
            on_peer_left: Box::new(on_peer_left),
            on_peer_discovered: Box::new(on_peer_discovered),
            on_invitation: Box::new(|_| true),
            on_send_failed: None,
        }
    }

    /// Decide which inbound invitations the advertiser accepts
    pub fn with_invitation_policy(
        mut self,
        policy: impl Fn(&PeerIdentity) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_invitation = Box::new(policy);
        self
    }

    /// Be told about every send that could not be handed to the link
    pub fn with_send_failed(
        mut self,
        handler: impl Fn(&PeerIdentity, &TransportError) + Send + Sync + 'static,
    ) -> Self {
        self.on_send_failed = Some(Box::new(handler));
        self
    }

    /// Handlers that ignore everything and admit every peer
    pub fn noop() -> Self {
        Self::new(|_, _| {}, |_| {}, |_| {}, |_| true)
    }
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("on_send_failed", &self.on_send_failed.is_some())
            .finish_non_exhaustive()
    }
}
