//! Browser: finds advertisers and decides whom to invite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::handlers::SessionHandlers;
use crate::identity::PeerIdentity;
use crate::transport::{InvitationId, Link, TransportError, TransportSession};

pub struct Browser {
    namespace: String,
    link: Arc<dyn Link>,
    session: Arc<TransportSession>,
    handlers: Arc<SessionHandlers>,
    invitation_timeout: Duration,
    browsing: AtomicBool,
}

impl Browser {
    pub fn new(
        namespace: impl Into<String>,
        link: Arc<dyn Link>,
        session: Arc<TransportSession>,
        handlers: Arc<SessionHandlers>,
        invitation_timeout: Duration,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            link,
            session,
            handlers,
            invitation_timeout,
            browsing: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn invitation_timeout(&self) -> Duration {
        self.invitation_timeout
    }

    /// Start browsing; no-op if already started
    pub fn start(&self) -> Result<(), TransportError> {
        if self.browsing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.link.start_browsing(&self.namespace) {
            self.browsing.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!("🔍 Browsing for peers under {:?}", self.namespace);
        Ok(())
    }

    /// Stop browsing. Invitations already sent run to completion or timeout.
    pub fn stop(&self) {
        if self.browsing.swap(false, Ordering::SeqCst) {
            self.link.stop_browsing();
            info!("Stopped browsing under {:?}", self.namespace);
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing.load(Ordering::SeqCst)
    }

    /// An advertiser came into view.
    ///
    /// Runs the admission predicate and, if it accepts, sends exactly one
    /// invitation. Returns its id.
    pub fn on_peer_discovered(&self, peer: &PeerIdentity) -> Option<InvitationId> {
        if !self.is_browsing() {
            debug!("Ignoring discovery of {}: not browsing", peer);
            return None;
        }
        if peer.id() == self.session.local_peer().id() {
            return None;
        }

        debug!("Discovered {}", peer);
        if !(self.handlers.on_peer_discovered)(peer) {
            debug!("Admission policy declined {}", peer);
            return None;
        }

        match self.session.invite(peer, self.invitation_timeout) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to invite {}: {}", peer, e);
                None
            }
        }
    }

    /// The peer stopped advertising. Joined peers are tracked by the session.
    pub fn on_peer_lost(&self, peer: &PeerIdentity) {
        debug!("Lost sight of {}", peer);
    }
}
