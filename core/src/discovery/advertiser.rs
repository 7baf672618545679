//! Advertiser: publishes the local peer and answers inbound invitations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::handlers::SessionHandlers;
use crate::identity::PeerIdentity;
use crate::transport::{Invite, Link, TransportError, TransportSession};

pub struct Advertiser {
    namespace: String,
    link: Arc<dyn Link>,
    session: Arc<TransportSession>,
    handlers: Arc<SessionHandlers>,
    advertising: AtomicBool,
}

impl Advertiser {
    pub fn new(
        namespace: impl Into<String>,
        link: Arc<dyn Link>,
        session: Arc<TransportSession>,
        handlers: Arc<SessionHandlers>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            link,
            session,
            handlers,
            advertising: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Start advertising; no-op if already started
    pub fn start(&self) -> Result<(), TransportError> {
        if self.advertising.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.link.start_advertising(&self.namespace) {
            self.advertising.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(
            "📡 Advertising {} under {:?}",
            self.session.local_peer(),
            self.namespace
        );
        Ok(())
    }

    /// Stop advertising. Invitations already accepted still complete.
    pub fn stop(&self) {
        if self.advertising.swap(false, Ordering::SeqCst) {
            self.link.stop_advertising();
            info!("Stopped advertising under {:?}", self.namespace);
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    /// An invitation arrived from `from`.
    ///
    /// Ignored while not advertising, so the inviter's invitation times out.
    /// Otherwise the invitation policy decides, and an accepted invitation is
    /// handed to the transport session, which reports the outcome.
    pub fn on_invitation_received(&self, from: &PeerIdentity, invite: &Invite) {
        if !self.is_advertising() {
            debug!(
                "Ignoring invitation {} from {}: not advertising",
                invite.invitation_id, from
            );
            return;
        }

        if !(self.handlers.on_invitation)(from) {
            debug!("Invitation policy declined {}", from);
            if let Err(e) = self.session.decline_invitation(from, invite.invitation_id) {
                warn!("Failed to decline invitation from {}: {}", from, e);
            }
            return;
        }

        if let Err(e) = self.session.accept_invitation(from, invite) {
            warn!("Failed to accept invitation from {}: {}", from, e);
        }
    }
}
