//! Session coordinator: builds the identity, transport session, advertiser
//! and browser, and runs the event loop that feeds link events to them.
//!
//! Every link event is handled on one tokio task, so invitation bookkeeping
//! never races with itself. Sends and queries go straight to the transport
//! session from the caller's thread.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::discovery::{Advertiser, Browser};
use crate::handlers::SessionHandlers;
use crate::identity::{LocalIdentity, PeerIdentity};
use crate::transport::{
    decode_frame, Capability, DeliveryMode, Frame, Link, LinkEvent, LinkEvents,
    PeerConnectionState, SendOutcome, TransportSession,
};
use crate::CollabError;

pub struct SessionCoordinator {
    config: SessionConfig,
    link: Arc<dyn Link>,
    session: Arc<TransportSession>,
    advertiser: Arc<Advertiser>,
    browser: Arc<Browser>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    event_loop: Option<JoinHandle<Result<(), CollabError>>>,
}

impl SessionCoordinator {
    /// Build a session on `link` and spawn its event loop.
    ///
    /// Must be called from within a tokio runtime. Starts advertising and
    /// browsing unless `config.auto_start` is false.
    pub fn new(
        config: SessionConfig,
        link: Arc<dyn Link>,
        handlers: SessionHandlers,
    ) -> Result<Self, CollabError> {
        config.validate()?;

        let identity = LocalIdentity::generate(config.display_name.clone());
        let events = link.open(identity.peer())?;
        info!(
            "Session link open for {} (namespace {:?})",
            identity.peer(),
            config.namespace
        );

        let handlers = Arc::new(handlers);
        let session = Arc::new(TransportSession::new(
            identity,
            link.clone(),
            handlers.clone(),
            config.encryption,
            config.unsupported_capability,
            config.invitation_timeout(),
        ));
        let advertiser = Arc::new(Advertiser::new(
            config.namespace.clone(),
            link.clone(),
            session.clone(),
            handlers.clone(),
        ));
        let browser = Arc::new(Browser::new(
            config.namespace.clone(),
            link.clone(),
            session.clone(),
            handlers,
            config.invitation_timeout(),
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let dispatcher = Dispatcher {
            session: session.clone(),
            advertiser: advertiser.clone(),
            browser: browser.clone(),
        };
        let event_loop = tokio::spawn(run_event_loop(dispatcher, events, shutdown_rx));

        let coordinator = Self {
            config,
            link,
            session,
            advertiser,
            browser,
            shutdown_tx: Some(shutdown_tx),
            event_loop: Some(event_loop),
        };

        if coordinator.config.auto_start {
            coordinator.start()?;
        }
        Ok(coordinator)
    }

    /// Start advertising and browsing
    pub fn start(&self) -> Result<(), CollabError> {
        self.advertiser.start()?;
        self.browser.start()?;
        Ok(())
    }

    /// Stop advertising and browsing. Existing members stay connected.
    pub fn stop(&self) {
        self.advertiser.stop();
        self.browser.stop();
    }

    pub fn send_to_all_connected_peers(&self, data: &[u8], reliable: bool) -> SendOutcome {
        let peers: Vec<PeerIdentity> = self.session.connected_peers().into_iter().collect();
        self.session
            .send(data, DeliveryMode::from_reliable(reliable), &peers)
    }

    pub fn send_to_peers(&self, data: &[u8], reliable: bool, peers: &[PeerIdentity]) -> SendOutcome {
        self.session
            .send(data, DeliveryMode::from_reliable(reliable), peers)
    }

    pub fn connected_peers(&self) -> HashSet<PeerIdentity> {
        self.session.connected_peers()
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        self.session.local_peer()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn advertiser(&self) -> &Advertiser {
        &self.advertiser
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Leave every peer; advertising and browsing continue
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Whether the event loop is still processing link events
    pub fn is_running(&self) -> bool {
        self.event_loop
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop discovery, leave every peer, end the event loop and close the link.
    ///
    /// Returns the error the event loop ended on, if any.
    pub async fn shutdown(mut self) -> Result<(), CollabError> {
        self.stop();
        self.session.disconnect();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let result = match self.event_loop.take() {
            Some(handle) => handle
                .await
                .unwrap_or_else(|e| Err(CollabError::Terminated(e.to_string()))),
            None => Ok(()),
        };

        self.link.close();
        info!("Session for {} shut down", self.local_peer());
        result
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.take() {
            handle.abort();
        }
        self.link.close();
    }
}

struct Dispatcher {
    session: Arc<TransportSession>,
    advertiser: Arc<Advertiser>,
    browser: Arc<Browser>,
}

impl Dispatcher {
    fn handle_event(&self, event: LinkEvent) -> Result<(), CollabError> {
        match event {
            LinkEvent::PeerFound { peer } => {
                self.browser.on_peer_discovered(&peer);
            }
            LinkEvent::PeerLost { peer } => self.browser.on_peer_lost(&peer),
            LinkEvent::LinkDown { peer } => {
                self.session
                    .on_peer_state_changed(&peer, PeerConnectionState::NotConnected);
            }
            LinkEvent::Received { from, bytes } => match decode_frame(&bytes) {
                Ok(frame) => {
                    trace!("{} frame from {}", frame.kind(), from);
                    self.handle_frame(&from, frame)?;
                }
                Err(e) => warn!("Dropping undecodable frame from {}: {}", from, e),
            },
        }
        Ok(())
    }

    fn handle_frame(&self, from: &PeerIdentity, frame: Frame) -> Result<(), CollabError> {
        match frame {
            Frame::Invite(invite) => self.advertiser.on_invitation_received(from, &invite),
            Frame::InviteReply(reply) => self.session.on_invitation_reply(from, &reply),
            Frame::Confirm { invitation_id } => {
                self.session.on_invitation_confirmed(from, invitation_id)
            }
            Frame::Data { mode, body } => self.session.on_data_received(from, mode, body),
            Frame::Goodbye => self
                .session
                .on_peer_state_changed(from, PeerConnectionState::NotConnected),
            Frame::Stream { name } => {
                return self
                    .session
                    .on_unsupported_capability(from, Capability::Stream(name));
            }
            Frame::Resource { name } => {
                return self
                    .session
                    .on_unsupported_capability(from, Capability::Resource(name));
            }
        }
        Ok(())
    }

    /// Tear down after a fatal error so peers see us leave
    fn terminate(&self) {
        self.advertiser.stop();
        self.browser.stop();
        self.session.disconnect();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_event_loop(
    dispatcher: Dispatcher,
    mut events: LinkEvents,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), CollabError> {
    debug!(
        "Session event loop started for {}",
        dispatcher.session.local_peer()
    );

    loop {
        let next_expiry = dispatcher.session.next_invitation_expiry();

        tokio::select! {
            _ = &mut shutdown => {
                debug!("Session event loop stopping");
                return Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Link event stream closed");
                    return Ok(());
                };
                if let Err(e) = dispatcher.handle_event(event) {
                    error!("Session terminated: {}", e);
                    dispatcher.terminate();
                    return Err(e);
                }
            }
            _ = wait_until(next_expiry) => {
                dispatcher.session.expire_invitations(Instant::now());
            }
        }
    }
}
