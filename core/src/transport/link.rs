//! The platform seam: whatever radio or socket layer carries the session.
//!
//! Implementers provide discovery under a namespace and frame delivery between
//! opened endpoints. Everything above this trait (invitations, membership,
//! encryption) is handled by the session core.

use tokio::sync::mpsc;

use super::abstraction::{DeliveryMode, LinkEvent, TransportError};
use crate::identity::{PeerId, PeerIdentity};

/// Receiving half of a link's event stream
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Local link endpoint used by one session coordinator.
///
/// Every method returns without waiting on the network. Events are delivered
/// on the stream returned by [`Link::open`], from whatever context the link
/// runs in.
pub trait Link: Send + Sync {
    /// Bind this endpoint to the local identity and start receiving events
    fn open(&self, local: &PeerIdentity) -> Result<LinkEvents, TransportError>;

    /// Announce the local peer under `namespace`
    fn start_advertising(&self, namespace: &str) -> Result<(), TransportError>;

    /// Stop announcing; no-op when not advertising
    fn stop_advertising(&self);

    /// Look for advertisers under `namespace`
    fn start_browsing(&self, namespace: &str) -> Result<(), TransportError>;

    /// Stop looking; no-op when not browsing
    fn stop_browsing(&self);

    /// Hand an encoded frame to the link for delivery to one peer
    fn transmit(&self, to: &PeerId, frame: Vec<u8>, mode: DeliveryMode)
        -> Result<(), TransportError>;

    /// Tear the endpoint down; idempotent
    fn close(&self);
}
