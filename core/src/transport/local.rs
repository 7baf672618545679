//! In-process local network.
//!
//! `LocalMedium` plays the part of the shared radio: every [`LocalLink`]
//! opened on the same medium can discover the others under a namespace and
//! exchange frames with them. Delivery to one receiver is FIFO. Pairs of peers
//! can be partitioned to make transmits fail.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::abstraction::{DeliveryMode, LinkEvent, TransportError};
use super::link::{Link, LinkEvents};
use crate::identity::{PeerId, PeerIdentity};

struct Endpoint {
    identity: PeerIdentity,
    events: mpsc::UnboundedSender<LinkEvent>,
    advertising: Option<String>,
    browsing: Option<String>,
}

impl Endpoint {
    fn notify(&self, event: LinkEvent) {
        // A dropped receiver means the coordinator is gone; its link closes on drop.
        let _ = self.events.send(event);
    }
}

/// Shared in-memory network that links are opened on
#[derive(Default)]
pub struct LocalMedium {
    endpoints: RwLock<HashMap<PeerId, Endpoint>>,
    partitions: RwLock<HashSet<(PeerId, PeerId)>>,
    transmit_attempts: AtomicU64,
}

fn pair(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

impl LocalMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an unopened link endpoint on this medium
    pub fn link(self: &Arc<Self>) -> LocalLink {
        LocalLink {
            medium: Arc::clone(self),
            local: Mutex::new(None),
        }
    }

    /// Make transmits between `a` and `b` fail in both directions
    pub fn partition(&self, a: &PeerId, b: &PeerId) {
        self.partitions.write().insert(pair(a, b));
    }

    /// Undo [`LocalMedium::partition`]
    pub fn heal(&self, a: &PeerId, b: &PeerId) {
        self.partitions.write().remove(&pair(a, b));
    }

    /// Number of transmit calls made on any link of this medium
    pub fn transmit_attempts(&self) -> u64 {
        self.transmit_attempts.load(Ordering::SeqCst)
    }

    /// Number of currently open endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    fn open(&self, local: &PeerIdentity) -> Result<LinkEvents, TransportError> {
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&local.id()) {
            return Err(TransportError::AlreadyOpen);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(
            local.id(),
            Endpoint {
                identity: local.clone(),
                events: tx,
                advertising: None,
                browsing: None,
            },
        );
        debug!("Local medium: opened endpoint {}", local);
        Ok(rx)
    }

    fn start_advertising(&self, local: &PeerId, namespace: &str) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.get_mut(local).ok_or(TransportError::NotOpen)?;
        if endpoint.advertising.as_deref() == Some(namespace) {
            return Ok(());
        }
        endpoint.advertising = Some(namespace.to_string());
        let identity = endpoint.identity.clone();

        for (id, other) in endpoints.iter() {
            if id != local && other.browsing.as_deref() == Some(namespace) {
                other.notify(LinkEvent::PeerFound {
                    peer: identity.clone(),
                });
            }
        }
        Ok(())
    }

    fn stop_advertising(&self, local: &PeerId) {
        let mut endpoints = self.endpoints.write();
        let Some(endpoint) = endpoints.get_mut(local) else {
            return;
        };
        let Some(namespace) = endpoint.advertising.take() else {
            return;
        };
        let identity = endpoint.identity.clone();
        Self::announce_lost(&endpoints, local, &identity, &namespace);
    }

    fn start_browsing(&self, local: &PeerId, namespace: &str) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.write();
        let endpoint = endpoints.get_mut(local).ok_or(TransportError::NotOpen)?;
        if endpoint.browsing.as_deref() == Some(namespace) {
            return Ok(());
        }
        endpoint.browsing = Some(namespace.to_string());

        let endpoint = &endpoints[local];
        for (id, other) in endpoints.iter() {
            if id != local && other.advertising.as_deref() == Some(namespace) {
                endpoint.notify(LinkEvent::PeerFound {
                    peer: other.identity.clone(),
                });
            }
        }
        Ok(())
    }

    fn stop_browsing(&self, local: &PeerId) {
        if let Some(endpoint) = self.endpoints.write().get_mut(local) {
            endpoint.browsing = None;
        }
    }

    fn transmit(&self, from: &PeerId, to: &PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.transmit_attempts.fetch_add(1, Ordering::SeqCst);

        if self.partitions.read().contains(&pair(from, to)) {
            return Err(TransportError::PeerUnreachable(*to));
        }

        let endpoints = self.endpoints.read();
        let sender = endpoints.get(from).ok_or(TransportError::NotOpen)?;
        let receiver = endpoints
            .get(to)
            .ok_or(TransportError::PeerUnreachable(*to))?;

        receiver
            .events
            .send(LinkEvent::Received {
                from: sender.identity.clone(),
                bytes,
            })
            .map_err(|_| TransportError::PeerUnreachable(*to))
    }

    fn close(&self, local: &PeerId) {
        let mut endpoints = self.endpoints.write();
        let Some(endpoint) = endpoints.remove(local) else {
            return;
        };
        if let Some(namespace) = &endpoint.advertising {
            Self::announce_lost(&endpoints, local, &endpoint.identity, namespace);
        }
        for other in endpoints.values() {
            other.notify(LinkEvent::LinkDown {
                peer: endpoint.identity.clone(),
            });
        }
        debug!("Local medium: closed endpoint {}", endpoint.identity);
    }

    fn announce_lost(
        endpoints: &HashMap<PeerId, Endpoint>,
        local: &PeerId,
        identity: &PeerIdentity,
        namespace: &str,
    ) {
        for (id, other) in endpoints.iter() {
            if id != local && other.browsing.as_deref() == Some(namespace) {
                other.notify(LinkEvent::PeerLost {
                    peer: identity.clone(),
                });
            }
        }
    }
}

/// One endpoint on a [`LocalMedium`]
pub struct LocalLink {
    medium: Arc<LocalMedium>,
    local: Mutex<Option<PeerId>>,
}

impl LocalLink {
    fn local_id(&self) -> Result<PeerId, TransportError> {
        (*self.local.lock()).ok_or(TransportError::NotOpen)
    }
}

impl Link for LocalLink {
    fn open(&self, local: &PeerIdentity) -> Result<LinkEvents, TransportError> {
        let mut bound = self.local.lock();
        if bound.is_some() {
            return Err(TransportError::AlreadyOpen);
        }
        let events = self.medium.open(local)?;
        *bound = Some(local.id());
        Ok(events)
    }

    fn start_advertising(&self, namespace: &str) -> Result<(), TransportError> {
        let local = self.local_id()?;
        self.medium.start_advertising(&local, namespace)
    }

    fn stop_advertising(&self) {
        if let Ok(local) = self.local_id() {
            self.medium.stop_advertising(&local);
        }
    }

    fn start_browsing(&self, namespace: &str) -> Result<(), TransportError> {
        let local = self.local_id()?;
        self.medium.start_browsing(&local, namespace)
    }

    fn stop_browsing(&self) {
        if let Ok(local) = self.local_id() {
            self.medium.stop_browsing(&local);
        }
    }

    fn transmit(
        &self,
        to: &PeerId,
        frame: Vec<u8>,
        mode: DeliveryMode,
    ) -> Result<(), TransportError> {
        let local = self.local_id()?;
        trace!("Local medium: {} -> {} ({} bytes, {})", local.short(), to.short(), frame.len(), mode);
        self.medium.transmit(&local, to, frame)
    }

    fn close(&self) {
        if let Some(local) = self.local.lock().take() {
            self.medium.close(&local);
        }
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(medium: &Arc<LocalMedium>, name: &str) -> (LocalLink, PeerIdentity, LinkEvents) {
        let link = medium.link();
        let identity = PeerIdentity::new(name);
        let events = link.open(&identity).unwrap();
        (link, identity, events)
    }

    #[test]
    fn test_browser_finds_existing_advertiser() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        let (b, _b_id, mut b_events) = open(&medium, "b");

        a.start_advertising("ar-collab").unwrap();
        b.start_browsing("ar-collab").unwrap();

        match b_events.try_recv().unwrap() {
            LinkEvent::PeerFound { peer } => assert_eq!(peer, a_id),
            other => panic!("unexpected event {other}"),
        }
    }

    #[test]
    fn test_advertiser_announced_to_existing_browser() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        let (b, _b_id, mut b_events) = open(&medium, "b");

        b.start_browsing("ar-collab").unwrap();
        assert!(b_events.try_recv().is_err());

        a.start_advertising("ar-collab").unwrap();
        assert!(matches!(
            b_events.try_recv().unwrap(),
            LinkEvent::PeerFound { peer } if peer == a_id
        ));

        a.stop_advertising();
        assert!(matches!(
            b_events.try_recv().unwrap(),
            LinkEvent::PeerLost { peer } if peer == a_id
        ));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let medium = LocalMedium::new();
        let (a, _a_id, _a_events) = open(&medium, "a");
        let (b, _b_id, mut b_events) = open(&medium, "b");

        a.start_advertising("ar-collab").unwrap();
        b.start_browsing("other-app").unwrap();
        assert!(b_events.try_recv().is_err());
    }

    #[test]
    fn test_advertising_twice_announces_once() {
        let medium = LocalMedium::new();
        let (a, _a_id, _a_events) = open(&medium, "a");
        let (b, _b_id, mut b_events) = open(&medium, "b");

        b.start_browsing("ar-collab").unwrap();
        a.start_advertising("ar-collab").unwrap();
        a.start_advertising("ar-collab").unwrap();

        assert!(b_events.try_recv().is_ok());
        assert!(b_events.try_recv().is_err());
    }

    #[test]
    fn test_transmit_delivers_in_order() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        let (_b, b_id, mut b_events) = open(&medium, "b");

        a.transmit(&b_id.id(), vec![1], DeliveryMode::Reliable).unwrap();
        a.transmit(&b_id.id(), vec![2], DeliveryMode::Reliable).unwrap();

        for expected in [vec![1u8], vec![2u8]] {
            match b_events.try_recv().unwrap() {
                LinkEvent::Received { from, bytes } => {
                    assert_eq!(from, a_id);
                    assert_eq!(bytes, expected);
                }
                other => panic!("unexpected event {other}"),
            }
        }
        assert_eq!(medium.transmit_attempts(), 2);
    }

    #[test]
    fn test_partition_makes_transmit_fail() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        let (_b, b_id, _b_events) = open(&medium, "b");

        medium.partition(&b_id.id(), &a_id.id());
        let result = a.transmit(&b_id.id(), vec![1], DeliveryMode::BestEffort);
        assert_eq!(result, Err(TransportError::PeerUnreachable(b_id.id())));

        medium.heal(&a_id.id(), &b_id.id());
        assert!(a.transmit(&b_id.id(), vec![1], DeliveryMode::BestEffort).is_ok());
    }

    #[test]
    fn test_transmit_to_unknown_peer_fails() {
        let medium = LocalMedium::new();
        let (a, _a_id, _a_events) = open(&medium, "a");
        let stranger = PeerId::random();
        assert_eq!(
            a.transmit(&stranger, vec![], DeliveryMode::Reliable),
            Err(TransportError::PeerUnreachable(stranger))
        );
    }

    #[test]
    fn test_unopened_link_rejects_operations() {
        let medium = LocalMedium::new();
        let link = medium.link();
        assert_eq!(link.start_advertising("ar-collab"), Err(TransportError::NotOpen));
        assert_eq!(
            link.transmit(&PeerId::random(), vec![], DeliveryMode::Reliable),
            Err(TransportError::NotOpen)
        );
        link.stop_browsing();
        link.close();
    }

    #[test]
    fn test_open_twice_fails() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        assert_eq!(a.open(&a_id).err(), Some(TransportError::AlreadyOpen));
    }

    #[test]
    fn test_close_notifies_peers() {
        let medium = LocalMedium::new();
        let (a, a_id, _a_events) = open(&medium, "a");
        let (b, _b_id, mut b_events) = open(&medium, "b");

        b.start_browsing("ar-collab").unwrap();
        a.start_advertising("ar-collab").unwrap();
        let _found = b_events.try_recv().unwrap();

        a.close();
        assert!(matches!(b_events.try_recv().unwrap(), LinkEvent::PeerLost { .. }));
        assert!(matches!(
            b_events.try_recv().unwrap(),
            LinkEvent::LinkDown { peer } if peer == a_id
        ));
        assert_eq!(medium.endpoint_count(), 1);

        a.close();
        drop(b);
        assert_eq!(medium.endpoint_count(), 0);
    }
}
