//! Peer transport.
//!
//! The engine only needs [`Transport::broadcast`]; inbound messages are fed to
//! [`crate::PbftEngine::handle_message`] by whoever owns the receiving side
//! (a hub [`Inbox`] pump in-process, the `/p2p/message` route over HTTP).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prioria_core::PublicKey;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::message::NetMessage;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Transport is closed")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound side of a peer channel
pub trait Transport: Send + Sync {
    /// Deliver `message` to every peer except the sender. Delivery is best
    /// effort; an error means the transport itself is unusable.
    fn broadcast(&self, message: NetMessage) -> Result<(), NetError>;

    fn peer_count(&self) -> usize;
}

/// A message on the in-process hub, tagged with its origin
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: PublicKey,
    pub message: NetMessage,
}

/// In-process broadcast hub connecting any number of nodes
#[derive(Debug, Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Envelope>,
}

impl LocalHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        LocalHub { sender }
    }

    /// Attach a node: its outbound endpoint and its inbound queue
    pub fn connect(&self, node: PublicKey) -> (HubEndpoint, Inbox) {
        let endpoint = HubEndpoint {
            node,
            sender: self.sender.clone(),
        };
        let inbox = Inbox {
            node,
            receiver: self.sender.subscribe(),
        };
        (endpoint, inbox)
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        LocalHub::new(4096)
    }
}

#[derive(Debug, Clone)]
pub struct HubEndpoint {
    node: PublicKey,
    sender: broadcast::Sender<Envelope>,
}

impl Transport for HubEndpoint {
    fn broadcast(&self, message: NetMessage) -> Result<(), NetError> {
        let kind = message.kind_name();
        match self.sender.send(Envelope {
            from: self.node,
            message,
        }) {
            Ok(receivers) => debug!("{} broadcast {} to {} inboxes", self.node, kind, receivers),
            // Nobody listening is not a transport failure
            Err(_) => debug!("{} broadcast {} with no inboxes attached", self.node, kind),
        }
        Ok(())
    }

    fn peer_count(&self) -> usize {
        self.sender.receiver_count().saturating_sub(1)
    }
}

/// Inbound queue of one hub node; skips the node's own messages
#[derive(Debug)]
pub struct Inbox {
    node: PublicKey,
    receiver: broadcast::Receiver<Envelope>,
}

impl Inbox {
    /// Next message from another node, or `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<NetMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.from == self.node => continue,
                Ok(envelope) => return Some(envelope.message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("{} inbox lagged, {} messages dropped", self.node, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Broadcasts to peer nodes by POSTing JSON to `{peer}/p2p/message`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    peers: Arc<Vec<String>>,
    reachable: Arc<Mutex<HashSet<String>>>,
}

impl HttpTransport {
    pub fn new(peers: Vec<String>, timeout: Duration) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetError::Http(e.to_string()))?;
        let peers = peers
            .into_iter()
            .map(|p| p.trim_end_matches('/').to_string())
            .collect();
        Ok(HttpTransport {
            client,
            peers: Arc::new(peers),
            reachable: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    fn mark(reachable: &Mutex<HashSet<String>>, peer: &str, ok: bool) {
        let mut set = reachable.lock().unwrap_or_else(|e| e.into_inner());
        if ok {
            set.insert(peer.to_string());
        } else {
            set.remove(peer);
        }
    }
}

impl Transport for HttpTransport {
    fn broadcast(&self, message: NetMessage) -> Result<(), NetError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| NetError::Closed)?;
        let body = serde_json::to_vec(&message).map_err(|e| NetError::Serialization(e.to_string()))?;
        let kind = message.kind_name();

        for peer in self.peers.iter() {
            let url = format!("{}/p2p/message", peer);
            let client = self.client.clone();
            let reachable = self.reachable.clone();
            let peer = peer.clone();
            let body = body.clone();

            handle.spawn(async move {
                let response = client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await;
                match response {
                    Ok(resp) if resp.status().is_success() => {
                        Self::mark(&reachable, &peer, true);
                    }
                    Ok(resp) => {
                        Self::mark(&reachable, &peer, true);
                        debug!("Peer {} answered {} with {}", peer, kind, resp.status());
                    }
                    Err(e) => {
                        Self::mark(&reachable, &peer, false);
                        warn!("Failed to send {} to {}: {}", kind, peer, e);
                    }
                }
            });
        }
        Ok(())
    }

    fn peer_count(&self) -> usize {
        self.reachable.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::KeyPair;

    fn sync_request(from: &str) -> NetMessage {
        NetMessage::SyncRequest {
            from: from.to_string(),
            from_index: 0,
        }
    }

    #[tokio::test]
    async fn test_hub_skips_own_messages() {
        let hub = LocalHub::new(16);
        let a = KeyPair::generate().public;
        let b = KeyPair::generate().public;
        let (a_out, mut a_in) = hub.connect(a);
        let (b_out, mut b_in) = hub.connect(b);

        assert_eq!(a_out.peer_count(), 1);
        a_out.broadcast(sync_request("a")).unwrap();
        b_out.broadcast(sync_request("b")).unwrap();

        assert_eq!(b_in.recv().await, Some(sync_request("a")));
        assert_eq!(a_in.recv().await, Some(sync_request("b")));
    }

    #[test]
    fn test_broadcast_without_listeners_is_ok() {
        let hub = LocalHub::new(4);
        let (endpoint, inbox) = hub.connect(KeyPair::generate().public);
        drop(inbox);
        assert!(endpoint.broadcast(sync_request("a")).is_ok());
        assert_eq!(endpoint.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_http_transport_tolerates_unreachable_peers() {
        let transport = HttpTransport::new(
            vec!["http://127.0.0.1:9/".to_string()],
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(transport.peers(), ["http://127.0.0.1:9"]);
        assert!(transport.broadcast(sync_request("a")).is_ok());
        assert_eq!(transport.peer_count(), 0);
    }
}
