//! In-process transport: links registered on the same [`LoopbackTransport`]
//! can pair with each other by exchanging their descriptions, exactly as two
//! browser contexts would, but without any sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use super::{LinkEvent, LinkEvents, PeerLink, Transport, TransportError};
use crate::signal::{IceCandidate, SignalKind};

const ID_ATTRIBUTE: &str = "a=x-loopback:";

/// Host candidates each link reports while gathering.
const CANDIDATES_PER_LINK: u64 = 2;

struct Registration {
    events: LinkEvents,
    channel_open: Arc<AtomicBool>,
}

/// Shared rendezvous for loopback links.
#[derive(Clone)]
pub struct LoopbackTransport {
    links: Arc<Mutex<HashMap<u64, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            links: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Links currently registered and not yet closed.
    pub async fn live_links(&self) -> usize {
        self.links.lock().await.len()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    type Link = LoopbackLink;

    async fn open_link(&self, events: LinkEvents) -> Result<LoopbackLink, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channel_open = Arc::new(AtomicBool::new(false));
        self.links.lock().await.insert(
            id,
            Registration { events: events.clone(), channel_open: Arc::clone(&channel_open) },
        );
        debug!("loopback link {} registered", id);
        Ok(LoopbackLink {
            id,
            transport: self.clone(),
            events,
            channel_open,
            gathered: AtomicBool::new(false),
            slots: Mutex::new(Slots::default()),
        })
    }
}

#[derive(Default)]
struct Slots {
    has_channel: bool,
    local_sdp: Option<String>,
    remote: Option<u64>,
}

pub struct LoopbackLink {
    id: u64,
    transport: LoopbackTransport,
    events: LinkEvents,
    channel_open: Arc<AtomicBool>,
    gathered: AtomicBool,
    slots: Mutex<Slots>,
}

impl LoopbackLink {
    fn description(&self, kind: SignalKind) -> String {
        format!(
            "v=0\r\no=- {id} 2 IN IP4 127.0.0.1\r\ns=loopback {kind}\r\nt=0 0\r\n{ID_ATTRIBUTE}{id}\r\n",
            id = self.id,
        )
    }

    fn gather(&self) {
        for n in 0..CANDIDATES_PER_LINK {
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{n} 1 udp 2130706431 127.0.0.1 {port} typ host",
                    port = 40000 + self.id * 10 + n,
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            let _ = self.events.send(LinkEvent::Candidate(candidate));
        }
        self.gathered.store(true, Ordering::Release);
        let _ = self.events.send(LinkEvent::GatheringComplete);
    }

    async fn set_local(&self, kind: SignalKind) {
        self.slots.lock().await.local_sdp = Some(self.description(kind));
        self.gather();
    }
}

fn peer_id(sdp: &str) -> Option<u64> {
    sdp.lines()
        .find_map(|line| line.trim().strip_prefix(ID_ATTRIBUTE))
        .and_then(|id| id.parse().ok())
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn create_channel(&self, _label: &str) -> Result<(), TransportError> {
        self.slots.lock().await.has_channel = true;
        Ok(())
    }

    async fn create_offer(&self) -> Result<(), TransportError> {
        self.set_local(SignalKind::Offer).await;
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), TransportError> {
        if self.slots.lock().await.remote.is_none() {
            return Err(TransportError::Rejected("no remote offer to answer".into()));
        }
        self.set_local(SignalKind::Answer).await;
        Ok(())
    }

    async fn local_sdp(&self) -> Option<String> {
        self.slots.lock().await.local_sdp.clone()
    }

    async fn apply_remote(&self, kind: SignalKind, sdp: &str) -> Result<(), TransportError> {
        let peer = peer_id(sdp)
            .ok_or_else(|| TransportError::Rejected("not a loopback description".into()))?;
        let mut slots = self.slots.lock().await;
        if kind == SignalKind::Answer && slots.local_sdp.is_none() {
            return Err(TransportError::Rejected("answer without a local offer".into()));
        }
        let links = self.transport.links.lock().await;
        let Some(remote) = links.get(&peer) else {
            return Err(TransportError::Rejected(format!("loopback peer {peer} is gone")));
        };
        slots.remote = Some(peer);

        // Applying the answer completes the handshake: both ends see the
        // channel open, the answering end receiving it passively.
        if kind == SignalKind::Answer && slots.has_channel {
            self.channel_open.store(true, Ordering::Release);
            remote.channel_open.store(true, Ordering::Release);
            let _ = self.events.send(LinkEvent::ChannelOpen);
            let _ = remote.events.send(LinkEvent::ChannelOpen);
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        if self.slots.lock().await.remote.is_none() {
            return Err(TransportError::Rejected("candidate before remote description".into()));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(TransportError::Rejected(format!(
                "unparseable candidate {:?}",
                candidate.candidate
            )));
        }
        Ok(())
    }

    fn gathering_complete(&self) -> bool {
        self.gathered.load(Ordering::Acquire)
    }

    async fn channel_open(&self) -> bool {
        self.channel_open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.channel_open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let remote = self.slots.lock().await.remote.ok_or(TransportError::NoChannel)?;
        let links = self.transport.links.lock().await;
        let peer = links.get(&remote).ok_or(TransportError::Closed)?;
        peer.events
            .send(LinkEvent::Message(text.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    async fn close_channel(&self) -> Result<(), TransportError> {
        if !self.channel_open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let remote = self.slots.lock().await.remote;
        let links = self.transport.links.lock().await;
        if let Some(peer) = remote.and_then(|id| links.get(&id)) {
            if peer.channel_open.swap(false, Ordering::AcqRel) {
                let _ = peer.events.send(LinkEvent::ChannelClosed);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_channel().await?;
        if self.transport.links.lock().await.remove(&self.id).is_some() {
            debug!("loopback link {} closed", self.id);
        }
        Ok(())
    }
}
