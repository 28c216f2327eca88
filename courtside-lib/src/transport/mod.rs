//! Peer connection backends.
//!
//! A [`Transport`] allocates one [`PeerLink`] per negotiation attempt. Links
//! never call back into the session; every platform callback is turned into a
//! [`LinkEvent`] pushed on the sender handed to [`Transport::open_link`], and
//! the session dispatches them from a single place.

pub mod loopback;
pub mod rtc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signal::{IceCandidate, SignalKind};

pub use loopback::{LoopbackLink, LoopbackTransport};
pub use rtc::{RtcLink, RtcTransport};

/// Sink for the events a link produces.
pub type LinkEvents = mpsc::UnboundedSender<LinkEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("webrtc: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("no data channel on this link")]
    NoChannel,

    #[error("link closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}

/// Coarse peer connection state, as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    Candidate(IceCandidate),
    GatheringComplete,
    State(LinkState),
    ChannelOpen,
    ChannelClosed,
    ChannelError(String),
    Message(String),
    /// Raised by the session, not the transport: the data channel missed its
    /// open deadline.
    OpenTimedOut,
}

#[async_trait]
pub trait Transport: Send + Sync {
    type Link: PeerLink;

    /// Allocate a fresh connection with no relay or STUN servers.
    async fn open_link(&self, events: LinkEvents) -> Result<Self::Link, TransportError>;
}

#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    /// Create the data channel on the offering side.
    async fn create_channel(&self, label: &str) -> Result<(), TransportError>;

    /// Create an offer and install it as the local description.
    async fn create_offer(&self) -> Result<(), TransportError>;

    /// Create an answer and install it as the local description.
    async fn create_answer(&self) -> Result<(), TransportError>;

    /// Local description, including whatever candidates have been gathered.
    async fn local_sdp(&self) -> Option<String>;

    async fn apply_remote(&self, kind: SignalKind, sdp: &str) -> Result<(), TransportError>;

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    /// Whether candidate gathering already finished.
    fn gathering_complete(&self) -> bool;

    async fn channel_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close_channel(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
