use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::RwLock;
use webrtc::{
    api::{API, APIBuilder},
    data_channel::{
        RTCDataChannel, data_channel_message::DataChannelMessage,
        data_channel_state::RTCDataChannelState,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_gatherer_state::RTCIceGathererState,
        ice_gathering_state::RTCIceGatheringState,
    },
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
};

use super::{LinkEvent, LinkEvents, LinkState, PeerLink, Transport, TransportError};
use crate::signal::{IceCandidate, SignalKind};

/// WebRTC backend for direct, local-network pairing.
#[derive(Clone)]
pub struct RtcTransport {
    api: Arc<API>,
}

impl RtcTransport {
    pub fn new() -> Self {
        Self { api: Arc::new(APIBuilder::new().build()) }
    }
}

impl Default for RtcTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RtcTransport {
    type Link = RtcLink;

    async fn open_link(&self, events: LinkEvents) -> Result<RtcLink, TransportError> {
        // Direct path only: no STUN, no TURN.
        let config = RTCConfiguration { ice_servers: Vec::new(), ..Default::default() };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let link = RtcLink { pc, channel: Arc::new(RwLock::new(None)), events };
        link.observe();
        Ok(link)
    }
}

pub struct RtcLink {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    events: LinkEvents,
}

impl RtcLink {
    fn observe(&self) {
        let events = self.events.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(LinkEvent::Candidate(IceCandidate::from(init)));
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let events = self.events.clone();
        self.pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!("ICE gathering: {}", state);
            if matches!(state, RTCIceGathererState::Complete) {
                let _ = events.send(LinkEvent::GatheringComplete);
            }
            Box::pin(std::future::ready(()))
        }));

        let events = self.events.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = events.send(LinkEvent::State(link_state(state)));
            Box::pin(std::future::ready(()))
        }));

        // The answering side receives its channel here.
        let events = self.events.clone();
        let slot = Arc::clone(&self.channel);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            let slot = Arc::clone(&slot);
            Box::pin(async move {
                info!("Data channel received: {}", dc.label());
                // Sends must find the channel before any open event is seen.
                *slot.write().await = Some(Arc::clone(&dc));
                // Received channels are often open already, and frames can
                // then be queued before `on_open` gets to run.
                if dc.ready_state() == RTCDataChannelState::Open {
                    let _ = events.send(LinkEvent::ChannelOpen);
                }
                wire_channel(&dc, &events);
            })
        }));
    }
}

fn wire_channel(dc: &Arc<RTCDataChannel>, events: &LinkEvents) {
    let tx = events.clone();
    dc.on_open(Box::new(move || {
        let _ = tx.send(LinkEvent::ChannelOpen);
        Box::pin(std::future::ready(()))
    }));

    let tx = events.clone();
    dc.on_close(Box::new(move || {
        let _ = tx.send(LinkEvent::ChannelClosed);
        Box::pin(std::future::ready(()))
    }));

    let tx = events.clone();
    dc.on_error(Box::new(move |err: webrtc::Error| {
        let _ = tx.send(LinkEvent::ChannelError(err.to_string()));
        Box::pin(std::future::ready(()))
    }));

    let tx = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if !msg.is_string {
            warn!("Ignoring binary frame of {} bytes", msg.data.len());
        } else {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(LinkEvent::Message(text));
                }
                Err(e) => warn!("Ignoring non UTF-8 text frame: {}", e),
            }
        }
        Box::pin(std::future::ready(()))
    }));
}

fn link_state(state: RTCPeerConnectionState) -> LinkState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
        RTCPeerConnectionState::Connecting => LinkState::Connecting,
        RTCPeerConnectionState::Connected => LinkState::Connected,
        RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
        RTCPeerConnectionState::Failed => LinkState::Failed,
        RTCPeerConnectionState::Closed => LinkState::Closed,
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<&IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: &IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        }
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn create_channel(&self, label: &str) -> Result<(), TransportError> {
        let dc = self.pc.create_data_channel(label, None).await?;
        wire_channel(&dc, &self.events);
        *self.channel.write().await = Some(dc);
        Ok(())
    }

    async fn create_offer(&self) -> Result<(), TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), TransportError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        Ok(())
    }

    async fn local_sdp(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn apply_remote(&self, kind: SignalKind, sdp: &str) -> Result<(), TransportError> {
        let desc = match kind {
            SignalKind::Offer => RTCSessionDescription::offer(sdp.to_owned())?,
            SignalKind::Answer => RTCSessionDescription::answer(sdp.to_owned())?,
        };
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.pc.add_ice_candidate(RTCIceCandidateInit::from(candidate)).await?;
        Ok(())
    }

    fn gathering_complete(&self) -> bool {
        self.pc.ice_gathering_state() == RTCIceGatheringState::Complete
    }

    async fn channel_open(&self) -> bool {
        self.channel
            .read()
            .await
            .as_ref()
            .is_some_and(|dc| dc.ready_state() == RTCDataChannelState::Open)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let guard = self.channel.read().await;
        let dc = guard.as_ref().ok_or(TransportError::NoChannel)?;
        dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    async fn close_channel(&self) -> Result<(), TransportError> {
        let dc = self.channel.write().await.take();
        if let Some(dc) = dc {
            dc.close().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}
