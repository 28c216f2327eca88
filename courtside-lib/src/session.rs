//! Pairing lifecycle for both ends of the remote control.
//!
//! The player offers, the remote answers. Everything the underlying link
//! reports arrives as a [`LinkEvent`] and is dispatched by
//! [`PairingSession::handle_event`]; nothing else mutates session state.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channel::{CommandChannel, Delivery};
use crate::context::SessionObserver;
use crate::deck::{PlaybackDeck, PlayerDesk};
use crate::message::{Catalog, CommandMessage, CommandName, Message, NowPlaying};
use crate::signal::{self, IceCandidate, SignalError, SignalKind, SignalPayload};
use crate::transport::{LinkEvent, LinkState, PeerLink, Transport, TransportError};

/// Label of the data channel the player creates.
pub const DEFAULT_CHANNEL_LABEL: &str = "remote";

/// How long a connected or answered link may take to open its data channel.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum PairingError {
    #[error(transparent)]
    MalformedSignal(#[from] SignalError),

    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("could not apply ICE candidate {candidate:?}: {source}")]
    CandidateApplyFailed {
        candidate: String,
        #[source]
        source: TransportError,
    },

    #[error("negotiation failed: {0}")]
    NegotiationFailed(#[from] TransportError),

    #[error("no pending offer to apply an answer to")]
    NoActiveOffer,

    #[error("the {0} cannot do that")]
    WrongRole(Role),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PairingState {
    Idle,
    Negotiating,
    /// Player only: offer handed out, answer not yet applied.
    AwaitingRemoteAnswer,
    /// Remote only: answer handed out, channel not yet open.
    AwaitingLocalAnswer,
    Open,
    Closed,
    Failed,
}

impl PairingState {
    /// Still waiting for the data channel to open.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            PairingState::Negotiating
                | PairingState::AwaitingRemoteAnswer
                | PairingState::AwaitingLocalAnswer
        )
    }
}

impl std::fmt::Display for PairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PairingState::Idle => "idle",
            PairingState::Negotiating => "connecting",
            PairingState::AwaitingRemoteAnswer => "offer ready",
            PairingState::AwaitingLocalAnswer => "answer ready",
            PairingState::Open => "connected",
            PairingState::Closed => "disconnected",
            PairingState::Failed => "error",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Plays the audio and offers the connection.
    Player,
    /// Sends commands and answers the offer.
    Remote,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Player => f.write_str("player"),
            Role::Remote => f.write_str("remote"),
        }
    }
}

/// What the remote last heard from the player.
#[derive(Debug, Default)]
pub struct RemoteMirror {
    pub catalog: Catalog,
    pub now_playing: Option<NowPlaying>,
}

enum Endpoint {
    Player(PlayerDesk),
    Remote(RemoteMirror),
}

pub struct PairingSession<T: Transport> {
    transport: T,
    label: String,
    state: PairingState,
    link: Option<Arc<T::Link>>,
    events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    candidates: Vec<IceCandidate>,
    gathered: bool,
    open_timeout: Duration,
    open_deadline: Option<Instant>,
    channel: CommandChannel<T::Link>,
    endpoint: Endpoint,
    observer: Arc<dyn SessionObserver>,
}

impl<T: Transport> PairingSession<T> {
    /// The offering end, driving `deck` on behalf of the remote.
    pub fn player(transport: T, deck: Box<dyn PlaybackDeck>, observer: Arc<dyn SessionObserver>) -> Self {
        Self::with_endpoint(transport, Endpoint::Player(PlayerDesk::new(deck)), observer)
    }

    /// Like [`PairingSession::player`], with a fixed seed for random picks.
    pub fn player_seeded(
        transport: T,
        deck: Box<dyn PlaybackDeck>,
        seed: u64,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self::with_endpoint(transport, Endpoint::Player(PlayerDesk::with_seed(deck, seed)), observer)
    }

    /// The answering end.
    pub fn remote(transport: T, observer: Arc<dyn SessionObserver>) -> Self {
        Self::with_endpoint(transport, Endpoint::Remote(RemoteMirror::default()), observer)
    }

    fn with_endpoint(transport: T, endpoint: Endpoint, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            transport,
            label: DEFAULT_CHANNEL_LABEL.to_owned(),
            state: PairingState::Idle,
            link: None,
            events: None,
            candidates: Vec::new(),
            gathered: false,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            open_deadline: None,
            channel: CommandChannel::detached(),
            endpoint,
            observer,
        }
    }

    pub fn with_channel_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// A pending session whose channel does not open within `timeout` of the
    /// answer being applied (or the link connecting) fails, so the operator
    /// can start over.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::Player(_) => Role::Player,
            Endpoint::Remote(_) => Role::Remote,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Candidates gathered for the current attempt, in arrival order.
    pub fn candidates(&self) -> &[IceCandidate] {
        &self.candidates
    }

    /// Remote side view of the player; `None` on the player.
    pub fn mirror(&self) -> Option<&RemoteMirror> {
        match &self.endpoint {
            Endpoint::Remote(mirror) => Some(mirror),
            Endpoint::Player(_) => None,
        }
    }

    // ───────────── negotiation ─────────────

    /// Player: start over with a fresh offer and return its token.
    pub async fn start_as_offerer(&mut self) -> Result<String, PairingError> {
        self.require(Role::Player)?;
        self.teardown().await;
        self.set_state(PairingState::Negotiating, "creating offer");

        match self.negotiate_offer().await {
            Ok(token) => {
                self.set_state(PairingState::AwaitingRemoteAnswer, "offer ready");
                self.log("Offer ready, hand it to the remote.");
                Ok(token)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn negotiate_offer(&mut self) -> Result<String, PairingError> {
        let link = self.open_link().await?;
        link.create_channel(&self.label).await?;
        link.create_offer().await?;
        self.await_gathering().await?;
        self.local_token(SignalKind::Offer).await
    }

    /// Player: apply the answer pasted back from the remote. The session opens
    /// once the data channel reports open.
    pub async fn accept_answer(&mut self, token: &str) -> Result<(), PairingError> {
        self.require(Role::Player)?;
        if self.state != PairingState::AwaitingRemoteAnswer || self.link.is_none() {
            self.log("No active offer, start a new one.");
            return Err(PairingError::NoActiveOffer);
        }

        // A bad paste leaves the offer in place for another try.
        let payload = match signal::decode(token) {
            Ok(payload) => payload,
            Err(e) => return Err(self.reject(e.into())),
        };
        if payload.kind != SignalKind::Answer {
            return Err(self.reject(PairingError::InvalidAnswer(format!("got an {}", payload.kind))));
        }
        if payload.sdp.trim().is_empty() {
            return Err(self.reject(PairingError::InvalidAnswer("missing sdp".into())));
        }

        if let Err(e) = self.apply_remote(&payload).await {
            return Err(self.fail(e).await);
        }
        self.set_state(PairingState::Negotiating, "answer applied");
        self.arm_open_deadline();
        self.log("Answer applied, waiting for the data channel.");
        Ok(())
    }

    /// Remote: start over from the player's offer and return the answer token.
    pub async fn start_as_answerer(&mut self, offer_token: &str) -> Result<String, PairingError> {
        self.require(Role::Remote)?;
        self.teardown().await;
        self.set_state(PairingState::Negotiating, "processing offer");

        match self.negotiate_answer(offer_token).await {
            Ok(token) => {
                self.set_state(PairingState::AwaitingLocalAnswer, "answer ready");
                self.log("Answer ready, hand it back to the player.");
                Ok(token)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn negotiate_answer(&mut self, offer_token: &str) -> Result<String, PairingError> {
        let payload = signal::decode(offer_token)?;
        if payload.kind != SignalKind::Offer {
            return Err(PairingError::InvalidOffer(format!("got an {}", payload.kind)));
        }
        if payload.sdp.trim().is_empty() {
            return Err(PairingError::InvalidOffer("missing sdp".into()));
        }

        let link = self.open_link().await?;
        self.apply_remote(&payload).await?;
        link.create_answer().await?;
        self.await_gathering().await?;
        self.local_token(SignalKind::Answer).await
    }

    /// Close channel and link, forget the attempt, end up `Closed`.
    /// Safe to call at any time, any number of times.
    pub async fn teardown(&mut self) {
        self.release().await;
        self.set_state(PairingState::Closed, "disconnected");
    }

    async fn open_link(&mut self) -> Result<Arc<T::Link>, PairingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(self.transport.open_link(tx).await?);
        self.events = Some(rx);
        self.link = Some(Arc::clone(&link));
        self.channel.attach(Arc::clone(&link));
        self.candidates.clear();
        self.gathered = false;
        Ok(link)
    }

    async fn apply_remote(&mut self, payload: &SignalPayload) -> Result<(), PairingError> {
        let link = self.live_link()?;
        link.apply_remote(payload.kind, &payload.sdp).await?;
        // Stale or duplicate candidates are expected; skip them.
        for candidate in &payload.ice_candidates {
            if let Err(source) = link.add_candidate(candidate).await {
                let err = PairingError::CandidateApplyFailed {
                    candidate: candidate.candidate.clone(),
                    source,
                };
                warn!("{}", err);
            }
        }
        Ok(())
    }

    /// Pump link events until candidate gathering is done. Also returns when
    /// gathering already finished before anything was observed.
    async fn await_gathering(&mut self) -> Result<(), PairingError> {
        loop {
            let link = self.live_link()?;
            if self.gathered || link.gathering_complete() {
                break;
            }
            let Some(event) = self.recv_live().await else {
                return Err(TransportError::Closed.into());
            };
            self.handle_event(event).await;
        }
        // Candidates already queued behind the completion signal.
        while let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event).await;
        }
        debug!("ICE gathering complete with {} candidates", self.candidates.len());
        Ok(())
    }

    async fn local_token(&mut self, kind: SignalKind) -> Result<String, PairingError> {
        let sdp = self
            .live_link()?
            .local_sdp()
            .await
            .ok_or_else(|| TransportError::Rejected("no local description".into()))?;
        let payload = SignalPayload::new(kind, sdp, self.candidates.clone());
        Ok(signal::encode(&payload))
    }

    fn live_link(&self) -> Result<Arc<T::Link>, PairingError> {
        self.link.clone().ok_or(PairingError::NegotiationFailed(TransportError::Closed))
    }

    async fn release(&mut self) {
        // Late callbacks from the old link have nowhere to go after this.
        self.events = None;
        self.channel.detach();
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close_channel().await {
                debug!("Closing data channel: {}", e);
            }
            if let Err(e) = link.close().await {
                debug!("Closing peer connection: {}", e);
            }
        }
        self.candidates.clear();
        self.gathered = false;
        self.open_deadline = None;
    }

    fn arm_open_deadline(&mut self) {
        if self.open_deadline.is_none() {
            self.open_deadline = Some(Instant::now() + self.open_timeout);
        }
    }

    async fn fail(&mut self, err: PairingError) -> PairingError {
        self.release().await;
        error!("Pairing failed: {}", err);
        self.log(&format!("Error: {err}"));
        self.set_state(PairingState::Failed, &err.to_string());
        err
    }

    /// Report a rejected paste without touching the session.
    fn reject(&self, err: PairingError) -> PairingError {
        warn!("{}", err);
        self.log(&format!("Rejected: {err}"));
        err
    }

    fn require(&self, role: Role) -> Result<(), PairingError> {
        let actual = self.role();
        if actual == role { Ok(()) } else { Err(PairingError::WrongRole(actual)) }
    }

    fn set_state(&mut self, state: PairingState, message: &str) {
        if self.state == state && state == PairingState::Failed {
            return;
        }
        debug!("{} state: {:?} -> {:?}", self.role(), self.state, state);
        self.state = state;
        self.observer.on_status_changed(state, message);
    }

    fn log(&self, line: &str) {
        info!("[{}] {}", self.role(), line);
        self.observer.on_log(line);
    }

    // ───────────── event dispatch ─────────────

    /// Next event from the live link, or [`LinkEvent::OpenTimedOut`] once a
    /// pending channel is overdue. Pending forever while there is neither, so
    /// it can sit in a `select!` next to other inputs.
    pub async fn next_event(&mut self) -> LinkEvent {
        let deadline = self.open_deadline;
        let live = async {
            match self.recv_live().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            event = live => event,
            _ = sleep_until(deadline) => LinkEvent::OpenTimedOut,
        }
    }

    async fn recv_live(&mut self) -> Option<LinkEvent> {
        let rx = self.events.as_mut()?;
        let event = rx.recv().await;
        if event.is_none() {
            self.events = None;
        }
        event
    }

    /// Handle every event already queued, without waiting for more.
    pub async fn pump_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Candidate(candidate) => self.candidates.push(candidate),
            LinkEvent::GatheringComplete => self.gathered = true,
            LinkEvent::State(link_state) => self.on_link_state(link_state).await,
            LinkEvent::ChannelOpen => self.on_channel_open().await,
            LinkEvent::ChannelClosed => {
                if self.state == PairingState::Open {
                    self.log("Channel closed.");
                    self.teardown().await;
                }
            }
            LinkEvent::ChannelError(e) => self.log(&format!("Channel error: {e}")),
            LinkEvent::Message(raw) => self.on_message(&raw).await,
            LinkEvent::OpenTimedOut => self.on_open_timed_out().await,
        }
    }

    async fn on_link_state(&mut self, link_state: LinkState) {
        self.log(&format!("Connection: {link_state}"));
        if link_state == LinkState::Connected && self.state.is_pending() {
            self.arm_open_deadline();
        }
        if link_state == LinkState::Failed && self.link.is_some() {
            let err = PairingError::NegotiationFailed(TransportError::Rejected(
                "peer connection failed".into(),
            ));
            self.fail(err).await;
        }
    }

    async fn on_open_timed_out(&mut self) {
        let overdue = self.open_deadline.is_some_and(|at| at <= Instant::now());
        if !overdue || !self.state.is_pending() {
            return;
        }
        let err = PairingError::NegotiationFailed(TransportError::Rejected(format!(
            "data channel did not open within {}s",
            self.open_timeout.as_secs_f32()
        )));
        self.fail(err).await;
    }

    async fn on_channel_open(&mut self) {
        if !self.state.is_pending() {
            debug!("Ignoring channel open in state {:?}", self.state);
            return;
        }
        self.open_deadline = None;
        self.set_state(PairingState::Open, "connected");
        match &self.endpoint {
            Endpoint::Player(desk) => {
                self.log("Remote connected.");
                self.channel.send(&desk.catalog_message()).await;
            }
            Endpoint::Remote(_) => {
                self.log("Channel open, requesting songs.");
                self.channel.send(&Message::Command(CommandMessage::new(CommandName::RequestSongs))).await;
            }
        }
    }

    async fn on_message(&mut self, raw: &str) {
        if self.state != PairingState::Open {
            // A frame may overtake the open event; the link knows better.
            let open = match &self.link {
                Some(link) if self.state.is_pending() => link.channel_open().await,
                _ => false,
            };
            if !open {
                debug!("Dropping message received while {:?}", self.state);
                return;
            }
            debug!("Frame arrived ahead of the open event");
            self.on_channel_open().await;
        }
        let Some(message) = CommandChannel::<T::Link>::decode(raw) else { return };
        let role = self.role();

        match message {
            Message::Command(cmd) => {
                let Endpoint::Player(desk) = &mut self.endpoint else {
                    debug!("{} ignores command frames", role);
                    return;
                };
                let replies = desk.execute(&cmd);
                for reply in &replies {
                    self.channel.send(reply).await;
                }
            }
            Message::SongsList { data } => {
                if let Endpoint::Remote(mirror) = &mut self.endpoint {
                    self.observer.on_catalog_received(&data);
                    mirror.catalog = data;
                    self.log("Songs received.");
                }
            }
            Message::NowPlaying { data } => {
                if let Endpoint::Remote(mirror) = &mut self.endpoint {
                    self.observer.on_now_playing_received(&data);
                    mirror.now_playing = (!data.is_idle()).then_some(data);
                }
            }
            Message::Ack { command } if role == Role::Remote => self.log(&format!("ACK: {command}")),
            other => debug!("{} ignores {} frames", role, other.kind()),
        }
    }

    // ───────────── outbound ─────────────

    /// Remote: send a command to the player.
    pub async fn send_command(&self, command: CommandMessage) {
        if self.role() != Role::Remote {
            warn!("Only the remote sends commands");
            return;
        }
        if self.channel.send(&Message::Command(command)).await == Delivery::Dropped {
            self.log("Not connected.");
        }
    }

    /// Player: push the current catalog, e.g. after the library was reloaded.
    pub async fn publish_catalog(&self) {
        if let Endpoint::Player(desk) = &self.endpoint {
            self.channel.send(&desk.catalog_message()).await;
        }
    }

    /// Player: replace the deck after a library reload and push the new
    /// catalog to a connected remote.
    pub async fn replace_deck(&mut self, deck: Box<dyn PlaybackDeck>) -> Result<(), PairingError> {
        let role = self.role();
        let Endpoint::Player(desk) = &mut self.endpoint else {
            return Err(PairingError::WrongRole(role));
        };
        desk.set_deck(deck);
        self.log("Library reloaded.");
        self.publish_catalog().await;
        Ok(())
    }

    /// Player: push a playback status (start, stop, duration known).
    pub async fn publish_now_playing(&self, status: NowPlaying) {
        if self.role() == Role::Player {
            self.channel.send(&Message::NowPlaying { data: status }).await;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
