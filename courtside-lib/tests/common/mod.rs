#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use courtside_lib::deck::{PlaybackDeck, SongRef};
use courtside_lib::message::{
    Catalog, CatalogSong, NowPlaying, SpecialId, SpecialKind, SpecialRef, Specials,
};
use courtside_lib::{LoopbackTransport, PairingSession, PairingState, SessionObserver};

/// Keeps every observer callback for later assertions.
#[derive(Default)]
pub struct Recorder {
    pub statuses: Mutex<Vec<(PairingState, String)>>,
    pub lines: Mutex<Vec<String>>,
    pub catalogs: Mutex<Vec<Catalog>>,
    pub now_playing: Mutex<Vec<NowPlaying>>,
}

impl Recorder {
    pub fn states(&self) -> Vec<PairingState> {
        self.statuses.lock().unwrap().iter().map(|(state, _)| *state).collect()
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

impl SessionObserver for Recorder {
    fn on_status_changed(&self, state: PairingState, message: &str) {
        self.statuses.lock().unwrap().push((state, message.to_owned()));
    }

    fn on_log(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_owned());
    }

    fn on_catalog_received(&self, catalog: &Catalog) {
        self.catalogs.lock().unwrap().push(catalog.clone());
    }

    fn on_now_playing_received(&self, status: &NowPlaying) {
        self.now_playing.lock().unwrap().push(status.clone());
    }
}

/// In-memory deck that records what it was asked to play.
pub struct FakeDeck {
    songs: Vec<SongRef>,
    pub played: Arc<Mutex<Vec<SongRef>>>,
}

impl FakeDeck {
    pub fn new() -> Self {
        let songs = [("block", "X", "Block Party"), ("block", "Y", "Wall"), ("gegner", "G", "Boo")]
            .iter()
            .map(|(category, id, display)| SongRef {
                id: id.to_string(),
                display: display.to_string(),
                category: Some(category.to_string()),
            })
            .collect();
        Self { songs, played: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn empty() -> Self {
        Self { songs: Vec::new(), played: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl PlaybackDeck for FakeDeck {
    fn lookup_song(&self, category: &str, id: &str) -> Option<SongRef> {
        self.songs
            .iter()
            .find(|song| song.category.as_deref() == Some(category) && song.id == id)
            .cloned()
    }

    fn play_song(&mut self, song: &SongRef) {
        self.played.lock().unwrap().push(song.clone());
    }

    fn stop_playback(&mut self) {}

    fn set_volume(&mut self, _level: f64) {}

    fn catalog_snapshot(&self) -> Catalog {
        Catalog {
            songs: self
                .songs
                .iter()
                .map(|song| CatalogSong {
                    id: song.id.clone(),
                    display: song.display.clone(),
                    category: song.category.clone().unwrap_or_default(),
                })
                .collect(),
            specials: Specials {
                timeout: Some(SpecialRef {
                    id: SpecialId::Name("Time_TIMEOUT.mp3".into()),
                    display: "Time".into(),
                    number: None,
                }),
                walkon: None,
                pauses: vec![SpecialRef {
                    id: SpecialId::Number(1),
                    display: "Chill".into(),
                    number: Some(1),
                }],
            },
        }
    }

    fn play_count(&self, _id: &str) -> u32 {
        0
    }

    fn category_songs(&self, category: &str) -> Vec<SongRef> {
        self.songs
            .iter()
            .filter(|song| song.category.as_deref() == Some(category))
            .cloned()
            .collect()
    }

    fn lookup_special(&self, _kind: SpecialKind, _id: Option<&SpecialId>) -> Option<SongRef> {
        None
    }
}

pub struct Pair {
    pub transport: LoopbackTransport,
    pub player: PairingSession<LoopbackTransport>,
    pub remote: PairingSession<LoopbackTransport>,
    pub player_seen: Arc<Recorder>,
    pub remote_seen: Arc<Recorder>,
    pub played: Arc<Mutex<Vec<SongRef>>>,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_open_timeout(courtside_lib::session::DEFAULT_OPEN_TIMEOUT)
    }

    pub fn with_open_timeout(timeout: Duration) -> Self {
        let transport = LoopbackTransport::new();
        let deck = FakeDeck::new();
        let played = Arc::clone(&deck.played);
        let player_seen = Arc::new(Recorder::default());
        let remote_seen = Arc::new(Recorder::default());
        let player =
            PairingSession::player_seeded(transport.clone(), Box::new(deck), 42, player_seen.clone())
                .with_open_timeout(timeout);
        let remote =
            PairingSession::remote(transport.clone(), remote_seen.clone()).with_open_timeout(timeout);
        Self { transport, player, remote, player_seen, remote_seen, played }
    }

    /// Run the full copy/paste exchange and let both sides settle.
    pub async fn connect(&mut self) {
        let offer = self.player.start_as_offerer().await.unwrap();
        let answer = self.remote.start_as_answerer(&offer).await.unwrap();
        self.player.accept_answer(&answer).await.unwrap();
        self.settle().await;
    }

    /// Ping-pong queued events until both sides are quiet.
    pub async fn settle(&mut self) {
        loop {
            let handled = self.player.pump_pending().await + self.remote.pump_pending().await;
            if handled == 0 {
                break;
            }
        }
    }
}
