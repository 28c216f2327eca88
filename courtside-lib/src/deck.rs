//! Player-side command execution against the playback collaborator.

use std::collections::HashMap;

use log::{info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::message::{Catalog, Command, CommandMessage, Message, NowPlaying, SpecialId, SpecialKind};

/// Categories `randomStandard` draws from.
pub const STANDARD_CATEGORIES: [&str; 5] = ["ass_angriff", "block", "sonstiges", "noch_mehr", "noch_mehr2"];

/// Category `randomOpponent` draws from.
pub const OPPONENT_CATEGORY: &str = "gegner";

/// Categories the remote gets to see in a catalog snapshot.
pub const REMOTE_CATEGORIES: [&str; 6] = ["ass_angriff", "block", "spass", "sonstiges", "noch_mehr", "noch_mehr2"];

/// A playable track as the collaborator knows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SongRef {
    pub id: String,
    pub display: String,
    /// `None` for special cues outside the song grid.
    pub category: Option<String>,
}

/// The audio side of the player. Playback, fades and persistence of play
/// counts live behind this trait.
pub trait PlaybackDeck: Send + Sync {
    fn lookup_song(&self, category: &str, id: &str) -> Option<SongRef>;

    fn play_song(&mut self, song: &SongRef);

    fn stop_playback(&mut self);

    /// `level` is already normalized to `0.0..=1.0`.
    fn set_volume(&mut self, level: f64);

    fn catalog_snapshot(&self) -> Catalog;

    fn play_count(&self, id: &str) -> u32;

    fn category_songs(&self, category: &str) -> Vec<SongRef>;

    fn lookup_special(&self, kind: SpecialKind, id: Option<&SpecialId>) -> Option<SongRef>;

    /// Play counts by song id, handed to the next deck on reload.
    fn export_play_counts(&self) -> HashMap<String, u32> {
        HashMap::new()
    }

    fn import_play_counts(&mut self, _counts: HashMap<String, u32>) {}
}

/// Selection weight of a track played `play_count` times.
pub fn selection_weight(play_count: u32) -> f64 {
    let base = 1.0 + f64::from(play_count);
    (1.0 / base.powi(3)).max(0.01)
}

/// Cumulative-sum draw over `(item, weight)` pairs.
pub fn pick_weighted<'a, T, R: Rng>(pool: &'a [(T, f64)], rng: &mut R) -> Option<&'a T> {
    let total: f64 = pool.iter().map(|(_, weight)| weight).sum();
    if pool.is_empty() || total <= 0.0 || !total.is_finite() {
        return None;
    }
    let threshold = rng.gen_range(0.0..total);
    let mut acc = 0.0;
    for (item, weight) in pool {
        acc += weight;
        if threshold <= acc {
            return Some(item);
        }
    }
    pool.last().map(|(item, _)| item)
}

/// Map a remote volume (`0..1` or `0..100`) to `0..=1`.
pub fn normalize_volume(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let level = if value > 1.0 { value / 100.0 } else { value };
    Some(level.clamp(0.0, 1.0))
}

/// Executes remote commands on a [`PlaybackDeck`].
pub struct PlayerDesk {
    deck: Box<dyn PlaybackDeck>,
    rng: StdRng,
}

impl PlayerDesk {
    pub fn new(deck: Box<dyn PlaybackDeck>) -> Self {
        Self { deck, rng: StdRng::from_entropy() }
    }

    /// Deterministic random picks, for reproducible runs.
    pub fn with_seed(deck: Box<dyn PlaybackDeck>, seed: u64) -> Self {
        Self { deck, rng: StdRng::seed_from_u64(seed) }
    }

    /// Swap in a reloaded deck. Play counts carry over, so random picks
    /// keep favoring what was played least.
    pub fn set_deck(&mut self, mut deck: Box<dyn PlaybackDeck>) {
        deck.import_play_counts(self.deck.export_play_counts());
        self.deck = deck;
    }

    pub fn catalog_message(&self) -> Message {
        Message::SongsList { data: self.deck.catalog_snapshot() }
    }

    /// Run one command and return the frames to send back, always ending
    /// with the acknowledgement for `msg.command`.
    pub fn execute(&mut self, msg: &CommandMessage) -> Vec<Message> {
        let mut replies = Vec::new();
        match msg.parse() {
            Some(command) => self.run(command, &mut replies),
            None => warn!("Unknown command: {}", msg.command),
        }
        replies.push(Message::ack(msg.command.clone()));
        replies
    }

    fn run(&mut self, command: Command, replies: &mut Vec<Message>) {
        match command {
            Command::Play { category, id } => {
                let song = match (category.as_deref(), id.as_deref()) {
                    (Some(category), Some(id)) => self.deck.lookup_song(category, id),
                    _ => None,
                };
                match song {
                    Some(song) => self.start(song, replies),
                    None => info!("Song not found: {:?} in {:?}", id, category),
                }
            }
            Command::Stop => {
                self.deck.stop_playback();
                replies.push(Message::NowPlaying { data: NowPlaying::stopped() });
            }
            Command::RandomStandard => match self.random_pick(&STANDARD_CATEGORIES) {
                Some(song) => self.start(song, replies),
                None => info!("No songs loaded in the random categories"),
            },
            Command::RandomOpponent => match self.random_pick(&[OPPONENT_CATEGORY]) {
                Some(song) => self.start(song, replies),
                None => info!("No songs loaded in category {}", OPPONENT_CATEGORY),
            },
            Command::Special { kind: Some(kind), id } => {
                match self.deck.lookup_special(kind, id.as_ref()) {
                    Some(song) => self.start(song, replies),
                    None => info!("Special {} not loaded", kind.as_str()),
                }
            }
            Command::Special { kind: None, .. } => info!("Special without a known type"),
            Command::Volume(value) => match value.and_then(normalize_volume) {
                Some(level) => self.deck.set_volume(level),
                None => info!("Ignoring volume without a usable value"),
            },
            Command::RequestSongs => replies.push(self.catalog_message()),
        }
    }

    fn start(&mut self, song: SongRef, replies: &mut Vec<Message>) {
        self.deck.play_song(&song);
        replies.push(Message::NowPlaying {
            data: NowPlaying::playing(song.display.clone(), song.category.clone(), 0.0),
        });
    }

    fn random_pick(&mut self, categories: &[&str]) -> Option<SongRef> {
        let pool: Vec<(SongRef, f64)> = categories
            .iter()
            .flat_map(|category| self.deck.category_songs(category))
            .map(|song| {
                let weight = selection_weight(self.deck.play_count(&song.id));
                (song, weight)
            })
            .collect();
        pick_weighted(&pool, &mut self.rng).cloned()
    }
}
