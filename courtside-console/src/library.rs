//! Player-side music library loaded from a JSON file list.
//!
//! Categories come from tags in the file names (`Intro_BLOCK.mp3`,
//! `Timeout_TIMEOUT.mp3`, `Halftime_PAUSE2.mp3`); files under a
//! `special_music/` directory are special cues rather than grid songs.

use std::collections::HashMap;
use std::path::Path;

use courtside_lib::deck::{PlaybackDeck, REMOTE_CATEGORIES, SongRef};
use courtside_lib::message::{Catalog, CatalogSong, SpecialId, SpecialKind, SpecialRef, Specials};
use log::info;
use serde::Deserialize;
use thiserror::Error;

const AUDIO_EXTENSIONS: [&str; 4] = [".mp3", ".flac", ".wav", ".ogg"];
const MISC_CATEGORIES: [&str; 3] = ["sonstiges", "noch_mehr", "noch_mehr2"];
const UNCOUNTED_CATEGORY: &str = "spass";

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("cannot read library file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid library file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    files: Vec<String>,
}

#[derive(Clone, Debug)]
struct Track {
    song: SongRef,
    path: String,
}

#[derive(Clone, Debug)]
struct Pause {
    track: Track,
    number: u32,
}

/// The console's [`PlaybackDeck`]. Playback itself is reported through the
/// log; play counts live in memory for the lifetime of the process.
#[derive(Default)]
pub struct Library {
    songs: Vec<Track>,
    timeout: Option<Track>,
    walkon: Option<Track>,
    pauses: Vec<Pause>,
    counts: HashMap<String, u32>,
    volume: f64,
    current: Option<String>,
}

impl Library {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, LibraryError> {
        let file: LibraryFile = serde_json::from_str(raw)?;
        Ok(Self::from_files(file.files.iter().map(String::as_str)))
    }

    /// Sort audio files into categories. Untagged songs rotate over the
    /// misc categories; non-audio entries are skipped.
    pub fn from_files<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut library = Library { volume: 1.0, ..Library::default() };
        let mut rotation = 0;

        for path in paths {
            let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
            if !is_audio(name) {
                continue;
            }
            let upper = name.to_uppercase();
            let track = |category: Option<&str>| Track {
                song: SongRef {
                    id: name.to_owned(),
                    display: clean_name(name),
                    category: category.map(str::to_owned),
                },
                path: path.to_owned(),
            };

            if is_special(path) {
                if upper.contains("_TIMEOUT") {
                    library.timeout = Some(track(None));
                } else if upper.contains("_WALKON") {
                    library.walkon = Some(track(None));
                } else if let Some(number) = pause_number(&upper) {
                    library.pauses.push(Pause { track: track(None), number });
                } else {
                    info!("Skipping untagged special {}", name);
                }
                continue;
            }

            let category = match tag_category(&upper) {
                Some(category) => category,
                None => {
                    let category = MISC_CATEGORIES[rotation % MISC_CATEGORIES.len()];
                    rotation += 1;
                    category
                }
            };
            library.songs.push(track(Some(category)));
        }

        info!(
            "Library loaded: {} songs, {} pauses, timeout: {}, walk-on: {}",
            library.songs.len(),
            library.pauses.len(),
            library.timeout.is_some(),
            library.walkon.is_some(),
        );
        library
    }

    fn special_ref(track: &Track, fallback: &str) -> SpecialRef {
        SpecialRef {
            id: SpecialId::Name(track.song.id.clone()),
            display: non_empty(&track.song.display, fallback),
            number: None,
        }
    }

    fn find_pause(&self, id: Option<&SpecialId>) -> Option<&Pause> {
        match id? {
            SpecialId::Number(n) => self.pauses.iter().find(|p| u64::from(p.number) == *n),
            SpecialId::Name(name) => {
                let number = name.trim().parse::<u32>().ok();
                self.pauses.iter().find(|p| {
                    Some(p.number) == number || p.track.song.display == *name || p.track.song.id == *name
                })
            }
        }
    }
}

fn is_audio(name: &str) -> bool {
    let lower = name.to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn is_special(path: &str) -> bool {
    path.to_lowercase()
        .split(['/', '\\'])
        .any(|segment| segment == "special_music")
}

fn tag_category(upper: &str) -> Option<&'static str> {
    if upper.contains("_HIT") || upper.contains("_ACE") {
        Some("ass_angriff")
    } else if upper.contains("_BLOCK") {
        Some("block")
    } else if upper.contains("_OPP") {
        Some("gegner")
    } else if upper.contains("_FUN") {
        Some("spass")
    } else {
        None
    }
}

/// Number of a `_PAUSE<n>` cue; a bare `_PAUSE` is not a pause.
fn pause_number(upper: &str) -> Option<u32> {
    let at = upper.find("_PAUSE")?;
    let digits: String = upper[at + "_PAUSE".len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Display title: file name without category tags or extension.
pub fn clean_name(file_name: &str) -> String {
    let mut name = file_name.to_owned();
    for ext in AUDIO_EXTENSIONS {
        if name.to_ascii_lowercase().ends_with(ext) {
            name.truncate(name.len() - ext.len());
            break;
        }
    }
    for tag in ["_BLOCK", "_HIT", "_ACE", "_OPP", "_FUN", "_TIMEOUT", "_WALKON", "_PAUSE"] {
        if let Some(at) = name.to_ascii_uppercase().find(tag) {
            let mut end = at + tag.len();
            if tag == "_PAUSE" {
                end += name[end..].chars().take_while(char::is_ascii_digit).count();
            }
            name.replace_range(at..end, "");
        }
    }
    name.trim().to_owned()
}

fn non_empty(display: &str, fallback: &str) -> String {
    if display.is_empty() { fallback.to_owned() } else { display.to_owned() }
}

impl PlaybackDeck for Library {
    fn lookup_song(&self, category: &str, id: &str) -> Option<SongRef> {
        self.songs
            .iter()
            .find(|t| t.song.category.as_deref() == Some(category) && t.song.id == id)
            .map(|t| t.song.clone())
    }

    fn play_song(&mut self, song: &SongRef) {
        let path = self
            .songs
            .iter()
            .chain(self.timeout.iter())
            .chain(self.walkon.iter())
            .chain(self.pauses.iter().map(|p| &p.track))
            .find(|t| t.song.id == song.id)
            .map(|t| t.path.clone())
            .unwrap_or_else(|| song.id.clone());
        info!("▶ {} ({}) at volume {:.2}", song.display, path, self.volume);
        self.current = Some(path);

        // Special cues have no category and never count.
        match song.category.as_deref() {
            None | Some(UNCOUNTED_CATEGORY) => {}
            Some(_) => *self.counts.entry(song.id.clone()).or_insert(0) += 1,
        }
    }

    fn stop_playback(&mut self) {
        if let Some(path) = self.current.take() {
            info!("■ stopped {}", path);
        }
    }

    fn set_volume(&mut self, level: f64) {
        info!("Volume {:.0}%", level * 100.0);
        self.volume = level;
    }

    fn catalog_snapshot(&self) -> Catalog {
        let songs = REMOTE_CATEGORIES
            .iter()
            .flat_map(|category| {
                self.songs
                    .iter()
                    .filter(move |t| t.song.category.as_deref() == Some(*category))
            })
            .map(|t| CatalogSong {
                id: t.song.id.clone(),
                display: t.song.display.clone(),
                category: t.song.category.clone().unwrap_or_default(),
            })
            .collect();

        let mut pauses: Vec<&Pause> = self.pauses.iter().collect();
        pauses.sort_by_key(|p| p.number);
        let specials = Specials {
            timeout: self.timeout.as_ref().map(|t| Self::special_ref(t, "Timeout")),
            walkon: self.walkon.as_ref().map(|t| Self::special_ref(t, "Walk-On")),
            pauses: pauses
                .into_iter()
                .map(|p| SpecialRef {
                    id: SpecialId::Number(u64::from(p.number)),
                    display: non_empty(&p.track.song.display, &format!("Pause {}", p.number)),
                    number: Some(p.number),
                })
                .collect(),
        };
        Catalog { songs, specials }
    }

    fn play_count(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    fn category_songs(&self, category: &str) -> Vec<SongRef> {
        self.songs
            .iter()
            .filter(|t| t.song.category.as_deref() == Some(category))
            .map(|t| t.song.clone())
            .collect()
    }

    fn export_play_counts(&self) -> HashMap<String, u32> {
        self.counts.clone()
    }

    fn import_play_counts(&mut self, counts: HashMap<String, u32>) {
        self.counts.extend(counts);
    }

    fn lookup_special(&self, kind: SpecialKind, id: Option<&SpecialId>) -> Option<SongRef> {
        let (track, fallback) = match kind {
            SpecialKind::Timeout => (self.timeout.as_ref()?, "Timeout".to_owned()),
            SpecialKind::Walkon => (self.walkon.as_ref()?, "Walk-On".to_owned()),
            SpecialKind::Pause => {
                let pause = self.find_pause(id)?;
                (&pause.track, format!("Pause {}", pause.number))
            }
        };
        Some(SongRef { display: non_empty(&track.song.display, &fallback), ..track.song.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Library {
        Library::from_json(
            r#"{"files": [
                "music/Kill_HIT.mp3",
                "music/Wall_BLOCK.flac",
                "music/Boo_OPP.mp3",
                "music/Party_FUN.ogg",
                "music/One.mp3",
                "music/Two.mp3",
                "music/cover.jpg",
                "special_music/Break_PAUSE2.mp3",
                "special_music/Chill_PAUSE1.mp3",
                "special_music/Time_TIMEOUT.mp3",
                "special_music/Enter_WALKON.wav"
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn files_are_sorted_by_tag() {
        let library = sample();
        assert_eq!(library.category_songs("ass_angriff")[0].display, "Kill");
        assert_eq!(library.category_songs("block")[0].id, "Wall_BLOCK.flac");
        assert_eq!(library.category_songs("gegner").len(), 1);
        assert_eq!(library.category_songs("spass").len(), 1);
        assert_eq!(library.category_songs("sonstiges")[0].id, "One.mp3");
        assert_eq!(library.category_songs("noch_mehr")[0].id, "Two.mp3");
        assert!(library.lookup_song("block", "cover.jpg").is_none());
    }

    #[test]
    fn names_lose_tags_and_extensions() {
        assert_eq!(clean_name("Kill_HIT.mp3"), "Kill");
        assert_eq!(clean_name("Halftime_PAUSE12.MP3"), "Halftime");
        assert_eq!(clean_name("plain.wav"), "plain");
    }

    #[test]
    fn catalog_hides_the_opponent_category_and_sorts_pauses() {
        let catalog = sample().catalog_snapshot();
        assert!(catalog.songs.iter().all(|s| s.category != "gegner"));
        assert_eq!(catalog.songs.len(), 5);
        let numbers: Vec<_> = catalog.specials.pauses.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![Some(1), Some(2)]);
        assert_eq!(catalog.specials.timeout.unwrap().display, "Time");
    }

    #[test]
    fn pauses_resolve_by_number_or_name() {
        let library = sample();
        let by_number = library.lookup_special(SpecialKind::Pause, Some(&SpecialId::Number(2)));
        assert_eq!(by_number.unwrap().display, "Break");
        let by_text = library.lookup_special(SpecialKind::Pause, Some(&SpecialId::Name("1".into())));
        assert_eq!(by_text.unwrap().display, "Chill");
        let by_name = library.lookup_special(SpecialKind::Pause, Some(&SpecialId::Name("Break".into())));
        assert!(by_name.is_some());
        assert!(library.lookup_special(SpecialKind::Pause, None).is_none());
        assert!(library.lookup_special(SpecialKind::Walkon, None).is_some());
    }

    #[test]
    fn fun_songs_do_not_count_as_played() {
        let mut library = sample();
        let fun = library.category_songs("spass").remove(0);
        let kill = library.category_songs("ass_angriff").remove(0);
        library.play_song(&fun);
        library.play_song(&kill);
        library.play_song(&kill);
        assert_eq!(library.play_count(&fun.id), 0);
        assert_eq!(library.play_count(&kill.id), 2);
        assert_eq!(library.current.as_deref(), Some("music/Kill_HIT.mp3"));
        library.stop_playback();
        assert_eq!(library.current, None);
    }

    #[test]
    fn special_cues_do_not_count_as_played() {
        let mut library = sample();
        let timeout = library.lookup_special(SpecialKind::Timeout, None).unwrap();
        let pause = library.lookup_special(SpecialKind::Pause, Some(&SpecialId::Number(1))).unwrap();
        library.play_song(&timeout);
        library.play_song(&pause);
        assert_eq!(library.play_count(&timeout.id), 0);
        assert_eq!(library.play_count(&pause.id), 0);
        assert!(library.export_play_counts().is_empty());
    }

    #[test]
    fn pause_cues_need_a_number() {
        let library = Library::from_files([
            "special_music/Foo_PAUSE.mp3",
            "special_music/Bar_PAUSE3.mp3",
        ]);
        let numbers: Vec<_> = library.pauses.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![3]);
        assert!(library.lookup_special(SpecialKind::Pause, Some(&SpecialId::Name("Foo".into()))).is_none());
    }

    #[test]
    fn play_counts_survive_a_reload() {
        let mut old = sample();
        let kill = old.category_songs("ass_angriff").remove(0);
        old.play_song(&kill);
        old.play_song(&kill);

        let mut reloaded = sample();
        reloaded.import_play_counts(old.export_play_counts());
        assert_eq!(reloaded.play_count(&kill.id), 2);
    }
}
