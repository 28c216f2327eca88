use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frames exchanged over the open data channel:
/// - `Command` from the remote to the player
/// - `Ack`, `SongsList` and `NowPlaying` from the player to the remote
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    Command(CommandMessage),
    Ack { command: String },
    SongsList { data: Catalog },
    NowPlaying { data: NowPlaying },
}

impl Message {
    pub fn ack(command: impl Into<String>) -> Self {
        Message::Ack { command: command.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Command(_) => "command",
            Message::Ack { .. } => "ack",
            Message::SongsList { .. } => "songsList",
            Message::NowPlaying { .. } => "nowPlaying",
        }
    }
}

/// The closed set of commands a remote may issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    Play,
    Stop,
    RandomStandard,
    RandomOpponent,
    Special,
    Volume,
    RequestSongs,
}

impl CommandName {
    pub const ALL: [CommandName; 7] = [
        CommandName::Play,
        CommandName::Stop,
        CommandName::RandomStandard,
        CommandName::RandomOpponent,
        CommandName::Special,
        CommandName::Volume,
        CommandName::RequestSongs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Play => "play",
            CommandName::Stop => "stop",
            CommandName::RandomStandard => "randomStandard",
            CommandName::RandomOpponent => "randomOpponent",
            CommandName::Special => "special",
            CommandName::Volume => "volume",
            CommandName::RequestSongs => "requestSongs",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command as it travels on the wire. The name stays a string so that
/// commands this build does not know can still be acknowledged verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl CommandMessage {
    pub fn new(name: CommandName) -> Self {
        Self { command: name.as_str().to_owned(), payload: Value::Object(Map::new()) }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.to_owned(), value.into());
        }
        self
    }

    pub fn play(category: &str, id: &str) -> Self {
        Self::new(CommandName::Play).with("id", id).with("category", category)
    }

    pub fn special(kind: SpecialKind, id: Option<SpecialId>) -> Self {
        let msg = Self::new(CommandName::Special).with("type", kind.as_str());
        match id {
            Some(SpecialId::Number(n)) => msg.with("id", n),
            Some(SpecialId::Name(name)) => msg.with("id", name),
            None => msg,
        }
    }

    pub fn volume(value: f64) -> Self {
        Self::new(CommandName::Volume).with("value", value)
    }

    pub fn name(&self) -> Option<CommandName> {
        CommandName::parse(&self.command)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|map| map.get(key))
    }

    /// Interpret the command and its payload. `None` for unknown names.
    pub fn parse(&self) -> Option<Command> {
        let command = match self.name()? {
            CommandName::Play => Command::Play {
                category: self.field("category").and_then(text),
                id: self.field("id").and_then(text),
            },
            CommandName::Stop => Command::Stop,
            CommandName::RandomStandard => Command::RandomStandard,
            CommandName::RandomOpponent => Command::RandomOpponent,
            CommandName::Special => Command::Special {
                kind: self
                    .field("type")
                    .and_then(Value::as_str)
                    .and_then(SpecialKind::parse),
                id: self.field("id").and_then(SpecialId::from_value),
            },
            CommandName::Volume => Command::Volume(self.field("value").and_then(number)),
            CommandName::RequestSongs => Command::RequestSongs,
        };
        Some(command)
    }
}

/// Typed view of a [`CommandMessage`]. Missing or unusable payload fields are
/// `None`; executing such a command is a no-op that still gets acknowledged.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Play { category: Option<String>, id: Option<String> },
    Stop,
    RandomStandard,
    RandomOpponent,
    Special { kind: Option<SpecialKind>, id: Option<SpecialId> },
    Volume(Option<f64>),
    RequestSongs,
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialKind {
    Timeout,
    Walkon,
    Pause,
}

impl SpecialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialKind::Timeout => "timeout",
            SpecialKind::Walkon => "walkon",
            SpecialKind::Pause => "pause",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "timeout" => Some(SpecialKind::Timeout),
            "walkon" => Some(SpecialKind::Walkon),
            "pause" => Some(SpecialKind::Pause),
            _ => None,
        }
    }
}

/// Special cues are addressed by pause number or by name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpecialId {
    Number(u64),
    Name(String),
}

impl SpecialId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(SpecialId::Number),
            Value::String(s) if !s.is_empty() => Some(SpecialId::Name(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpecialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecialId::Number(n) => write!(f, "{n}"),
            SpecialId::Name(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub songs: Vec<CatalogSong>,
    #[serde(default)]
    pub specials: Specials,
}

impl Catalog {
    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a CatalogSong> + 'a {
        self.songs.iter().filter(move |song| song.category == category)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSong {
    pub id: String,
    pub display: String,
    pub category: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Specials {
    #[serde(default)]
    pub timeout: Option<SpecialRef>,
    #[serde(default)]
    pub walkon: Option<SpecialRef>,
    #[serde(default)]
    pub pauses: Vec<SpecialRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialRef {
    pub id: SpecialId,
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
}

/// Playback status pushed to the remote.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Seconds; zero until the duration is known.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub stopped: bool,
}

impl NowPlaying {
    pub fn playing(title: impl Into<String>, category: Option<String>, duration: f64) -> Self {
        Self { title: title.into(), category, duration, stopped: false }
    }

    pub fn stopped() -> Self {
        Self { stopped: true, ..Self::default() }
    }

    /// Nothing to show: stopped, or a status without a title.
    pub fn is_idle(&self) -> bool {
        self.stopped || self.title.is_empty()
    }
}
