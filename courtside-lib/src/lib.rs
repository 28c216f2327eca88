//! courtside-lib: copy/paste pairing and the remote command protocol of the court DJ console

pub mod channel;
pub mod context;
pub mod deck;
pub mod message;
pub mod session;
pub mod signal;
pub mod transport;

// re-exports for ergonomic imports:
pub use context::{Context, Event, SessionObserver};
pub use deck::{PlaybackDeck, PlayerDesk, SongRef};
pub use message::{Catalog, CommandMessage, CommandName, Message, NowPlaying};
pub use session::{PairingError, PairingSession, PairingState, Role};
pub use signal::{SignalKind, SignalPayload};
pub use transport::{LoopbackTransport, RtcTransport};
