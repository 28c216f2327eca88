use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::message::{Catalog, NowPlaying};
use crate::session::PairingState;
use crate::signal::SignalKind;

/// Callbacks a session drives while it negotiates and runs.
pub trait SessionObserver: Send + Sync {
    fn on_status_changed(&self, state: PairingState, message: &str);

    /// One line for the operator-facing pairing log.
    fn on_log(&self, _line: &str) {}

    fn on_catalog_received(&self, _catalog: &Catalog) {}

    fn on_now_playing_received(&self, _status: &NowPlaying) {}
}

/// Everything a status page or control socket gets to see.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    Status { state: PairingState, message: String },
    Log { at: DateTime<Utc>, line: String },
    Token { kind: SignalKind, token: String },
    Catalog(Catalog),
    NowPlaying(NowPlaying),
}

/// A small wrapper around a Tokio broadcast channel,
/// used to fan-out session events to any number of listeners.
#[derive(Clone)]
pub struct Context {
    pub tx: broadcast::Sender<Event>,
}

impl Context {
    /// Create a new Context with a channel of the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish to whoever listens; nobody listening is fine.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for Context {
    fn on_status_changed(&self, state: PairingState, message: &str) {
        self.publish(Event::Status { state, message: message.to_owned() });
    }

    fn on_log(&self, line: &str) {
        self.publish(Event::Log { at: Utc::now(), line: line.to_owned() });
    }

    fn on_catalog_received(&self, catalog: &Catalog) {
        self.publish(Event::Catalog(catalog.clone()));
    }

    /// Displays get a plain stopped status for anything idle.
    fn on_now_playing_received(&self, status: &NowPlaying) {
        let status = if status.is_idle() { NowPlaying::stopped() } else { status.clone() };
        self.publish(Event::NowPlaying(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_calls_fan_out_as_events() {
        let ctx = Context::new(8);
        let mut rx = ctx.subscribe();
        ctx.on_status_changed(PairingState::Open, "connected");
        ctx.on_log("remote connected");

        match rx.try_recv().unwrap() {
            Event::Status { state, message } => {
                assert_eq!(state, PairingState::Open);
                assert_eq!(message, "connected");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), Event::Log { line, .. } if line == "remote connected"));
    }

    #[test]
    fn events_serialize_with_type_and_payload() {
        let json = serde_json::to_value(Event::Status {
            state: PairingState::AwaitingRemoteAnswer,
            message: "offer ready".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["payload"]["state"], "awaitingRemoteAnswer");
    }

    #[test]
    fn untitled_statuses_render_as_stopped() {
        let ctx = Context::new(8);
        let mut rx = ctx.subscribe();
        ctx.on_now_playing_received(&NowPlaying::playing("", Some("block".into()), 12.0));
        ctx.on_now_playing_received(&NowPlaying::playing("Wall", Some("block".into()), 12.0));

        assert!(matches!(rx.try_recv().unwrap(), Event::NowPlaying(status) if status == NowPlaying::stopped()));
        match rx.try_recv().unwrap() {
            Event::NowPlaying(status) => {
                assert_eq!(status.title, "Wall");
                assert!(!status.stopped);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn publishing_without_listeners_is_silent() {
        Context::new(1).publish(Event::NowPlaying(NowPlaying::stopped()));
    }
}
