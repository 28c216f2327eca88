use std::path::PathBuf;

use courtside_lib::message::{CommandName, SpecialId, SpecialKind};
use courtside_lib::transport::Transport;
use courtside_lib::{CommandMessage, Context, Event, PairingSession, Role, SignalKind};
use log::{info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::library::Library;

/// What an operator can ask the session to do, from stdin or `/control`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    CreateOffer,
    AcceptAnswer { token: String },
    AcceptOffer { token: String },
    Command(CommandMessage),
    PublishCatalog,
    ReloadLibrary,
    Teardown,
}

/// Parse one console line. A line without a keyword is taken as a pasted
/// token and routed by role.
pub fn parse_line(line: &str, role: Role) -> Option<ControlRequest> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let request = match (word.to_lowercase().as_str(), rest) {
        ("offer", "") => ControlRequest::CreateOffer,
        ("answer", token) if !token.is_empty() => ControlRequest::AcceptAnswer { token: token.to_owned() },
        ("connect", token) if !token.is_empty() => ControlRequest::AcceptOffer { token: token.to_owned() },
        ("close", "") => ControlRequest::Teardown,
        ("reload", "") => ControlRequest::ReloadLibrary,
        ("songs", "") => match role {
            Role::Player => ControlRequest::PublishCatalog,
            Role::Remote => ControlRequest::Command(CommandMessage::new(CommandName::RequestSongs)),
        },
        ("play", args) => {
            let (category, id) = args.split_once(char::is_whitespace)?;
            ControlRequest::Command(CommandMessage::play(category, id.trim()))
        }
        ("stop", "") => ControlRequest::Command(CommandMessage::new(CommandName::Stop)),
        ("random", "") => ControlRequest::Command(CommandMessage::new(CommandName::RandomStandard)),
        ("opponent", "") => ControlRequest::Command(CommandMessage::new(CommandName::RandomOpponent)),
        ("timeout", "") => ControlRequest::Command(CommandMessage::special(SpecialKind::Timeout, None)),
        ("walkon", "") => ControlRequest::Command(CommandMessage::special(SpecialKind::Walkon, None)),
        ("pause", id) if !id.is_empty() => {
            let id = match id.parse::<u64>() {
                Ok(n) => SpecialId::Number(n),
                Err(_) => SpecialId::Name(id.to_owned()),
            };
            ControlRequest::Command(CommandMessage::special(SpecialKind::Pause, Some(id)))
        }
        ("volume", value) => ControlRequest::Command(CommandMessage::volume(value.parse().ok()?)),
        (_, "") if looks_like_token(line) => match role {
            Role::Player => ControlRequest::AcceptAnswer { token: line.to_owned() },
            Role::Remote => ControlRequest::AcceptOffer { token: line.to_owned() },
        },
        _ => return None,
    };
    Some(request)
}

fn looks_like_token(line: &str) -> bool {
    line.len() >= 16
        && line
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

/// Forward stdin lines as control requests until stdin closes.
pub async fn read_stdin(role: Role, requests: UnboundedSender<ControlRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_line(&line, role) {
                Some(request) => {
                    if requests.send(request).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unrecognized input: {:.40}", line.trim()),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("stdin: {}", e);
                break;
            }
        }
    }
    info!("stdin closed");
}

/// Owns the session; the only place it is touched from.
pub struct Driver<T: Transport> {
    session: PairingSession<T>,
    ctx: Context,
    requests: UnboundedReceiver<ControlRequest>,
    library: Option<PathBuf>,
}

impl<T: Transport> Driver<T> {
    pub fn new(session: PairingSession<T>, ctx: Context, requests: UnboundedReceiver<ControlRequest>) -> Self {
        Self { session, ctx, requests, library: None }
    }

    /// Where `reload` reads the library from.
    pub fn with_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = Some(path.into());
        self
    }

    /// Run until every request sender is gone, then tear down.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.session.next_event() => self.session.handle_event(event).await,
                request = self.requests.recv() => match request {
                    Some(request) => self.apply(request).await,
                    None => break,
                },
            }
        }
        self.session.teardown().await;
    }

    pub async fn apply(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::CreateOffer => {
                if let Ok(token) = self.session.start_as_offerer().await {
                    self.hand_out(SignalKind::Offer, token);
                }
            }
            ControlRequest::AcceptAnswer { token } => {
                if let Err(e) = self.session.accept_answer(&token).await {
                    warn!("Answer not applied: {}", e);
                }
            }
            ControlRequest::AcceptOffer { token } => {
                if let Ok(token) = self.session.start_as_answerer(&token).await {
                    self.hand_out(SignalKind::Answer, token);
                }
            }
            ControlRequest::Command(command) => self.session.send_command(command).await,
            ControlRequest::PublishCatalog => self.session.publish_catalog().await,
            ControlRequest::ReloadLibrary => self.reload().await,
            ControlRequest::Teardown => self.session.teardown().await,
        }
    }

    async fn reload(&mut self) {
        let Some(path) = &self.library else {
            warn!("No library configured, nothing to reload");
            return;
        };
        match Library::load(path) {
            Ok(library) => {
                if let Err(e) = self.session.replace_deck(Box::new(library)).await {
                    warn!("Reload ignored: {}", e);
                }
            }
            Err(e) => warn!("Reload failed: {}", e),
        }
    }

    fn hand_out(&self, kind: SignalKind, token: String) {
        println!("\n── {kind} token ──\n{token}\n");
        self.ctx.publish(Event::Token { kind, token });
    }
}
