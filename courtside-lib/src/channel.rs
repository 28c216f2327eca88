use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::message::Message;
use crate::transport::{PeerLink, TransportError};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("data channel is not open")]
    NotOpen,

    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of a best-effort [`CommandChannel::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Dropped,
}

/// JSON framing over the data channel of the current link.
pub struct CommandChannel<L> {
    link: Option<Arc<L>>,
}

impl<L: PeerLink> CommandChannel<L> {
    pub fn detached() -> Self {
        Self { link: None }
    }

    pub fn attach(&mut self, link: Arc<L>) {
        self.link = Some(link);
    }

    pub fn detach(&mut self) {
        self.link = None;
    }

    /// Serialize and send one frame.
    pub async fn try_send(&self, message: &Message) -> Result<(), ChannelError> {
        let link = self.link.as_ref().ok_or(ChannelError::NotOpen)?;
        if !link.channel_open().await {
            return Err(ChannelError::NotOpen);
        }
        let text = serde_json::to_string(message)?;
        link.send_text(&text).await?;
        debug!("sent {} frame", message.kind());
        Ok(())
    }

    /// Like [`CommandChannel::try_send`], but a closed channel only costs a
    /// warning.
    pub async fn send(&self, message: &Message) -> Delivery {
        match self.try_send(message).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!("Dropping {} frame: {}", message.kind(), e);
                Delivery::Dropped
            }
        }
    }

    /// Parse an inbound frame. Anything unparseable is logged and skipped.
    pub fn decode(raw: &str) -> Option<Message> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Discarding malformed frame ({}): {:.80}", e, raw);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandMessage, CommandName};
    use crate::signal::SignalKind;
    use crate::transport::{LinkEvent, LoopbackTransport, Transport};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sending_without_an_open_channel_is_refused() {
        let transport = LoopbackTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = Arc::new(transport.open_link(tx).await.unwrap());

        let mut channel = CommandChannel::detached();
        let frame = Message::ack("stop");
        assert!(matches!(channel.try_send(&frame).await, Err(ChannelError::NotOpen)));

        channel.attach(link);
        assert!(matches!(channel.try_send(&frame).await, Err(ChannelError::NotOpen)));
        assert_eq!(channel.send(&frame).await, Delivery::Dropped);
    }

    #[tokio::test]
    async fn frames_arrive_as_json_text() {
        let transport = LoopbackTransport::new();
        let (offer_tx, _offer_rx) = mpsc::unbounded_channel();
        let (answer_tx, mut answer_rx) = mpsc::unbounded_channel();
        let offerer = Arc::new(transport.open_link(offer_tx).await.unwrap());
        let answerer = transport.open_link(answer_tx).await.unwrap();

        offerer.create_channel("remote").await.unwrap();
        offerer.create_offer().await.unwrap();
        answerer
            .apply_remote(SignalKind::Offer, &offerer.local_sdp().await.unwrap())
            .await
            .unwrap();
        answerer.create_answer().await.unwrap();
        offerer
            .apply_remote(SignalKind::Answer, &answerer.local_sdp().await.unwrap())
            .await
            .unwrap();

        let mut channel = CommandChannel::detached();
        channel.attach(offerer);
        let frame = Message::Command(CommandMessage::new(CommandName::Stop));
        assert_eq!(channel.send(&frame).await, Delivery::Sent);

        let mut received = None;
        while let Ok(event) = answer_rx.try_recv() {
            if let LinkEvent::Message(text) = event {
                received = Some(text);
            }
        }
        let text = received.expect("frame delivered");
        assert_eq!(CommandChannel::<crate::transport::LoopbackLink>::decode(&text), Some(frame));
    }

    #[test]
    fn garbage_frames_are_skipped() {
        type Channel = CommandChannel<crate::transport::LoopbackLink>;
        assert_eq!(Channel::decode("not json"), None);
        assert_eq!(Channel::decode(r#"{"type":"bogus"}"#), None);
        assert_eq!(Channel::decode(r#"{"type":"ack","command":"stop"}"#), Some(Message::ack("stop")));
    }
}
