mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeDeck, Recorder};
use courtside_lib::deck::PlaybackDeck;
use courtside_lib::{PairingSession, PairingState, RtcTransport};
use tokio::time::timeout;

const OPEN_TIMEOUT: Duration = Duration::from_secs(8);
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const ATTEMPTS: usize = 3;

/// Both ends of one pairing attempt over real peer connections.
struct Attempt {
    player: PairingSession<RtcTransport>,
    remote: PairingSession<RtcTransport>,
    remote_seen: Arc<Recorder>,
}

impl Attempt {
    fn new() -> Self {
        let remote_seen = Arc::new(Recorder::default());
        let player = PairingSession::player_seeded(
            RtcTransport::new(),
            Box::new(FakeDeck::new()),
            42,
            Arc::new(Recorder::default()),
        )
        .with_open_timeout(OPEN_TIMEOUT);
        let remote =
            PairingSession::remote(RtcTransport::new(), remote_seen.clone()).with_open_timeout(OPEN_TIMEOUT);
        Self { player, remote, remote_seen }
    }

    /// Copy/paste exchange, then drive both ends until the remote's song
    /// request is acknowledged (true) or either end fails (false).
    async fn pair(&mut self) -> bool {
        let offer = self.player.start_as_offerer().await.unwrap();
        let answer = self.remote.start_as_answerer(&offer).await.unwrap();
        self.player.accept_answer(&answer).await.unwrap();

        loop {
            tokio::select! {
                event = self.player.next_event() => self.player.handle_event(event).await,
                event = self.remote.next_event() => self.remote.handle_event(event).await,
            }
            if self.player.state() == PairingState::Failed || self.remote.state() == PairingState::Failed {
                return false;
            }
            if self.remote.state() == PairingState::Open && self.remote_seen.logged("ACK: requestSongs") {
                return true;
            }
        }
    }

    async fn close(&mut self) {
        self.player.teardown().await;
        self.remote.teardown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn webrtc_pairing_on_one_host_syncs_the_catalog() {
    // A stalled attempt fails on its open deadline and is started over,
    // the same way an operator would.
    for _ in 0..ATTEMPTS {
        let mut attempt = Attempt::new();
        let paired = timeout(ATTEMPT_TIMEOUT, attempt.pair()).await.unwrap_or(false);
        if !paired {
            attempt.close().await;
            continue;
        }

        assert_eq!(attempt.player.state(), PairingState::Open);
        let mirror = attempt.remote.mirror().unwrap();
        assert_eq!(mirror.catalog, FakeDeck::new().catalog_snapshot());
        // The push on open and the reply to requestSongs both arrived.
        assert_eq!(attempt.remote_seen.catalogs.lock().unwrap().len(), 2);

        attempt.close().await;
        return;
    }
    panic!("no pairing within {ATTEMPTS} attempts");
}
